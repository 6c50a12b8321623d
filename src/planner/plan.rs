//! Plans: ordered, finite, acyclic sequences of tool calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;
use crate::tools::{RegistrySnapshot, validate_args};

// ─── OnFailure ───────────────────────────────────────────────────────────────

/// What a failing step does to the rest of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    Abort,
    Continue,
    Retry(u32),
}

// ─── PlanStep ────────────────────────────────────────────────────────────────

/// One tool invocation within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub tool_name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub on_failure: OnFailure,
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// An ordered list of steps, executed in declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Parse a plan from LLM text. Accepts a fenced or bare JSON object
    /// of the shape `{"steps": [{"tool_name": ..., "args": {...}}]}`.
    pub fn parse(text: &str) -> Result<Self, ErrorKind> {
        let json_text = extract_json(text)
            .ok_or_else(|| ErrorKind::LlmBadResponse("no JSON plan in response".into()))?;
        let plan: Plan = serde_json::from_str(&json_text)
            .map_err(|e| ErrorKind::LlmBadResponse(format!("malformed plan: {e}")))?;
        if plan.steps.is_empty() {
            return Err(ErrorKind::LlmBadResponse("plan has no steps".into()));
        }
        Ok(plan)
    }

    /// Check every step against the registry: the tool must exist and the
    /// args must pass its schema.
    pub fn validate(&self, registry: &RegistrySnapshot) -> Result<(), ErrorKind> {
        for step in &self.steps {
            let spec = registry
                .lookup(&step.tool_name)
                .ok_or_else(|| ErrorKind::UnknownTool(step.tool_name.clone()))?;
            validate_args(&spec, &step.args)?;
        }
        Ok(())
    }
}

/// Extract the first JSON object from text, preferring fenced blocks.
fn extract_json(text: &str) -> Option<String> {
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            if let Some(end) = body.find("```") {
                let candidate = body[..end].trim();
                if candidate.starts_with('{') {
                    return Some(candidate.to_string());
                }
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(text[start..=end].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::tools::builtin_registry;

    fn plan_json() -> String {
        json!({
            "steps": [
                {"tool_name": "files.create_dir", "args": {"path": "/tmp/notes"}},
                {"tool_name": "files.write", "args": {"path": "/tmp/notes/hello.txt", "content": "Hi"}}
            ]
        })
        .to_string()
    }

    #[test]
    fn parses_bare_json() {
        let plan = Plan::parse(&plan_json()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].tool_name, "files.create_dir");
        assert_eq!(plan.steps[0].on_failure, OnFailure::Abort);
    }

    #[test]
    fn parses_fenced_json() {
        let text = format!("Here is the plan:\n```json\n{}\n```", plan_json());
        let plan = Plan::parse(&text).unwrap();
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn empty_plan_rejected() {
        let err = Plan::parse(r#"{"steps": []}"#).unwrap_err();
        assert!(matches!(err, ErrorKind::LlmBadResponse(_)));
    }

    #[test]
    fn prose_rejected() {
        assert!(Plan::parse("I would create a folder first.").is_err());
    }

    #[test]
    fn validates_against_registry() {
        let registry = builtin_registry().unwrap().snapshot();
        let plan = Plan::parse(&plan_json()).unwrap();
        assert!(plan.validate(&registry).is_ok());
    }

    #[test]
    fn unknown_tool_fails_validation() {
        let registry = builtin_registry().unwrap().snapshot();
        let plan = Plan::parse(
            &json!({"steps": [{"tool_name": "files.teleport", "args": {}}]}).to_string(),
        )
        .unwrap();
        assert!(matches!(
            plan.validate(&registry).unwrap_err(),
            ErrorKind::UnknownTool(_)
        ));
    }

    #[test]
    fn bad_args_fail_validation() {
        let registry = builtin_registry().unwrap().snapshot();
        let plan = Plan::parse(
            &json!({"steps": [{"tool_name": "audio.set_volume", "args": {"level": 500}}]})
                .to_string(),
        )
        .unwrap();
        assert!(matches!(
            plan.validate(&registry).unwrap_err(),
            ErrorKind::BadArgs(_)
        ));
    }

    #[test]
    fn serde_round_trip_preserves_steps() {
        let plan = Plan::parse(&plan_json()).unwrap();
        let serialized = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn retry_on_failure_round_trips() {
        let plan = Plan {
            steps: vec![PlanStep {
                tool_name: "audio.mute".into(),
                args: Map::new(),
                on_failure: OnFailure::Retry(2),
            }],
        };
        let serialized = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back.steps[0].on_failure, OnFailure::Retry(2));
    }
}
