//! The uniform response shape and its user-facing templates.
//!
//! Every layer resolves to the same [`Response`]. Failure texts mention
//! the layer and a short cause — never a stack trace.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;
use crate::executor::InvocationResult;
use crate::planner::PlanRunReport;

// ─── SourceLayer ─────────────────────────────────────────────────────────────

/// Which layer produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLayer {
    /// Layer 1 — router + executor, no LLM.
    Fast,
    /// Layer 1.5 — generated program in the sandbox.
    CodeGen,
    /// Layer 2 — agentic plan.
    Plan,
    /// The chat path.
    Conversation,
}

impl SourceLayer {
    pub fn tag(&self) -> &'static str {
        match self {
            SourceLayer::Fast => "fast",
            SourceLayer::CodeGen => "code_gen",
            SourceLayer::Plan => "plan",
            SourceLayer::Conversation => "conversation",
        }
    }

    fn human(&self) -> &'static str {
        match self {
            SourceLayer::Fast => "fast path",
            SourceLayer::CodeGen => "code generation",
            SourceLayer::Plan => "planning",
            SourceLayer::Conversation => "conversation",
        }
    }
}

// ─── Response ────────────────────────────────────────────────────────────────

/// The uniform result returned for every utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub ok: bool,
    pub used_llm: bool,
    pub source_layer: SourceLayer,
}

impl Response {
    pub fn success(text: impl Into<String>, used_llm: bool, layer: SourceLayer) -> Self {
        Self {
            text: text.into(),
            ok: true,
            used_llm,
            source_layer: layer,
        }
    }

    pub fn failure(error: &ErrorKind, used_llm: bool, layer: SourceLayer) -> Self {
        Self {
            text: render_failure(layer, error),
            ok: false,
            used_llm,
            source_layer: layer,
        }
    }
}

// ─── Templates ───────────────────────────────────────────────────────────────

/// User-facing text for a successful layer-1 tool invocation.
pub fn render_success(tool_name: &str, args: &Map<String, Value>, result: &InvocationResult) -> String {
    let level = || {
        result.value["level"]
            .as_u64()
            .or_else(|| args.get("level").and_then(Value::as_u64))
            .or_else(|| {
                args.get("level")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(0)
    };
    let str_arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or("");

    match tool_name {
        "audio.set_volume" => format!("Volume set to {}%.", level()),
        "audio.mute" => "Muted.".to_string(),
        "audio.unmute" => "Unmuted.".to_string(),
        "audio.get_volume" => format!("Volume is at {}%.", level()),
        "display.set_brightness" => format!("Brightness set to {}%.", level()),
        "display.get_brightness" => format!("Brightness is at {}%.", level()),
        "power.lock" => "Screen locked.".to_string(),
        "power.sleep" => "Going to sleep.".to_string(),
        "power.shutdown" => "Shutting down.".to_string(),
        "apps.open" => format!("Opened {}.", str_arg("name")),
        "apps.close" => format!("Closed {}.", str_arg("name")),
        "apps.focus" => format!("Focused {}.", str_arg("name")),
        "input.type" => "Typed it.".to_string(),
        "input.key" => format!("Pressed {}.", str_arg("key")),
        "input.click" => "Clicked.".to_string(),
        "clipboard.read" => match result.value.as_str() {
            Some(text) if !text.is_empty() => format!("Clipboard: {text}"),
            _ => "The clipboard is empty.".to_string(),
        },
        "clipboard.write" => "Copied to clipboard.".to_string(),
        "files.create" => format!("Created file {}.", str_arg("path")),
        "files.create_dir" => format!("Created folder {}.", str_arg("path")),
        "files.read" => result
            .value
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| "Read the file.".to_string()),
        "files.write" => format!("Saved {}.", str_arg("path")),
        "files.move" => format!("Moved {} to {}.", str_arg("from"), str_arg("to")),
        "files.delete" => format!("Deleted {}.", str_arg("path")),
        "desktop.screenshot" => match result.value["path"].as_str() {
            Some(path) => format!("Screenshot saved to {path}."),
            None => "Screenshot taken.".to_string(),
        },
        "time.now" => result.value["readable"]
            .as_str()
            .map(|s| format!("It is {s}."))
            .unwrap_or_else(|| "Got the time.".to_string()),
        "run_program" => result.value["stdout"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Done.".to_string()),
        _ => "Done.".to_string(),
    }
}

/// User-facing text for a failed layer.
pub fn render_failure(layer: SourceLayer, error: &ErrorKind) -> String {
    match error {
        ErrorKind::ConfirmationRequired(action) => {
            format!("That needs confirmation first: {action} Say \"confirm\" to proceed.")
        }
        ErrorKind::NoCredentials => {
            "I need an LLM API key for that. Set LLM_API_KEY and try again.".to_string()
        }
        other => format!("I couldn't finish that ({}): {other}.", layer.human()),
    }
}

/// User-facing summary of an executed plan.
pub fn render_plan_report(report: &PlanRunReport) -> String {
    if report.cancelled {
        let done = report.steps.iter().filter(|(_, r)| r.ok).count();
        return format!("Cancelled after {done} step(s); partial progress kept.");
    }

    let lines: Vec<String> = report
        .steps
        .iter()
        .map(|(tool, result)| {
            if result.ok {
                format!("- {tool}: done")
            } else {
                let cause = result
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "failed".into());
                format!("- {tool}: failed ({cause})")
            }
        })
        .collect();

    if report.completed {
        format!("Completed {} step(s):\n{}", report.steps.len(), lines.join("\n"))
    } else {
        let at = report.aborted_at.map(|i| i + 1).unwrap_or(report.steps.len());
        format!(
            "Stopped at step {at}:\n{}",
            lines.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn volume_template() {
        let result = InvocationResult::success(json!({"level": 50}), 3);
        let text = render_success("audio.set_volume", &args(json!({"level": 50})), &result);
        assert_eq!(text, "Volume set to 50%.");
    }

    #[test]
    fn volume_template_accepts_string_arg() {
        let result = InvocationResult::success(Value::Null, 3);
        let text = render_success("audio.set_volume", &args(json!({"level": "50"})), &result);
        assert_eq!(text, "Volume set to 50%.");
    }

    #[test]
    fn mute_template() {
        let result = InvocationResult::success(Value::Null, 2);
        assert_eq!(render_success("audio.mute", &Map::new(), &result), "Muted.");
    }

    #[test]
    fn run_program_template_uses_stdout() {
        let result = InvocationResult::success(json!({"stdout": "72.74\n", "value": 72.74}), 9);
        assert_eq!(render_success("run_program", &Map::new(), &result), "72.74");
    }

    #[test]
    fn failure_mentions_layer_and_cause() {
        let text = render_failure(
            SourceLayer::Fast,
            &ErrorKind::Unsupported("no audio".into()),
        );
        assert!(text.contains("fast path"));
        assert!(text.contains("no audio"));
        assert!(!text.contains("backtrace"));
    }

    #[test]
    fn confirmation_prompt_explains_next_step() {
        let text = render_failure(
            SourceLayer::Fast,
            &ErrorKind::ConfirmationRequired("Shut the machine down.".into()),
        );
        assert!(text.contains("confirm"));
        assert!(text.contains("Shut the machine down."));
    }

    #[test]
    fn plan_report_lists_all_steps() {
        let report = PlanRunReport {
            steps: vec![
                ("files.create_dir".into(), InvocationResult::success(Value::Null, 1)),
                ("files.write".into(), InvocationResult::success(Value::Null, 1)),
            ],
            completed: true,
            aborted_at: None,
            cancelled: false,
        };
        let text = render_plan_report(&report);
        assert!(text.contains("Completed 2 step(s)"));
        assert!(text.contains("files.create_dir: done"));
        assert!(text.contains("files.write: done"));
    }

    #[test]
    fn aborted_plan_names_failing_step() {
        let report = PlanRunReport {
            steps: vec![(
                "apps.open".into(),
                InvocationResult::failure(ErrorKind::Unavailable("not installed".into()), 4),
            )],
            completed: false,
            aborted_at: Some(0),
            cancelled: false,
        };
        let text = render_plan_report(&report);
        assert!(text.contains("Stopped at step 1"));
        assert!(text.contains("apps.open: failed"));
        assert!(text.contains("not installed"));
    }
}
