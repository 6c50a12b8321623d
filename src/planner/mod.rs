//! Layer 2 — task decomposition and sequential plan execution.
//!
//! A deterministic gate first decides whether the utterance needs a plan
//! at all; single-tool requests short-circuit straight into the executor.
//! Plans come from the LLM constrained to the registered tool set, are
//! validated (and re-requested once on violation), then run step by step
//! through the executor. Partial progress is always reported.

pub mod plan;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::executor::{ExecutionPolicy, InvocationResult, ToolExecutor};
use crate::llm::{CompletionRequest, LlmClient, Message, ResponseFormat};
use crate::session::CancelFlag;
use crate::tools::schema_text;

pub use plan::{OnFailure, Plan, PlanStep};

// ─── Decomposition gate ──────────────────────────────────────────────────────

/// Conjunctions that join steps.
const MULTI_STEP_MARKERS: &[&str] = &[" and ", " then ", " after ", ", then ", "; "];

/// Imperative verbs the gate counts.
const COMMAND_VERBS: &[&str] = &[
    "open", "close", "launch", "start", "set", "create", "write", "save",
    "read", "move", "rename", "delete", "mute", "unmute", "type", "press",
    "click", "copy", "lock", "take", "focus", "install",
];

/// Heuristic: does this utterance describe more than one step?
pub fn needs_plan(utterance: &str) -> bool {
    let lowered = format!(" {} ", utterance.to_ascii_lowercase());
    if MULTI_STEP_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }
    let verbs = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| COMMAND_VERBS.contains(t))
        .count();
    verbs > 1
}

// ─── PlanRunReport ───────────────────────────────────────────────────────────

/// Result of one executed (or partially executed) plan.
#[derive(Debug, Clone)]
pub struct PlanRunReport {
    /// Per-step outcomes, in declared order, up to the stopping point.
    pub steps: Vec<(String, InvocationResult)>,
    /// True when every step ran and none aborted the plan.
    pub completed: bool,
    /// Index of the step that aborted the plan, when one did.
    pub aborted_at: Option<usize>,
    /// True when the plan stopped because the utterance was cancelled.
    pub cancelled: bool,
}

// ─── Planner ─────────────────────────────────────────────────────────────────

/// The agentic layer: decompose, validate, execute.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, executor: Arc<ToolExecutor>) -> Self {
        Self { llm, executor }
    }

    /// Decompose `utterance` into a plan and run it.
    pub async fn plan_and_run(
        &self,
        utterance: &str,
        policy: &ExecutionPolicy,
        cancel: &CancelFlag,
    ) -> Result<(Plan, PlanRunReport), ErrorKind> {
        let plan = self.request_plan(utterance).await?;
        let report = self.run_plan(&plan, policy, cancel).await;
        Ok((plan, report))
    }

    /// Ask the LLM for a plan; reject and re-ask once if it references
    /// unknown tools or violates arg schemas.
    pub async fn request_plan(&self, utterance: &str) -> Result<Plan, ErrorKind> {
        let system = self.system_prompt(utterance);
        let request = CompletionRequest::new(vec![
            Message::system(system.clone()),
            Message::user(utterance.to_owned()),
        ])
        .with_temperature(0.1)
        .with_max_tokens(600)
        .with_format(ResponseFormat::JsonObject);

        let registry = self.executor.registry();
        let first = self.llm.complete(request).await?;
        match Plan::parse(&first.text).and_then(|p| p.validate(registry).map(|()| p)) {
            Ok(plan) => Ok(plan),
            Err(reason) => {
                debug!(%reason, "plan rejected; re-asking once");
                let retry = CompletionRequest::new(vec![
                    Message::system(system),
                    Message::user(utterance.to_owned()),
                    Message::assistant(first.text),
                    Message::user(format!(
                        "That plan is invalid: {reason}. Reply with a corrected JSON plan \
                         using only the listed tools and their argument schemas."
                    )),
                ])
                .with_temperature(0.1)
                .with_max_tokens(600)
                .with_format(ResponseFormat::JsonObject);
                let second = self.llm.complete(retry).await?;
                let plan = Plan::parse(&second.text)?;
                plan.validate(registry)?;
                Ok(plan)
            }
        }
    }

    /// Execute `plan` sequentially through the executor.
    pub async fn run_plan(
        &self,
        plan: &Plan,
        policy: &ExecutionPolicy,
        cancel: &CancelFlag,
    ) -> PlanRunReport {
        let mut report = PlanRunReport {
            steps: Vec::with_capacity(plan.steps.len()),
            completed: false,
            aborted_at: None,
            cancelled: false,
        };

        for (index, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return report;
            }

            let attempts = match step.on_failure {
                OnFailure::Retry(n) => n + 1,
                _ => 1,
            };

            let mut result = self.executor.execute(&step.tool_name, &step.args, policy).await;
            let mut used = 1;
            while !result.ok && used < attempts {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    report.steps.push((step.tool_name.clone(), result));
                    return report;
                }
                result = self.executor.execute(&step.tool_name, &step.args, policy).await;
                used += 1;
            }
            result.retries_used = used - 1;

            let failed = !result.ok;
            report.steps.push((step.tool_name.clone(), result));

            if failed {
                match step.on_failure {
                    OnFailure::Continue => continue,
                    // A retried step that is still failing aborts too.
                    OnFailure::Abort | OnFailure::Retry(_) => {
                        warn!(step = %step.tool_name, index, "plan step failed; aborting plan");
                        report.aborted_at = Some(index);
                        return report;
                    }
                }
            }
        }

        report.completed = true;
        report
    }

    fn system_prompt(&self, utterance: &str) -> String {
        let registry = self.executor.registry();
        let single_hint = if needs_plan(utterance) {
            ""
        } else {
            "This request likely needs exactly one step.\n"
        };
        format!(
            "You decompose a desktop-assistant request into an ordered JSON plan \
             of tool calls.\n\
             Reply with ONLY a JSON object: \
             {{\"steps\": [{{\"tool_name\": \"...\", \"args\": {{...}}}}]}}.\n\
             Use only the tools listed below with their exact names and argument \
             schemas. Keep the plan minimal.\n{single_hint}\n{}",
            schema_text(registry),
        )
    }
}
