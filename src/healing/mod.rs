//! Layer 3 — the self-healing loop.
//!
//! Owns everything the executor deliberately does not do: retries with
//! backoff on transient errors, dependency repair through the constrained
//! installer tool, and promotion of successful generated programs into
//! persisted capabilities. Promotion is the only runtime writer of the
//! capability store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::capability::{Capability, CapabilitySource, CapabilityStore, PromotionOutcome, Trigger};
use crate::error::ErrorKind;
use crate::executor::{ExecutionPolicy, InvocationResult, ToolExecutor};
use crate::router::conflicts_with_builtin;

/// Maximum retries for transient tool failures.
const MAX_TRANSIENT_RETRIES: u32 = 2;
/// First backoff delay; doubles per retry.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);

// ─── PromotionResult ─────────────────────────────────────────────────────────

/// Outcome of proposing a generated program for promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionResult {
    Promoted,
    AlreadyKnown,
    /// The synthesized trigger would shadow a builtin rule.
    RejectedConflict,
    /// No template could be synthesized from the utterance.
    NotGeneralizable,
}

// ─── SelfHealing ─────────────────────────────────────────────────────────────

/// Retry, repair, and promotion around the executor.
pub struct SelfHealing {
    executor: Arc<ToolExecutor>,
    store: Arc<Mutex<CapabilityStore>>,
    backoff_base: Duration,
}

impl SelfHealing {
    pub fn new(executor: Arc<ToolExecutor>, store: Arc<Mutex<CapabilityStore>>) -> Self {
        Self {
            executor,
            store,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Shrink the backoff delay (tests).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Execute a tool under the recovery matrix:
    /// - transient errors retry up to 2 times with exponential backoff;
    /// - a missing dependency is installed once, then the call re-runs;
    /// - everything else surfaces unchanged.
    pub async fn execute_with_recovery(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        policy: &ExecutionPolicy,
    ) -> InvocationResult {
        let mut result = self.executor.execute(tool_name, args, policy).await;
        let mut retries = 0u32;

        while retries < MAX_TRANSIENT_RETRIES
            && result.error.as_ref().is_some_and(ErrorKind::is_transient)
        {
            let delay = self.backoff_base * 2u32.pow(retries);
            info!(tool = tool_name, retries, ?delay, "transient failure; backing off");
            tokio::time::sleep(delay).await;
            result = self.executor.execute(tool_name, args, policy).await;
            retries += 1;
        }

        if let Some(ErrorKind::MissingDependency(module)) = result.error.clone() {
            if let Some(repaired) = self.repair_dependency(tool_name, args, policy, &module).await {
                result = repaired;
                retries += 1;
            }
        }

        result.retries_used = retries;
        result
    }

    /// Install a missing module through the constrained installer tool and
    /// re-run the original call once.
    async fn repair_dependency(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        policy: &ExecutionPolicy,
        module: &str,
    ) -> Option<InvocationResult> {
        info!(module, "attempting dependency repair");
        let mut install_args = Map::new();
        install_args.insert("package".into(), Value::String(module.to_owned()));
        let installed = self
            .executor
            .execute("system.install_package", &install_args, policy)
            .await;
        if !installed.ok {
            warn!(module, "dependency install failed");
            return None;
        }
        Some(self.executor.execute(tool_name, args, policy).await)
    }

    /// Whether a failed LLM-backed layer should be retried once.
    pub fn llm_retry_eligible(error: &ErrorKind, attempts_so_far: u32) -> bool {
        attempts_so_far < 1
            && matches!(error, ErrorKind::LlmNetwork(_) | ErrorKind::LlmRateLimit(_))
    }

    // ── Promotion ────────────────────────────────────────────────────────

    /// Propose a successful generated program for promotion. Synthesizes a
    /// trigger template from the utterance, checks builtin conflicts, and
    /// persists the capability. Idempotent.
    pub fn promote_program(&self, utterance: &str, source: &str) -> PromotionResult {
        let Some(capability) = generalize(utterance, source) else {
            return PromotionResult::NotGeneralizable;
        };

        if conflicts_with_builtin(&capability) {
            // Audit record: rejected promotions land in the structured log.
            warn!(
                capability = %capability.name,
                utterance,
                "promotion rejected: trigger shadows a builtin rule"
            );
            return PromotionResult::RejectedConflict;
        }

        let mut store = self.store.lock().expect("capability store lock poisoned");
        match store.promote(capability.clone()) {
            Ok(PromotionOutcome::Inserted) => {
                info!(capability = %capability.name, "promoted generated program to a capability");
                PromotionResult::Promoted
            }
            Ok(PromotionOutcome::AlreadyPresent) => PromotionResult::AlreadyKnown,
            Err(e) => {
                warn!(error = %e, "promotion failed");
                PromotionResult::RejectedConflict
            }
        }
    }
}

// ─── Template synthesis ──────────────────────────────────────────────────────

/// Synthesize a capability from a successful program run.
///
/// Numbers in the utterance become named capture groups; the same
/// literals in the source become `${n}` placeholders, so the promoted
/// rule serves the whole family of utterances. Number-free utterances
/// promote as an exact-phrase rule.
pub fn generalize(utterance: &str, source: &str) -> Option<Capability> {
    let utterance = utterance.trim();
    if utterance.is_empty() || source.trim().is_empty() {
        return None;
    }

    let number_re = Regex::new(r"\d+(?:\.\d+)?").ok()?;
    let numbers: Vec<String> = {
        let mut seen = Vec::new();
        for m in number_re.find_iter(utterance) {
            if !seen.contains(&m.as_str().to_string()) {
                seen.push(m.as_str().to_string());
            }
        }
        seen
    };

    let mut pattern = format!("(?i)^{}$", regex::escape(utterance));
    let mut template_source = source.to_string();
    for (index, number) in numbers.iter().enumerate() {
        let group = format!("n{}", index + 1);
        pattern = pattern.replace(
            &regex::escape(number),
            &format!(r"(?P<{group}>\d+(?:\.\d+)?)"),
        );
        template_source = template_source.replace(number.as_str(), &format!("${{{group}}}"));
    }

    let mut args_template = Map::new();
    args_template.insert("source".into(), Value::String(template_source));

    Some(Capability {
        name: slugify(utterance),
        triggers: vec![Trigger::Pattern(pattern)],
        tool_name: "run_program".into(),
        args_template,
        source: CapabilitySource::Promoted,
        created_at: chrono::Utc::now(),
    })
}

/// Lowercase alphanumeric slug, capped at 40 chars.
fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
        if slug.len() >= 40 {
            break;
        }
    }
    slug.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::config::SandboxConfig;
    use crate::os::HeadlessBoundary;
    use crate::router::IntentRouter;
    use crate::sandbox::CodeSandbox;
    use crate::tools::builtin_registry;

    fn healing(tmp: &TempDir) -> SelfHealing {
        let registry = builtin_registry().unwrap().snapshot();
        let sandbox = Arc::new(CodeSandbox::new(tmp.path(), SandboxConfig::default()).unwrap());
        let executor = Arc::new(ToolExecutor::new(
            registry,
            Arc::new(HeadlessBoundary::new()),
            sandbox,
            Duration::from_secs(30),
        ));
        let store = Arc::new(Mutex::new(CapabilityStore::in_memory()));
        SelfHealing::new(executor, store).with_backoff_base(Duration::from_millis(1))
    }

    // ── generalization ──────────────────────────────────────────────────

    #[test]
    fn numbers_become_capture_groups() {
        let cap = generalize(
            "Calculate the square root of 5293",
            "import math\nprint(math.sqrt(5293))",
        )
        .unwrap();
        let Trigger::Pattern(pattern) = &cap.triggers[0] else {
            panic!("expected a pattern trigger");
        };
        assert!(pattern.contains("(?P<n1>"));
        assert_eq!(
            cap.args_template["source"],
            json!("import math\nprint(math.sqrt(${n1}))")
        );

        // The synthesized pattern matches sibling utterances.
        let re = Regex::new(pattern).unwrap();
        let caps = re.captures("calculate the square root of 77").unwrap();
        assert_eq!(&caps["n1"], "77");
    }

    #[test]
    fn number_free_utterance_promotes_exact() {
        let cap = generalize("show my external ip", "print('unknown')").unwrap();
        let Trigger::Pattern(pattern) = &cap.triggers[0] else {
            panic!("expected a pattern trigger");
        };
        assert!(Regex::new(pattern).unwrap().is_match("Show my external IP"));
    }

    #[test]
    fn empty_inputs_not_generalizable() {
        assert!(generalize("", "print(1)").is_none());
        assert!(generalize("do a thing", "  ").is_none());
    }

    #[test]
    fn slugify_is_bounded_and_clean() {
        assert_eq!(slugify("Calculate the square root of 5293"), "calculate_the_square_root_of_5293");
        assert!(slugify(&"x".repeat(100)).len() <= 40);
    }

    // ── promotion ───────────────────────────────────────────────────────

    #[test]
    fn promotion_round_trips_through_router() {
        let tmp = TempDir::new().unwrap();
        let healing = healing(&tmp);
        let result = healing.promote_program(
            "Calculate the square root of 5293",
            "import math\nprint(math.sqrt(5293))",
        );
        assert_eq!(result, PromotionResult::Promoted);

        let registry = builtin_registry().unwrap().snapshot();
        let capabilities = healing.store.lock().unwrap().snapshot();
        let router = IntentRouter::new(&registry, &capabilities).unwrap();
        let m = router.classify("Calculate the square root of 9");
        assert_eq!(m.tool_name.as_deref(), Some("run_program"));
        assert_eq!(m.args["source"], json!("import math\nprint(math.sqrt(9))"));
    }

    #[test]
    fn repromotion_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let healing = healing(&tmp);
        let first = healing.promote_program("double 21", "print(21 * 2)");
        let second = healing.promote_program("double 21", "print(21 * 2)");
        assert_eq!(first, PromotionResult::Promoted);
        assert_eq!(second, PromotionResult::AlreadyKnown);
        assert_eq!(healing.store.lock().unwrap().len(), 1);
    }

    #[test]
    fn promoted_exact_phrase_never_shadows_builtin() {
        let tmp = TempDir::new().unwrap();
        let healing = healing(&tmp);
        // An exact-phrase rule for "mute" appends after the builtin table,
        // so the builtin mute rule still wins classification.
        let result = healing.promote_program("mute", "print('muted')");
        assert_eq!(result, PromotionResult::Promoted);
        let registry = builtin_registry().unwrap().snapshot();
        let capabilities = healing.store.lock().unwrap().snapshot();
        let router = IntentRouter::new(&registry, &capabilities).unwrap();
        assert_eq!(router.classify("mute").tool_name.as_deref(), Some("audio.mute"));
    }

    // ── retry matrix ────────────────────────────────────────────────────

    #[tokio::test]
    async fn non_transient_failure_not_retried() {
        let tmp = TempDir::new().unwrap();
        let healing = healing(&tmp);
        let result = healing
            .execute_with_recovery("audio.set_volume", &Map::new(), &ExecutionPolicy::default())
            .await;
        assert!(!result.ok);
        assert_eq!(result.retries_used, 0);
        assert!(matches!(result.error, Some(ErrorKind::BadArgs(_))));
    }

    #[tokio::test]
    async fn unknown_tool_not_retried() {
        let tmp = TempDir::new().unwrap();
        let healing = healing(&tmp);
        let result = healing
            .execute_with_recovery("no.such_tool", &Map::new(), &ExecutionPolicy::default())
            .await;
        assert_eq!(result.retries_used, 0);
        assert!(matches!(result.error, Some(ErrorKind::UnknownTool(_))));
    }

    #[test]
    fn llm_retry_matrix() {
        assert!(SelfHealing::llm_retry_eligible(
            &ErrorKind::LlmNetwork("reset".into()),
            0
        ));
        assert!(SelfHealing::llm_retry_eligible(
            &ErrorKind::LlmRateLimit("429".into()),
            0
        ));
        assert!(!SelfHealing::llm_retry_eligible(
            &ErrorKind::LlmNetwork("reset".into()),
            1
        ));
        assert!(!SelfHealing::llm_retry_eligible(&ErrorKind::LlmAuth("bad".into()), 0));
        assert!(!SelfHealing::llm_retry_eligible(&ErrorKind::NoCredentials, 0));
    }
}
