//! Layer 1.5 — single-shot program synthesis.
//!
//! When the router cannot place an utterance, this layer asks the LLM for
//! one short program, runs it in the sandbox, and reports the program's
//! output. The LLM is called at most twice per utterance: once to
//! generate, and once to repair after a typed failure. Successful,
//! reusable programs are handed to the self-healing loop for promotion.

use std::sync::Arc;

use serde_json::Map;
use tracing::debug;

use crate::error::ErrorKind;
use crate::llm::{CompletionRequest, LlmClient, Message};
use crate::sandbox::{CodeSandbox, ProgramOutcome};

// ─── GeneratedRun ────────────────────────────────────────────────────────────

/// Outcome of a successful layer-1.5 pass.
#[derive(Debug, Clone)]
pub struct GeneratedRun {
    /// User-facing reply (the program's trimmed stdout).
    pub reply: String,
    /// The program that produced it, kept for promotion.
    pub source: String,
    /// How many LLM calls were spent (1 or 2).
    pub llm_calls: u32,
}

// ─── CodeGenFallback ─────────────────────────────────────────────────────────

/// The code-generation fallback layer.
pub struct CodeGenFallback {
    llm: Arc<dyn LlmClient>,
    sandbox: Arc<CodeSandbox>,
}

impl CodeGenFallback {
    pub fn new(llm: Arc<dyn LlmClient>, sandbox: Arc<CodeSandbox>) -> Self {
        Self { llm, sandbox }
    }

    /// Generate, run, and (if needed) repair one program for `utterance`.
    ///
    /// `tool_summary` is the one-line tool list included in the prompt so
    /// the model prefers printing results over re-implementing tools.
    pub async fn fallback(
        &self,
        utterance: &str,
        tool_summary: &str,
        allowed_imports: &[String],
    ) -> Result<GeneratedRun, ErrorKind> {
        let system = self.system_prompt(tool_summary, allowed_imports);

        let first = self
            .llm
            .complete(
                CompletionRequest::new(vec![
                    Message::system(system.clone()),
                    Message::user(utterance.to_owned()),
                ])
                .with_temperature(0.2)
                .with_max_tokens(800),
            )
            .await?;

        let source = extract_program(&first.text)
            .ok_or_else(|| ErrorKind::LlmBadResponse("no program in response".into()))?;

        let outcome = self.sandbox.run_program(&source, &Map::new()).await;
        if outcome.ok {
            return Ok(GeneratedRun {
                reply: render_reply(&outcome),
                source,
                llm_calls: 1,
            });
        }

        // One repair pass on a typed failure; sandbox violations are not
        // repairable by rephrasing and surface immediately.
        let failure = outcome
            .error
            .as_ref()
            .map(|f| f.to_error_kind())
            .unwrap_or_else(|| ErrorKind::Internal("sandbox failed without detail".into()));
        if matches!(failure, ErrorKind::SandboxViolation(_)) {
            return Err(failure);
        }
        debug!(error = %failure, "first generated program failed; asking for a repair");

        let second = self
            .llm
            .complete(
                CompletionRequest::new(vec![
                    Message::system(system),
                    Message::user(utterance.to_owned()),
                    Message::assistant(first.text.clone()),
                    Message::user(format!(
                        "That program failed: {}\nstderr:\n{}\nReply with a corrected program.",
                        failure, outcome.stderr
                    )),
                ])
                .with_temperature(0.2)
                .with_max_tokens(800),
            )
            .await?;

        let repaired = extract_program(&second.text)
            .ok_or_else(|| ErrorKind::LlmBadResponse("no program in repair response".into()))?;

        let outcome = self.sandbox.run_program(&repaired, &Map::new()).await;
        if outcome.ok {
            Ok(GeneratedRun {
                reply: render_reply(&outcome),
                source: repaired,
                llm_calls: 2,
            })
        } else {
            Err(outcome
                .error
                .map(|f| f.to_error_kind())
                .unwrap_or_else(|| ErrorKind::Internal("sandbox failed without detail".into())))
        }
    }

    fn system_prompt(&self, tool_summary: &str, allowed_imports: &[String]) -> String {
        format!(
            "You write one short Python program that fulfils the user's request \
             and prints the answer to stdout.\n\
             Rules:\n\
             - Reply with a single ```python code block and nothing else.\n\
             - Only these imports are allowed: {}.\n\
             - No network, no file access, no subprocesses.\n\
             - Keep it under 30 lines.\n\
             {tool_summary}\n\
             If the request is better served by one of those tools, still \
             answer with a program that computes and prints the result.",
            allowed_imports.join(", "),
        )
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Pull the program out of an LLM reply.
///
/// Prefers a fenced ```python block, then any fenced block, then — for
/// models that skip fences — the raw text when it looks like code.
pub fn extract_program(text: &str) -> Option<String> {
    for fence in ["```python", "```py", "```"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            let body = body.strip_prefix('\n').unwrap_or(body);
            if let Some(end) = body.find("```") {
                let program = body[..end].trim();
                if !program.is_empty() {
                    return Some(program.to_string());
                }
            }
        }
    }
    let trimmed = text.trim();
    if trimmed.contains("print(") || trimmed.starts_with("import ") {
        return Some(trimmed.to_string());
    }
    None
}

fn render_reply(outcome: &ProgramOutcome) -> String {
    let stdout = outcome.stdout.trim();
    if stdout.is_empty() {
        "Done.".to_string()
    } else {
        stdout.to_string()
    }
}
