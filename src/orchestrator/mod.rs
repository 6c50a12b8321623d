//! The hybrid orchestrator — the single decision maker.
//!
//! Exactly one layer handles each utterance:
//!
//! ```text
//! classify(utterance)
//!   conversation marker      → conversation (LLM chat, no execution)
//!   confidence ≥ 0.85 + tool → layer 1   (executor, via self-healing)
//!   confidence ≥ 0.50        → layer 1.5 or 2 per the escalation policy
//!   otherwise                → layer 1.5 (free-form code generation)
//! ```
//!
//! Escalation tie-breaks: multi-step markers prefer layer 2; two layer-1.5
//! failures for the same utterance within the session also move it to
//! layer 2. Layers never delegate laterally — every decision is made
//! here, and every layer resolves to the same [`Response`] shape.

pub mod response;

use std::{
    sync::{Arc, Mutex, RwLock},
    time::Instant,
};

use tracing::{debug, info};

use crate::capability::CapabilityStore;
use crate::codegen::CodeGenFallback;
use crate::config::AppConfig;
use crate::error::ErrorKind;
use crate::executor::{ExecutionPolicy, ToolExecutor};
use crate::healing::{PromotionResult, SelfHealing};
use crate::llm::{CompletionRequest, LlmClient, Message};
use crate::logging::{UtteranceLog, UtteranceRecord};
use crate::planner::{Planner, needs_plan};
use crate::router::{CONFIDENCE_HIGH, CONFIDENCE_LOW, IntentRouter, MatchReason};
use crate::session::{CancelFlag, SessionContext, Utterance};
use crate::tools::{RegistrySnapshot, summary_line};

pub use response::{Response, SourceLayer, render_failure, render_plan_report, render_success};

/// Phrases that confirm a pending confirm-risk action.
const CONFIRMATION_PHRASES: &[&str] = &["confirm", "yes", "do it", "go ahead", "proceed"];

// ─── Orchestrator ────────────────────────────────────────────────────────────

/// Owns the per-process wiring of router, executor, layers, and stores.
pub struct Orchestrator {
    registry: RegistrySnapshot,
    router: RwLock<Arc<IntentRouter>>,
    executor: Arc<ToolExecutor>,
    healing: SelfHealing,
    store: Arc<Mutex<CapabilityStore>>,
    llm: Option<Arc<dyn LlmClient>>,
    codegen: Option<CodeGenFallback>,
    planner: Option<Planner>,
    allowed_imports: Vec<String>,
    log: Option<UtteranceLog>,
}

impl Orchestrator {
    /// Wire the orchestrator from its parts. `llm = None` makes the LLM
    /// layers answer with `NoCredentials`.
    pub fn new(
        config: &AppConfig,
        registry: RegistrySnapshot,
        executor: Arc<ToolExecutor>,
        store: Arc<Mutex<CapabilityStore>>,
        llm: Option<Arc<dyn LlmClient>>,
        sandbox: Arc<crate::sandbox::CodeSandbox>,
    ) -> Result<Self, ErrorKind> {
        let capabilities = store.lock().expect("capability store lock poisoned").snapshot();
        let router = IntentRouter::new(&registry, &capabilities)?;
        let healing = SelfHealing::new(executor.clone(), store.clone());

        let codegen = llm
            .as_ref()
            .map(|llm| CodeGenFallback::new(llm.clone(), sandbox));
        let planner = llm
            .as_ref()
            .map(|llm| Planner::new(llm.clone(), executor.clone()));

        Ok(Self {
            registry,
            router: RwLock::new(Arc::new(router)),
            executor,
            healing,
            store,
            llm,
            codegen,
            planner,
            allowed_imports: config.sandbox.allowed_imports.clone(),
            log: None,
        })
    }

    /// Attach the append-only utterance log.
    pub fn with_utterance_log(mut self, log: UtteranceLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// Process one utterance end to end.
    pub async fn process(
        &self,
        utterance: &Utterance,
        session: &mut SessionContext,
        cancel: &CancelFlag,
    ) -> Response {
        let started = Instant::now();
        session.push_utterance(&utterance.text);

        let (response, tool, layer) = self.dispatch(utterance, session, cancel).await;

        // Single writer: stats and last_result update here only.
        if response.used_llm {
            session.stats.record_llm();
        } else if response.ok {
            session.stats.record_local();
        }
        session.last_result = Some(response.clone());

        if let Some(log) = &self.log {
            log.append(&UtteranceRecord {
                id: utterance.id,
                utterance: utterance.text.clone(),
                layer: layer.tag().to_string(),
                tool,
                ok: response.ok,
                elapsed_ms: started.elapsed().as_millis() as u64,
                error: if response.ok {
                    None
                } else {
                    Some(response.text.clone())
                },
            });
        }

        response
    }

    /// Pick exactly one layer and run it.
    async fn dispatch(
        &self,
        utterance: &Utterance,
        session: &mut SessionContext,
        cancel: &CancelFlag,
    ) -> (Response, Option<String>, SourceLayer) {
        let text = utterance.text.trim();

        if cancel.is_cancelled() {
            return (
                Response {
                    text: "Cancelled; partial progress kept.".into(),
                    ok: false,
                    used_llm: false,
                    source_layer: SourceLayer::Fast,
                },
                None,
                SourceLayer::Fast,
            );
        }

        // A pending confirm-risk action re-runs when the user agrees.
        if let Some((tool, args)) = session.pending_confirmation.take() {
            if is_confirmation(text) {
                let result = self
                    .healing
                    .execute_with_recovery(&tool, &args, &ExecutionPolicy::confirmed())
                    .await;
                let response = if result.ok {
                    Response::success(render_success(&tool, &args, &result), false, SourceLayer::Fast)
                } else {
                    Response::failure(
                        result.error.as_ref().unwrap_or(&ErrorKind::Internal("unknown".into())),
                        false,
                        SourceLayer::Fast,
                    )
                };
                return (response, Some(tool), SourceLayer::Fast);
            }
            // Any other utterance drops the pending action.
        }

        let router = self.router.read().expect("router lock poisoned").clone();
        let intent = router.classify(text);
        debug!(
            utterance = text,
            reason = ?intent.reason,
            confidence = intent.confidence,
            tool = intent.tool_name.as_deref().unwrap_or("-"),
            "classified"
        );

        // 1. Conversation.
        if intent.reason == MatchReason::Conversation {
            let response = self.run_conversation(text, session).await;
            return (response, None, SourceLayer::Conversation);
        }

        // 2. Layer 1: high confidence and the tool exists.
        if intent.confidence >= CONFIDENCE_HIGH {
            if let Some(tool) = intent
                .tool_name
                .as_ref()
                .filter(|name| self.registry.lookup(name).is_some())
            {
                let response = self.run_fast(tool, &intent.args, session).await;
                return (response, Some(tool.clone()), SourceLayer::Fast);
            }
        }

        // 3. Escalation: layer 2 on multi-step markers or repeated
        //    layer-1.5 failures; layer 1.5 otherwise (also the default
        //    below LOW).
        let escalate_to_plan = (intent.confidence >= CONFIDENCE_LOW || intent.confidence == 0.0)
            && (needs_plan(text) || session.codegen_failures(text) >= 2);

        if escalate_to_plan {
            let response = self.run_plan_layer(text, cancel).await;
            return (response, None, SourceLayer::Plan);
        }

        let response = self.run_codegen(text, session).await;
        (response, None, SourceLayer::CodeGen)
    }

    // ── conversation layer ───────────────────────────────────────────────

    async fn run_conversation(&self, text: &str, session: &SessionContext) -> Response {
        let Some(llm) = &self.llm else {
            return Response::failure(&ErrorKind::NoCredentials, false, SourceLayer::Conversation);
        };

        let mut messages = vec![Message::system(format!(
            "You are {}, a concise local desktop assistant{}. Answer the user directly.",
            session.assistant_name,
            if session.user_name.is_empty() {
                String::new()
            } else {
                format!(" helping {}", session.user_name)
            }
        ))];
        // Snapshot of recent context, oldest first.
        for recent in session.recent() {
            messages.push(Message::user(recent));
        }

        let request = CompletionRequest::new(messages).with_max_tokens(700);
        let mut attempts = 0u32;
        loop {
            match llm.complete(request.clone()).await {
                Ok(reply) => {
                    return Response::success(reply.text, true, SourceLayer::Conversation);
                }
                Err(error) if SelfHealing::llm_retry_eligible(&error, attempts) => {
                    info!(%error, "conversation call failed; retrying once");
                    attempts += 1;
                }
                Err(error) => {
                    return Response::failure(&error, true, SourceLayer::Conversation);
                }
            }
        }
    }

    // ── layer 1 ──────────────────────────────────────────────────────────

    async fn run_fast(
        &self,
        tool: &str,
        args: &serde_json::Map<String, serde_json::Value>,
        session: &mut SessionContext,
    ) -> Response {
        let result = self
            .healing
            .execute_with_recovery(tool, args, &ExecutionPolicy::default())
            .await;

        if result.ok {
            return Response::success(render_success(tool, args, &result), false, SourceLayer::Fast);
        }

        let error = result
            .error
            .unwrap_or_else(|| ErrorKind::Internal("execution failed without detail".into()));
        if matches!(error, ErrorKind::ConfirmationRequired(_)) {
            session.pending_confirmation = Some((tool.to_owned(), args.clone()));
        }
        Response::failure(&error, false, SourceLayer::Fast)
    }

    // ── layer 1.5 ────────────────────────────────────────────────────────

    async fn run_codegen(&self, text: &str, session: &mut SessionContext) -> Response {
        let Some(codegen) = &self.codegen else {
            return Response::failure(&ErrorKind::NoCredentials, false, SourceLayer::CodeGen);
        };

        let tool_summary = summary_line(&self.registry);
        let mut attempts = 0u32;
        let run = loop {
            match codegen
                .fallback(text, &tool_summary, &self.allowed_imports)
                .await
            {
                Ok(run) => break run,
                Err(error) if SelfHealing::llm_retry_eligible(&error, attempts) => {
                    info!(%error, "code generation failed; retrying once");
                    attempts += 1;
                }
                Err(error) => {
                    session.record_codegen_failure(text);
                    return Response::failure(&error, true, SourceLayer::CodeGen);
                }
            }
        };

        // Successful reusable programs are proposed for promotion; the
        // router is rebuilt so the next matching utterance stays local.
        if self.healing.promote_program(text, &run.source) == PromotionResult::Promoted {
            if let Err(error) = self.rebuild_router() {
                info!(%error, "router rebuild after promotion failed");
            }
        }

        Response::success(run.reply, true, SourceLayer::CodeGen)
    }

    // ── layer 2 ──────────────────────────────────────────────────────────

    async fn run_plan_layer(&self, text: &str, cancel: &CancelFlag) -> Response {
        let Some(planner) = &self.planner else {
            return Response::failure(&ErrorKind::NoCredentials, false, SourceLayer::Plan);
        };

        let mut attempts = 0u32;
        loop {
            match planner
                .plan_and_run(text, &ExecutionPolicy::default(), cancel)
                .await
            {
                Ok((_plan, report)) => {
                    let ok = report.completed;
                    return Response {
                        text: render_plan_report(&report),
                        ok,
                        used_llm: true,
                        source_layer: SourceLayer::Plan,
                    };
                }
                Err(error) if SelfHealing::llm_retry_eligible(&error, attempts) => {
                    info!(%error, "planning failed; retrying once");
                    attempts += 1;
                }
                Err(error) => {
                    return Response::failure(&error, true, SourceLayer::Plan);
                }
            }
        }
    }

    // ── router rebuild ───────────────────────────────────────────────────

    /// Recompile the router with the current capability snapshot.
    fn rebuild_router(&self) -> Result<(), ErrorKind> {
        let capabilities = self
            .store
            .lock()
            .expect("capability store lock poisoned")
            .snapshot();
        let rebuilt = IntentRouter::new(&self.registry, &capabilities)?;
        *self.router.write().expect("router lock poisoned") = Arc::new(rebuilt);
        Ok(())
    }
}

/// Does this utterance confirm a pending action?
fn is_confirmation(text: &str) -> bool {
    let lowered = text.trim().trim_end_matches(['.', '!']).to_ascii_lowercase();
    CONFIRMATION_PHRASES.contains(&lowered.as_str())
}
