pub mod capability;
pub mod codegen;
pub mod config;
pub mod error;
pub mod executor;
pub mod healing;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod os;
pub mod planner;
pub mod router;
pub mod sandbox;
pub mod session;
pub mod tools;

/// Convenience re-exports for the most commonly used traits and types.
///
/// ```rust
/// use aura::prelude::*;
/// ```
pub mod prelude {
    // Orchestration
    pub use crate::orchestrator::{Orchestrator, Response, SourceLayer};

    // Routing
    pub use crate::router::{CONFIDENCE_HIGH, CONFIDENCE_LOW, IntentMatch, IntentRouter, MatchReason};

    // Tool system
    pub use crate::executor::{ExecutionPolicy, InvocationResult, ToolExecutor};
    pub use crate::tools::{RiskLevel, ToolRegistry, ToolSpec, builtin_registry};

    // OS boundary
    pub use crate::os::{HeadlessBoundary, HostBoundary, OsBoundary, OsCapability};

    // Sandbox
    pub use crate::sandbox::{CodeSandbox, ProgramOutcome};

    // LLM adapter
    pub use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, Message};

    // Session
    pub use crate::session::{CancelFlag, SessionContext, SessionStats, Utterance, UtteranceSource};

    // Errors
    pub use crate::error::ErrorKind;

    // Configuration
    pub use crate::config::{AppConfig, load_default_config};
}
