//! Error taxonomy shared across the assistant core.
//!
//! Every failure that crosses a component boundary is one of these kinds.
//! Handlers and the sandbox return them unaltered; only the orchestrator
//! translates a kind into either a self-healing retry or a user-visible
//! response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure kinds produced by the routing and execution core.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    BadArgs(String),

    #[error("operation not supported on this host: {0}")]
    Unsupported(String),

    #[error("confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error("resource unavailable: {0}")]
    Unavailable(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("LLM network error: {0}")]
    LlmNetwork(String),

    #[error("LLM rate limit: {0}")]
    LlmRateLimit(String),

    #[error("LLM authentication failed: {0}")]
    LlmAuth(String),

    #[error("LLM returned an unusable response: {0}")]
    LlmBadResponse(String),

    #[error("no LLM credentials configured")]
    NoCredentials,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Transient kinds are eligible for a self-healing retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout(_)
                | ErrorKind::Unavailable(_)
                | ErrorKind::LlmNetwork(_)
                | ErrorKind::LlmRateLimit(_)
        )
    }

    /// Short machine tag used in the utterance log.
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorKind::UnknownTool(_) => "unknown_tool",
            ErrorKind::BadArgs(_) => "bad_args",
            ErrorKind::Unsupported(_) => "unsupported",
            ErrorKind::ConfirmationRequired(_) => "confirmation_required",
            ErrorKind::Timeout(_) => "timeout",
            ErrorKind::Unavailable(_) => "unavailable",
            ErrorKind::MissingDependency(_) => "missing_dependency",
            ErrorKind::SandboxViolation(_) => "sandbox_violation",
            ErrorKind::LlmNetwork(_) => "llm_network",
            ErrorKind::LlmRateLimit(_) => "llm_rate_limit",
            ErrorKind::LlmAuth(_) => "llm_auth",
            ErrorKind::LlmBadResponse(_) => "llm_bad_response",
            ErrorKind::NoCredentials => "no_credentials",
            ErrorKind::Internal(_) => "internal",
        }
    }
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, ErrorKind>;
