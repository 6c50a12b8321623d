//! LLM adapter contract.
//!
//! The core consumes exactly one operation: [`LlmClient::complete`].
//! Failures are categorized into the four `Llm*` kinds of the error
//! taxonomy so the self-healing loop can tell transient network trouble
//! from a bad key or an unusable reply.

pub mod openai;
pub mod types;

use async_trait::async_trait;

use crate::error::ErrorKind;

pub use openai::OpenAiCompatibleClient;
pub use types::{CompletionRequest, CompletionResponse, Message, MessageRole, ResponseFormat, TokenUsage};

/// Abstract LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a conversation and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ErrorKind>;

    /// Provider name for logging.
    fn provider_name(&self) -> &str;
}
