//! OpenAI-compatible HTTP adapter.
//!
//! Works against any `/chat/completions` endpoint (OpenAI, OpenRouter,
//! Gemini's OpenAI surface, local runtimes). Non-streaming: the core
//! consumes whole completions only.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::ErrorKind;

use super::types::{
    CompletionRequest, CompletionResponse, Message, ResponseFormat, TokenUsage,
};
use super::LlmClient;

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ApiResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ─── OpenAiCompatibleClient ──────────────────────────────────────────────────

/// HTTP client for an OpenAI-compatible endpoint.
#[derive(Debug)]
pub struct OpenAiCompatibleClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ErrorKind> {
        if !config.has_credentials() {
            return Err(ErrorKind::NoCredentials);
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ErrorKind::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
        })
    }

    fn to_wire<'a>(&'a self, request: &'a CompletionRequest) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            messages: request
                .messages
                .iter()
                .map(|m: &Message| ApiMessage {
                    role: match m.role {
                        super::MessageRole::System => "system",
                        super::MessageRole::User => "user",
                        super::MessageRole::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: match request.format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(ApiResponseFormat {
                    kind: "json_object",
                }),
            },
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ErrorKind> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.to_wire(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ErrorKind::LlmNetwork(format!("request timed out: {e}"))
                } else {
                    ErrorKind::LlmNetwork(e.to_string())
                }
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ErrorKind::LlmAuth(format!(
                    "provider rejected credentials ({})",
                    response.status()
                )));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(ErrorKind::LlmRateLimit("provider rate limit hit".into()));
            }
            status if status.is_server_error() => {
                return Err(ErrorKind::LlmNetwork(format!("provider error {status}")));
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(ErrorKind::LlmBadResponse(format!("{status}: {body}")));
            }
            _ => {}
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ErrorKind::LlmBadResponse(format!("malformed response body: {e}")))?;

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ErrorKind::LlmBadResponse("response carried no content".into()))?;

        Ok(CompletionResponse {
            text,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }
}
