//! TOML configuration schema.
//!
//! All sections carry `#[serde(default)]` so a partially-filled
//! `config.toml` works; missing sections fall back to their `Default`
//! impl. Environment variables override the file (see `loader`).
//!
//! Example `~/.aura/config.toml`:
//! ```toml
//! [assistant]
//! name = "AURA"
//! user_name = "Sam"
//!
//! [llm]
//! base_url = "https://openrouter.ai/api/v1"
//! model = "openai/gpt-4o-mini"
//!
//! [executor]
//! default_timeout_secs = 30
//!
//! [sandbox]
//! timeout_secs = 10
//! memory_limit_mb = 256
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─── AssistantConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    /// Display name used in response templates.
    pub name: String,
    /// Wake word consumed by the external wake detector.
    pub wake_word: String,
    /// Name of the user, used in response templates.
    pub user_name: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "AURA".to_owned(),
            wake_word: "aura".to_owned(),
            user_name: String::new(),
        }
    }
}

// ─── LlmConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// API key. Usually supplied via `LLM_API_KEY` rather than the file.
    pub api_key: String,
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,
    /// Model identifier (e.g. `"openai/gpt-4o-mini"`).
    pub model: String,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    /// True when a usable API key is present.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://openrouter.ai/api/v1".to_owned(),
            model: "openai/gpt-4o-mini".to_owned(),
            request_timeout_secs: 60,
        }
    }
}

// ─── ExecutorConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-call handler timeout in seconds, unless a tool overrides it.
    pub default_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
        }
    }
}

// ─── SandboxConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit for one program run, in seconds.
    pub timeout_secs: u64,
    /// Peak address-space cap for the interpreter, in megabytes.
    pub memory_limit_mb: u64,
    /// Interpreter binary used to evaluate synthesized programs.
    pub interpreter: String,
    /// Import allowlist; modules outside this set are a violation.
    pub allowed_imports: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            memory_limit_mb: 256,
            interpreter: "python3".to_owned(),
            allowed_imports: vec![
                "math".to_owned(),
                "json".to_owned(),
                "re".to_owned(),
                "datetime".to_owned(),
                "random".to_owned(),
                "statistics".to_owned(),
                "itertools".to_owned(),
                "functools".to_owned(),
                "collections".to_owned(),
                "string".to_owned(),
                "textwrap".to_owned(),
                "unicodedata".to_owned(),
                "decimal".to_owned(),
                "fractions".to_owned(),
                "resource".to_owned(),
            ],
        }
    }
}

// ─── AppConfig ───────────────────────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub assistant: AssistantConfig,
    pub llm: LlmConfig,
    pub executor: ExecutorConfig,
    pub sandbox: SandboxConfig,
    /// Directory for the capability store, stats, and logs.
    /// `None` resolves to the per-user app-data directory.
    pub data_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Resolve the effective data directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("aura")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.assistant.name, "AURA");
        assert_eq!(cfg.executor.default_timeout_secs, 30);
        assert_eq!(cfg.sandbox.timeout_secs, 10);
        assert!(!cfg.llm.has_credentials());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [assistant]
            name = "Jarvis"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.assistant.name, "Jarvis");
        assert_eq!(cfg.sandbox.interpreter, "python3");
    }

    #[test]
    fn empty_toml_is_default() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn credentials_detected() {
        let mut cfg = AppConfig::default();
        cfg.llm.api_key = "sk-123".into();
        assert!(cfg.llm.has_credentials());
    }
}
