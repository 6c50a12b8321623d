//! Configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `~/.aura/config.toml` (or the path in `AURA_CONFIG`)
//! 2. Apply environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing
//!
//! # Environment surface
//! - `LLM_API_KEY`      → `llm.api_key`
//! - `ASSISTANT_NAME`   → `assistant.name`
//! - `WAKE_WORD`        → `assistant.wake_word`
//! - `USER_NAME`        → `assistant.user_name`
//! - `AURA_DATA_DIR`    → `data_dir`
//!
//! # Atomic save
//! Writes to `<path>.tmp` then renames to `<path>` so a crash never
//! leaves a half-written config behind.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use super::schema::AppConfig;
use crate::error::ErrorKind;

// ─── default_config_path ─────────────────────────────────────────────────────

/// Return the default config file path: `~/.aura/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ErrorKind> {
    dirs::home_dir()
        .map(|h| h.join(".aura").join("config.toml"))
        .ok_or_else(|| ErrorKind::Internal("could not determine home directory".into()))
}

// ─── load_config ─────────────────────────────────────────────────────────────

/// Load [`AppConfig`] from the given path, falling back to defaults if the
/// file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, ErrorKind> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| ErrorKind::Internal(format!("failed to parse config at {path:?}: {e}")))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            return Err(ErrorKind::Internal(format!(
                "failed to read config at {path:?}: {e}"
            )));
        }
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path (or `AURA_CONFIG`).
pub fn load_default_config() -> AppConfig {
    let path = env::var("AURA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"))
        });

    load_config(&path).unwrap_or_default()
}

// ─── apply_env_overrides ─────────────────────────────────────────────────────

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("LLM_API_KEY") {
        config.llm.api_key = v;
    }
    if let Ok(v) = env::var("ASSISTANT_NAME") {
        config.assistant.name = v;
    }
    if let Ok(v) = env::var("WAKE_WORD") {
        config.assistant.wake_word = v;
    }
    if let Ok(v) = env::var("USER_NAME") {
        config.assistant.user_name = v;
    }
    if let Ok(v) = env::var("AURA_DATA_DIR") {
        config.data_dir = Some(PathBuf::from(v));
    }
}

// ─── save_config ─────────────────────────────────────────────────────────────

/// Atomically persist `config` to `path`, creating parent directories.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ErrorKind> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| ErrorKind::Internal(format!("failed to serialize config: {e}")))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ErrorKind::Internal(format!("failed to create config dir: {e}")))?;
    }

    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, content)
        .map_err(|e| ErrorKind::Internal(format!("failed to write {tmp:?}: {e}")))?;
    fs::rename(&tmp, path)
        .map_err(|e| ErrorKind::Internal(format!("failed to rename {tmp:?}: {e}")))?;
    Ok(())
}
