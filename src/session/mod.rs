//! Per-utterance context and per-process stats.
//!
//! [`SessionContext`] has a single writer (the orchestrator); every other
//! component reads a snapshot. Recent utterances live in a fixed-size
//! ring buffer so the conversation context handed to the LLM is bounded.

use std::{
    collections::VecDeque,
    fs,
    path::Path,
    sync::Arc,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::orchestrator::Response;

/// Number of recent utterances retained for conversation context.
pub const RECENT_CAPACITY: usize = 20;

static NEXT_UTTERANCE_ID: AtomicU64 = AtomicU64::new(1);

// ─── Utterance ───────────────────────────────────────────────────────────────

/// Where an utterance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceSource {
    Voice,
    #[default]
    Text,
}

/// One user utterance. Immutable once created; ids increase monotonically
/// for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub source: UtteranceSource,
}

impl Utterance {
    pub fn new(text: impl Into<String>, source: UtteranceSource) -> Self {
        Self {
            id: NEXT_UTTERANCE_ID.fetch_add(1, Ordering::Relaxed),
            text: text.into(),
            source,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text, UtteranceSource::Text)
    }
}

// ─── CancelFlag ──────────────────────────────────────────────────────────────

/// Cancellation token carried by each utterance.
///
/// Checked at layer boundaries: a running plan aborts before its next
/// step, and in-flight LLM or sandbox futures are dropped (killing the
/// sandbox child). Side effects already committed are not rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ─── SessionStats ────────────────────────────────────────────────────────────

/// Running counters, persisted as `stats.json` under the data dir.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStats {
    /// Utterances resolved without any LLM call.
    pub local_commands: u64,
    /// Utterances that required at least one LLM call.
    pub llm_commands: u64,
    /// Rough estimate of tokens avoided by local handling.
    pub tokens_saved_estimate: u64,
}

/// Tokens assumed saved per locally-handled utterance.
const TOKENS_PER_LOCAL_COMMAND: u64 = 350;

impl SessionStats {
    pub fn record_local(&mut self) {
        self.local_commands += 1;
        self.tokens_saved_estimate += TOKENS_PER_LOCAL_COMMAND;
    }

    pub fn record_llm(&mut self) {
        self.llm_commands += 1;
    }

    /// Load counters from `path`, returning defaults when absent.
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Persist counters to `path` (tmp + rename).
    pub fn save(&self, path: &Path) -> Result<(), ErrorKind> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ErrorKind::Internal(format!("failed to serialize stats: {e}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ErrorKind::Internal(format!("failed to create stats dir: {e}")))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .map_err(|e| ErrorKind::Internal(format!("failed to write {tmp:?}: {e}")))?;
        fs::rename(&tmp, path)
            .map_err(|e| ErrorKind::Internal(format!("failed to rename {tmp:?}: {e}")))?;
        Ok(())
    }
}

// ─── SessionContext ──────────────────────────────────────────────────────────

/// Process-wide session state threaded through orchestrator calls.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_name: String,
    pub assistant_name: String,
    recent: VecDeque<String>,
    pub last_result: Option<Response>,
    pub stats: SessionStats,
    /// Layer 1.5 failure counts per utterance text, used by the
    /// orchestrator's escalation policy.
    codegen_failures: Vec<(String, u32)>,
    /// A confirm-risk invocation awaiting the user's go-ahead.
    pub pending_confirmation: Option<(String, serde_json::Map<String, serde_json::Value>)>,
}

impl SessionContext {
    pub fn new(user_name: impl Into<String>, assistant_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            assistant_name: assistant_name.into(),
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
            last_result: None,
            stats: SessionStats::default(),
            codegen_failures: Vec::new(),
            pending_confirmation: None,
        }
    }

    /// Append an utterance text, evicting the oldest past capacity.
    pub fn push_utterance(&mut self, text: &str) {
        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(text.to_owned());
    }

    /// Snapshot of recent utterance texts, oldest first.
    pub fn recent(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }

    /// Record a Layer 1.5 failure for this utterance text and return the
    /// running count.
    pub fn record_codegen_failure(&mut self, text: &str) -> u32 {
        if let Some(entry) = self.codegen_failures.iter_mut().find(|(t, _)| t == text) {
            entry.1 += 1;
            return entry.1;
        }
        self.codegen_failures.push((text.to_owned(), 1));
        1
    }

    /// How many times Layer 1.5 has failed for this utterance text.
    pub fn codegen_failures(&self, text: &str) -> u32 {
        self.codegen_failures
            .iter()
            .find(|(t, _)| t == text)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}
