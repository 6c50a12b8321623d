//! Promotable routing rules and their persisted store.
//!
//! A capability lets the router reach a tool without the LLM. Promoted
//! records persist as `capabilities.json` (a JSON array) under the data
//! dir and are appended after builtin rules at router construction so
//! builtin precedence is preserved.
//!
//! The store has exactly one runtime writer — the self-healing loop's
//! promotion path. Every other component reads a snapshot.

use std::{fs, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ErrorKind;

// ─── Trigger ─────────────────────────────────────────────────────────────────

/// What fires a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Regex with named capture groups feeding the args template.
    Pattern(String),
    /// Literal token that must appear in the utterance.
    Keyword(String),
}

// ─── Capability ──────────────────────────────────────────────────────────────

/// Origin of a capability record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySource {
    Builtin,
    Promoted,
}

/// A named, promotable routing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub triggers: Vec<Trigger>,
    pub tool_name: String,
    /// Argument template; string values may hold `${group}` placeholders
    /// filled from a pattern trigger's named captures.
    pub args_template: Map<String, Value>,
    pub source: CapabilitySource,
    pub created_at: DateTime<Utc>,
}

impl Capability {
    /// Two records promote identically when everything but the creation
    /// timestamp matches.
    pub fn same_rule(&self, other: &Capability) -> bool {
        self.name == other.name
            && self.triggers == other.triggers
            && self.tool_name == other.tool_name
            && self.args_template == other.args_template
    }
}

// ─── PromotionOutcome ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// Appended and persisted.
    Inserted,
    /// An identical rule already exists; the store is unchanged.
    AlreadyPresent,
}

// ─── CapabilityStore ─────────────────────────────────────────────────────────

/// Persisted set of promoted capabilities.
#[derive(Debug)]
pub struct CapabilityStore {
    path: PathBuf,
    capabilities: Vec<Capability>,
}

impl CapabilityStore {
    /// Load the store from `<data_dir>/capabilities.json`.
    ///
    /// Records whose triggers conflict with builtin rules (per
    /// `is_conflict`) fail the load loudly: a store that shadows builtins
    /// is a configuration error, not something to silently drop.
    pub fn load(
        data_dir: &std::path::Path,
        is_conflict: impl Fn(&Capability) -> bool,
    ) -> Result<Self, ErrorKind> {
        let path = data_dir.join("capabilities.json");
        let capabilities: Vec<Capability> = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ErrorKind::Internal(format!("failed to parse {path:?}: {e}"))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(ErrorKind::Internal(format!("failed to read {path:?}: {e}")));
            }
        };

        if let Some(conflicting) = capabilities.iter().find(|c| is_conflict(c)) {
            return Err(ErrorKind::Internal(format!(
                "capability '{}' shadows a builtin router rule",
                conflicting.name
            )));
        }

        Ok(Self { path, capabilities })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Immutable snapshot for the router.
    pub fn snapshot(&self) -> Arc<Vec<Capability>> {
        Arc::new(self.capabilities.clone())
    }

    /// Append a promoted capability and persist. Idempotent: re-promoting
    /// an identical rule is a no-op.
    pub fn promote(&mut self, capability: Capability) -> Result<PromotionOutcome, ErrorKind> {
        if self.capabilities.iter().any(|c| c.same_rule(&capability)) {
            return Ok(PromotionOutcome::AlreadyPresent);
        }
        if let Some(existing) = self
            .capabilities
            .iter()
            .find(|c| c.name == capability.name)
        {
            warn!(name = %existing.name, "capability name reused with a different rule");
            return Err(ErrorKind::Internal(format!(
                "capability name '{}' already bound to a different rule",
                existing.name
            )));
        }
        self.capabilities.push(capability);
        self.persist()?;
        Ok(PromotionOutcome::Inserted)
    }

    fn persist(&self) -> Result<(), ErrorKind> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let content = serde_json::to_string_pretty(&self.capabilities)
            .map_err(|e| ErrorKind::Internal(format!("failed to serialize store: {e}")))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ErrorKind::Internal(format!("failed to create store dir: {e}")))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .map_err(|e| ErrorKind::Internal(format!("failed to write {tmp:?}: {e}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| ErrorKind::Internal(format!("failed to rename {tmp:?}: {e}")))?;
        Ok(())
    }
}
