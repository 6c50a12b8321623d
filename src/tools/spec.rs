//! Typed tool specifications.
//!
//! A [`ToolSpec`] binds a globally-unique name to an argument schema, a
//! risk level, required host capabilities, and a variant-tagged handler
//! identifier. Handlers are resolved at registration, never per-call.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::os::{OsCapability, OsOp};

// ─── RiskLevel ───────────────────────────────────────────────────────────────

/// Risk tier controlling confirmation requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    /// Execution requires an explicit confirmation flag in the policy.
    Confirm,
}

// ─── Argument schema ─────────────────────────────────────────────────────────

/// Primitive type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    String,
    Integer,
    Float,
    Boolean,
}

/// Constraint applied after type coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgConstraint {
    /// Inclusive numeric range.
    Range { min: f64, max: f64 },
    /// Closed set of accepted string values.
    OneOf(Vec<String>),
}

/// Schema for a single named argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub kind: ArgKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<ArgConstraint>,
    pub description: String,
}

impl ArgSpec {
    pub fn required(kind: ArgKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            required: true,
            default: None,
            constraint: None,
            description: description.into(),
        }
    }

    pub fn optional(kind: ArgKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            constraint: None,
            description: description.into(),
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.constraint = Some(ArgConstraint::Range { min, max });
        self
    }

    pub fn with_one_of(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.constraint = Some(ArgConstraint::OneOf(
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }
}

// ─── HandlerBinding ──────────────────────────────────────────────────────────

/// Variant-tagged handler identifier, resolved at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerBinding {
    /// Dispatch to an [`OsBoundary`](crate::os::OsBoundary) operation.
    Os(OsOp),
    /// Evaluate a stored program in the code sandbox.
    RunProgram,
    /// Install a package into the sandbox environment.
    InstallPackage,
}

// ─── ToolSpec ────────────────────────────────────────────────────────────────

/// Complete description of one invokable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Globally unique dotted name, e.g. `"audio.set_volume"`.
    pub name: String,
    pub description: String,
    pub args: BTreeMap<String, ArgSpec>,
    pub risk: RiskLevel,
    /// Host capability tags this tool needs.
    pub requires: BTreeSet<OsCapability>,
    pub handler: HandlerBinding,
    /// Tokens used by the router's keyword phase.
    pub keywords: Vec<String>,
    /// Phrase used by the router's fuzzy phase.
    pub canonical_phrase: String,
    /// Per-tool handler timeout override, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: HandlerBinding,
    ) -> Self {
        let requires = match handler {
            HandlerBinding::Os(op) => BTreeSet::from([op.capability()]),
            _ => BTreeSet::new(),
        };
        Self {
            name: name.into(),
            description: description.into(),
            args: BTreeMap::new(),
            risk: RiskLevel::Low,
            requires,
            handler,
            keywords: Vec::new(),
            canonical_phrase: String::new(),
            timeout_secs: None,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, spec: ArgSpec) -> Self {
        self.args.insert(name.into(), spec);
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_canonical_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.canonical_phrase = phrase.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_binding_derives_capability() {
        let spec = ToolSpec::new("audio.mute", "Mute audio", HandlerBinding::Os(OsOp::AudioMute));
        assert!(spec.requires.contains(&OsCapability::Audio));
    }

    #[test]
    fn sandbox_binding_needs_no_capability() {
        let spec = ToolSpec::new("run_program", "Run a program", HandlerBinding::RunProgram);
        assert!(spec.requires.is_empty());
    }

    #[test]
    fn builder_accumulates() {
        let spec = ToolSpec::new(
            "audio.set_volume",
            "Set volume",
            HandlerBinding::Os(OsOp::AudioSetVolume),
        )
        .with_arg(
            "level",
            ArgSpec::required(ArgKind::Integer, "Volume percent").with_range(0.0, 100.0),
        )
        .with_risk(RiskLevel::Low)
        .with_keywords(["volume", "sound"])
        .with_canonical_phrase("set volume to 50");

        assert_eq!(spec.args.len(), 1);
        assert_eq!(spec.keywords.len(), 2);
        assert!(matches!(
            spec.args["level"].constraint,
            Some(ArgConstraint::Range { .. })
        ));
    }

    #[test]
    fn spec_serde_round_trip() {
        let spec = ToolSpec::new(
            "files.write",
            "Write a file",
            HandlerBinding::Os(OsOp::FilesWrite),
        )
        .with_arg("path", ArgSpec::required(ArgKind::String, "Target path"))
        .with_risk(RiskLevel::Medium);

        let json = serde_json::to_string(&spec).unwrap();
        let back: ToolSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
