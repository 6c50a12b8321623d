//! Central catalog of registered tools.
//!
//! Registration happens at process start and, later, only through
//! capability promotion. Duplicate names are a configuration error and
//! fail loudly. The registry also owns argument coercion and validation:
//! no handler ever runs with arguments that have not passed the schema.

use std::{collections::HashMap, sync::Arc};

use serde_json::{Map, Value};

use crate::error::ErrorKind;

use super::spec::{ArgConstraint, ArgKind, ToolSpec};

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Catalog of named tools, iterable in registration order.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolSpec>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. A duplicate name is a configuration error.
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), ErrorKind> {
        if self.tools.contains_key(&spec.name) {
            return Err(ErrorKind::Internal(format!(
                "duplicate tool name '{}' at registration",
                spec.name
            )));
        }
        self.order.push(spec.name.clone());
        self.tools.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).cloned()
    }

    /// Iterate over tools in registration order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<ToolSpec>> + '_ {
        self.order.iter().filter_map(|name| self.tools.get(name).cloned())
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Immutable view shared with the router and executor.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            tools: Arc::new(self.iter().collect()),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RegistrySnapshot ────────────────────────────────────────────────────────

/// Cheap-to-clone immutable registry view. Classification and execution
/// against one snapshot are consistent for the duration of an utterance.
#[derive(Clone)]
pub struct RegistrySnapshot {
    tools: Arc<Vec<Arc<ToolSpec>>>,
}

impl RegistrySnapshot {
    pub fn lookup(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.iter().find(|t| t.name == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolSpec>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─── Argument validation ─────────────────────────────────────────────────────

/// Coerce and validate `args` against `spec`, injecting defaults.
///
/// Returns the canonical argument map handed to the handler, or
/// `ErrorKind::BadArgs` describing the first violation.
pub fn validate_args(spec: &ToolSpec, args: &Map<String, Value>) -> Result<Map<String, Value>, ErrorKind> {
    let mut canonical = Map::new();

    for (name, arg_spec) in &spec.args {
        match args.get(name) {
            Some(value) => {
                let coerced = coerce(value, arg_spec.kind).map_err(|reason| {
                    ErrorKind::BadArgs(format!("argument '{name}': {reason}"))
                })?;
                check_constraint(&coerced, arg_spec.constraint.as_ref()).map_err(|reason| {
                    ErrorKind::BadArgs(format!("argument '{name}': {reason}"))
                })?;
                canonical.insert(name.clone(), coerced);
            }
            None => {
                if let Some(default) = &arg_spec.default {
                    canonical.insert(name.clone(), default.clone());
                } else if arg_spec.required {
                    return Err(ErrorKind::BadArgs(format!(
                        "missing required argument '{name}'"
                    )));
                }
            }
        }
    }

    if let Some(unknown) = args.keys().find(|k| !spec.args.contains_key(*k)) {
        return Err(ErrorKind::BadArgs(format!(
            "unknown argument '{unknown}' for tool '{}'",
            spec.name
        )));
    }

    Ok(canonical)
}

/// Coerce a JSON value to the declared kind. Strings are parsed into
/// numbers and booleans so router capture groups can stay textual.
fn coerce(value: &Value, kind: ArgKind) -> Result<Value, String> {
    match kind {
        ArgKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            other => Err(format!("expected string, got {other}")),
        },
        ArgKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => Err(format!("expected integer, got {n}")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|n| Value::Number(n.into()))
                .map_err(|_| format!("expected integer, got '{s}'")),
            other => Err(format!("expected integer, got {other}")),
        },
        ArgKind::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected number, got '{s}'")),
            other => Err(format!("expected number, got {other}")),
        },
        ArgKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got '{s}'")),
            },
            other => Err(format!("expected boolean, got {other}")),
        },
    }
}

fn check_constraint(value: &Value, constraint: Option<&ArgConstraint>) -> Result<(), String> {
    match constraint {
        None => Ok(()),
        Some(ArgConstraint::Range { min, max }) => {
            let n = value
                .as_f64()
                .ok_or_else(|| "range constraint on non-numeric value".to_string())?;
            if n < *min || n > *max {
                Err(format!("value {n} outside range [{min}, {max}]"))
            } else {
                Ok(())
            }
        }
        Some(ArgConstraint::OneOf(values)) => {
            let s = value
                .as_str()
                .ok_or_else(|| "enum constraint on non-string value".to_string())?;
            if values.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(format!("value '{s}' not one of {values:?}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::OsOp;
    use crate::tools::spec::{ArgSpec, HandlerBinding};
    use serde_json::json;

    fn volume_spec() -> ToolSpec {
        ToolSpec::new(
            "audio.set_volume",
            "Set the output volume",
            HandlerBinding::Os(OsOp::AudioSetVolume),
        )
        .with_arg(
            "level",
            ArgSpec::required(ArgKind::Integer, "Volume percent").with_range(0.0, 100.0),
        )
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(volume_spec()).unwrap();
        let found = reg.lookup("audio.set_volume").unwrap();
        assert_eq!(found.name, "audio.set_volume");
        assert!(reg.lookup("nonexistent").is_none());
    }

    #[test]
    fn lookup_returns_registered_spec() {
        let mut reg = ToolRegistry::new();
        let spec = volume_spec();
        reg.register(spec.clone()).unwrap();
        assert_eq!(*reg.lookup("audio.set_volume").unwrap(), spec);
    }

    #[test]
    fn duplicate_name_fails() {
        let mut reg = ToolRegistry::new();
        reg.register(volume_spec()).unwrap();
        let err = reg.register(volume_spec()).unwrap_err();
        assert!(matches!(err, ErrorKind::Internal(_)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn iter_preserves_registration_order() {
        let mut reg = ToolRegistry::new();
        reg.register(volume_spec()).unwrap();
        reg.register(ToolSpec::new(
            "audio.mute",
            "Mute",
            HandlerBinding::Os(OsOp::AudioMute),
        ))
        .unwrap();
        let names: Vec<String> = reg.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["audio.set_volume", "audio.mute"]);
    }

    #[test]
    fn snapshot_is_stable_after_mutation() {
        let mut reg = ToolRegistry::new();
        reg.register(volume_spec()).unwrap();
        let snap = reg.snapshot();
        reg.register(ToolSpec::new(
            "audio.mute",
            "Mute",
            HandlerBinding::Os(OsOp::AudioMute),
        ))
        .unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(reg.len(), 2);
    }

    // ── validation ──────────────────────────────────────────────────────

    #[test]
    fn valid_args_pass() {
        let canonical = validate_args(&volume_spec(), &args(json!({"level": 50}))).unwrap();
        assert_eq!(canonical["level"], json!(50));
    }

    #[test]
    fn string_coerces_to_integer() {
        let canonical = validate_args(&volume_spec(), &args(json!({"level": "50"}))).unwrap();
        assert_eq!(canonical["level"], json!(50));
    }

    #[test]
    fn out_of_range_rejected() {
        let err = validate_args(&volume_spec(), &args(json!({"level": 150}))).unwrap_err();
        assert!(matches!(err, ErrorKind::BadArgs(_)));
    }

    #[test]
    fn missing_required_rejected() {
        let err = validate_args(&volume_spec(), &args(json!({}))).unwrap_err();
        assert!(matches!(err, ErrorKind::BadArgs(_)));
    }

    #[test]
    fn unknown_argument_rejected() {
        let err =
            validate_args(&volume_spec(), &args(json!({"level": 10, "bogus": 1}))).unwrap_err();
        assert!(matches!(err, ErrorKind::BadArgs(_)));
    }

    #[test]
    fn default_injected_when_absent() {
        let spec = ToolSpec::new(
            "files.read",
            "Read a file",
            HandlerBinding::Os(OsOp::FilesRead),
        )
        .with_arg("path", ArgSpec::required(ArgKind::String, "Path"))
        .with_arg(
            "max_lines",
            ArgSpec::optional(ArgKind::Integer, "Line cap").with_default(json!(100)),
        );
        let canonical = validate_args(&spec, &args(json!({"path": "/tmp/x"}))).unwrap();
        assert_eq!(canonical["max_lines"], json!(100));
    }

    #[test]
    fn enum_constraint_enforced() {
        let spec = ToolSpec::new(
            "input.key",
            "Press a key",
            HandlerBinding::Os(OsOp::InputKey),
        )
        .with_arg(
            "key",
            ArgSpec::required(ArgKind::String, "Key name").with_one_of(["enter", "tab", "escape"]),
        );
        assert!(validate_args(&spec, &args(json!({"key": "enter"}))).is_ok());
        assert!(matches!(
            validate_args(&spec, &args(json!({"key": "f13"}))).unwrap_err(),
            ErrorKind::BadArgs(_)
        ));
    }

    #[test]
    fn boolean_string_coercion() {
        let spec = ToolSpec::new("t", "test", HandlerBinding::RunProgram)
            .with_arg("flag", ArgSpec::required(ArgKind::Boolean, "A flag"));
        let canonical = validate_args(&spec, &args(json!({"flag": "yes"}))).unwrap();
        assert_eq!(canonical["flag"], json!(true));
    }
}
