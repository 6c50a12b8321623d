//! The tool executor — the single execution authority.
//!
//! Every handler invocation in the process goes through
//! [`ToolExecutor::execute`]. Pre-execution checks run in a fixed order
//! (lookup, schema, host capabilities, confirmation gate); the handler
//! then runs under a per-call timeout. The executor never retries —
//! retries belong to the self-healing loop — and never alters errors on
//! the way up.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::ErrorKind;
use crate::os::{OsBoundary, OsOp};
use crate::sandbox::CodeSandbox;
use crate::tools::{HandlerBinding, RegistrySnapshot, RiskLevel, ToolSpec, validate_args};

// ─── ExecutionPolicy ─────────────────────────────────────────────────────────

/// Per-call policy supplied by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPolicy {
    /// Present when the user has confirmed a `RiskLevel::Confirm` action.
    pub confirmed: bool,
    /// Overrides the tool and default timeouts when set.
    pub timeout_override: Option<Duration>,
}

impl ExecutionPolicy {
    pub fn confirmed() -> Self {
        Self {
            confirmed: true,
            timeout_override: None,
        }
    }
}

// ─── InvocationResult ────────────────────────────────────────────────────────

/// Uniform result of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    pub ok: bool,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub elapsed_ms: u64,
    pub retries_used: u32,
}

impl InvocationResult {
    pub fn success(value: Value, elapsed_ms: u64) -> Self {
        Self {
            ok: true,
            value,
            error: None,
            elapsed_ms,
            retries_used: 0,
        }
    }

    pub fn failure(error: ErrorKind, elapsed_ms: u64) -> Self {
        Self {
            ok: false,
            value: Value::Null,
            error: Some(error),
            elapsed_ms,
            retries_used: 0,
        }
    }
}

// ─── AuditEntry ──────────────────────────────────────────────────────────────

/// One entry in the executor's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub args: Value,
    pub risk: RiskLevel,
    pub decision: String,
}

// ─── ToolExecutor ────────────────────────────────────────────────────────────

/// The process-wide execution authority.
pub struct ToolExecutor {
    registry: RegistrySnapshot,
    boundary: Arc<dyn OsBoundary>,
    /// Stub boundary used when the primary host lacks a capability.
    fallback: Option<Arc<dyn OsBoundary>>,
    sandbox: Arc<CodeSandbox>,
    default_timeout: Duration,
    audit: Mutex<Vec<AuditEntry>>,
}

impl ToolExecutor {
    pub fn new(
        registry: RegistrySnapshot,
        boundary: Arc<dyn OsBoundary>,
        sandbox: Arc<CodeSandbox>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            boundary,
            fallback: None,
            sandbox,
            default_timeout,
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Install a cross-platform fallback boundary consulted when the
    /// primary host is missing a required capability.
    pub fn with_fallback(mut self, fallback: Arc<dyn OsBoundary>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn registry(&self) -> &RegistrySnapshot {
        &self.registry
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().expect("audit lock poisoned").clone()
    }

    /// Execute `tool_name` with `args` under `policy`.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        policy: &ExecutionPolicy,
    ) -> InvocationResult {
        let started = Instant::now();

        let outcome = self.run_checked(tool_name, args, policy).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                debug!(tool = tool_name, elapsed_ms, "tool execution succeeded");
                InvocationResult::success(value, elapsed_ms)
            }
            Err(error) => {
                debug!(tool = tool_name, elapsed_ms, error = %error, "tool execution failed");
                InvocationResult::failure(error, elapsed_ms)
            }
        }
    }

    async fn run_checked(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        policy: &ExecutionPolicy,
    ) -> Result<Value, ErrorKind> {
        // 1. Lookup.
        let spec = self
            .registry
            .lookup(tool_name)
            .ok_or_else(|| ErrorKind::UnknownTool(tool_name.to_owned()))?;

        // 2. Schema validation and coercion.
        let canonical = validate_args(&spec, args)?;

        // 3. Host capability check, with stub fallback.
        let boundary = self.select_boundary(&spec)?;

        // 4. Confirmation gate.
        if spec.risk == RiskLevel::Confirm && !policy.confirmed {
            self.record(&spec, &canonical, "needs_confirmation");
            return Err(ErrorKind::ConfirmationRequired(spec.description.clone()));
        }
        self.record(&spec, &canonical, "allowed");

        // 5. Dispatch under the per-call timeout.
        let timeout = policy
            .timeout_override
            .or(spec.timeout_secs.map(Duration::from_secs))
            .unwrap_or(self.default_timeout);
        let timeout_ms = timeout.as_millis() as u64;

        match tokio::time::timeout(timeout, self.dispatch(&spec, boundary, &canonical)).await {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::Timeout(timeout_ms)),
        }
    }

    /// Pick the boundary serving this tool's capability tags.
    fn select_boundary(&self, spec: &ToolSpec) -> Result<&Arc<dyn OsBoundary>, ErrorKind> {
        let missing: Vec<_> = spec
            .requires
            .iter()
            .filter(|cap| !self.boundary.available(**cap))
            .collect();
        if missing.is_empty() {
            return Ok(&self.boundary);
        }
        if let Some(fallback) = &self.fallback {
            if missing.iter().all(|cap| fallback.available(**cap)) {
                debug!(tool = %spec.name, "using cross-platform fallback boundary");
                return Ok(fallback);
            }
        }
        Err(ErrorKind::Unsupported(format!(
            "tool '{}' requires {:?}",
            spec.name, missing
        )))
    }

    fn record(&self, spec: &ToolSpec, args: &Map<String, Value>, decision: &str) {
        self.audit.lock().expect("audit lock poisoned").push(AuditEntry {
            timestamp: Utc::now(),
            tool_name: spec.name.clone(),
            args: Value::Object(args.clone()),
            risk: spec.risk,
            decision: decision.to_owned(),
        });
    }

    // ── Handler dispatch ─────────────────────────────────────────────────

    async fn dispatch(
        &self,
        spec: &ToolSpec,
        boundary: &Arc<dyn OsBoundary>,
        args: &Map<String, Value>,
    ) -> Result<Value, ErrorKind> {
        match spec.handler {
            HandlerBinding::Os(op) => dispatch_os(boundary.as_ref(), op, args).await,
            HandlerBinding::RunProgram => {
                let source = required_str(args, "source")?;
                let inputs: Map<String, Value> = args
                    .get("inputs")
                    .and_then(Value::as_str)
                    .map(|s| serde_json::from_str(s))
                    .transpose()
                    .map_err(|e| ErrorKind::BadArgs(format!("inputs is not a JSON object: {e}")))?
                    .unwrap_or_default();
                let outcome = self.sandbox.run_program(source, &inputs).await;
                match outcome.error {
                    Some(failure) => Err(failure.to_error_kind()),
                    None => Ok(json!({
                        "stdout": outcome.stdout,
                        "value": outcome.value,
                    })),
                }
            }
            HandlerBinding::InstallPackage => {
                let package = required_str(args, "package")?;
                self.sandbox.install_package(package).await.map(Value::String)
            }
        }
    }
}

// ─── OS dispatch ─────────────────────────────────────────────────────────────

/// Route a validated argument map to the boundary operation.
async fn dispatch_os(
    boundary: &dyn OsBoundary,
    op: OsOp,
    args: &Map<String, Value>,
) -> Result<Value, ErrorKind> {
    match op {
        OsOp::AudioSetVolume => {
            let level = required_u8(args, "level")?;
            boundary.set_volume(level).await?;
            Ok(json!({ "level": level }))
        }
        OsOp::AudioMute => boundary.mute().await.map(|()| Value::Null),
        OsOp::AudioUnmute => boundary.unmute().await.map(|()| Value::Null),
        OsOp::AudioGetVolume => boundary.get_volume().await.map(|l| json!({ "level": l })),
        OsOp::DisplaySetBrightness => {
            let level = required_u8(args, "level")?;
            boundary.set_brightness(level).await?;
            Ok(json!({ "level": level }))
        }
        OsOp::DisplayGetBrightness => {
            boundary.get_brightness().await.map(|l| json!({ "level": l }))
        }
        OsOp::PowerLock => boundary.lock().await.map(|()| Value::Null),
        OsOp::PowerSleep => boundary.sleep().await.map(|()| Value::Null),
        OsOp::PowerShutdown => boundary.shutdown().await.map(|()| Value::Null),
        OsOp::AppsOpen => {
            let name = required_str(args, "name")?;
            boundary.open_app(name).await?;
            Ok(json!({ "app": name }))
        }
        OsOp::AppsClose => {
            let name = required_str(args, "name")?;
            boundary.close_app(name).await?;
            Ok(json!({ "app": name }))
        }
        OsOp::AppsFocus => {
            let name = required_str(args, "name")?;
            boundary.focus_app(name).await?;
            Ok(json!({ "app": name }))
        }
        OsOp::InputType => {
            let text = required_str(args, "text")?;
            boundary.type_text(text).await.map(|()| Value::Null)
        }
        OsOp::InputKey => {
            let key = required_str(args, "key")?;
            boundary.press_key(key).await.map(|()| Value::Null)
        }
        OsOp::InputClick => {
            let x = required_i32(args, "x")?;
            let y = required_i32(args, "y")?;
            boundary.click(x, y).await.map(|()| Value::Null)
        }
        OsOp::ClipboardRead => boundary.clipboard_read().await.map(Value::String),
        OsOp::ClipboardWrite => {
            let text = required_str(args, "text")?;
            boundary.clipboard_write(text).await.map(|()| Value::Null)
        }
        OsOp::FilesCreate => {
            let path = required_path(args, "path")?;
            boundary.create_file(&path).await?;
            Ok(json!({ "path": path }))
        }
        OsOp::FilesCreateDir => {
            let path = required_path(args, "path")?;
            boundary.create_dir(&path).await?;
            Ok(json!({ "path": path }))
        }
        OsOp::FilesRead => {
            let path = required_path(args, "path")?;
            boundary.read_file(&path).await.map(Value::String)
        }
        OsOp::FilesWrite => {
            let path = required_path(args, "path")?;
            let content = required_str(args, "content")?;
            boundary.write_file(&path, content).await?;
            Ok(json!({ "path": path, "bytes": content.len() }))
        }
        OsOp::FilesMove => {
            let from = required_path(args, "from")?;
            let to = required_path(args, "to")?;
            boundary.move_path(&from, &to).await?;
            Ok(json!({ "from": from, "to": to }))
        }
        OsOp::FilesDelete => {
            let path = required_path(args, "path")?;
            boundary.delete_path(&path).await?;
            Ok(json!({ "path": path }))
        }
        OsOp::DesktopScreenshot => {
            let dest_dir = dirs::picture_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."));
            let path = boundary.screenshot(&dest_dir).await?;
            Ok(json!({ "path": path }))
        }
        OsOp::TimeNow => {
            let now = boundary.now();
            Ok(json!({
                "iso": now.to_rfc3339(),
                "readable": now.format("%A, %B %e %Y, %H:%M").to_string(),
            }))
        }
    }
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ErrorKind> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ErrorKind::Internal(format!("validated args missing '{key}'")))
}

fn required_path(args: &Map<String, Value>, key: &str) -> Result<PathBuf, ErrorKind> {
    required_str(args, key).map(PathBuf::from)
}

fn required_u8(args: &Map<String, Value>, key: &str) -> Result<u8, ErrorKind> {
    args.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u8::try_from(n).ok())
        .ok_or_else(|| ErrorKind::Internal(format!("validated args missing '{key}'")))
}

fn required_i32(args: &Map<String, Value>, key: &str) -> Result<i32, ErrorKind> {
    args.get(key)
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| ErrorKind::Internal(format!("validated args missing '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::os::{HeadlessBoundary, OsCapability};
    use crate::tools::builtin_registry;
    use tempfile::TempDir;

    fn executor_with(boundary: Arc<HeadlessBoundary>, tmp: &TempDir) -> ToolExecutor {
        let registry = builtin_registry().unwrap().snapshot();
        let sandbox = Arc::new(CodeSandbox::new(tmp.path(), SandboxConfig::default()).unwrap());
        ToolExecutor::new(registry, boundary, sandbox, Duration::from_secs(30))
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn set_volume_flows_to_boundary() {
        let tmp = TempDir::new().unwrap();
        let boundary = Arc::new(HeadlessBoundary::new());
        let executor = executor_with(boundary.clone(), &tmp);

        let result = executor
            .execute("audio.set_volume", &args(json!({"level": 50})), &ExecutionPolicy::default())
            .await;
        assert!(result.ok);
        assert_eq!(boundary.effects(), vec!["audio.set_volume(50)"]);
    }

    #[tokio::test]
    async fn unknown_tool_reported() {
        let tmp = TempDir::new().unwrap();
        let executor = executor_with(Arc::new(HeadlessBoundary::new()), &tmp);
        let result = executor
            .execute("audio.explode", &Map::new(), &ExecutionPolicy::default())
            .await;
        assert!(!result.ok);
        assert!(matches!(result.error, Some(ErrorKind::UnknownTool(_))));
    }

    #[tokio::test]
    async fn invalid_args_never_reach_handler() {
        let tmp = TempDir::new().unwrap();
        let boundary = Arc::new(HeadlessBoundary::new());
        let executor = executor_with(boundary.clone(), &tmp);

        let result = executor
            .execute("audio.set_volume", &args(json!({"level": 500})), &ExecutionPolicy::default())
            .await;
        assert!(matches!(result.error, Some(ErrorKind::BadArgs(_))));
        assert!(boundary.effects().is_empty());
    }

    #[tokio::test]
    async fn confirm_risk_requires_flag() {
        let tmp = TempDir::new().unwrap();
        let boundary = Arc::new(HeadlessBoundary::new());
        let executor = executor_with(boundary.clone(), &tmp);

        let denied = executor
            .execute("power.shutdown", &Map::new(), &ExecutionPolicy::default())
            .await;
        assert!(matches!(denied.error, Some(ErrorKind::ConfirmationRequired(_))));
        assert!(boundary.effects().is_empty());

        let allowed = executor
            .execute("power.shutdown", &Map::new(), &ExecutionPolicy::confirmed())
            .await;
        assert!(allowed.ok);
        assert_eq!(boundary.effects(), vec!["power.shutdown"]);
    }

    #[tokio::test]
    async fn missing_capability_is_unsupported() {
        let tmp = TempDir::new().unwrap();
        let boundary = Arc::new(HeadlessBoundary::with_capabilities([OsCapability::Files]));
        let executor = executor_with(boundary, &tmp);

        let result = executor
            .execute("audio.mute", &Map::new(), &ExecutionPolicy::default())
            .await;
        assert!(matches!(result.error, Some(ErrorKind::Unsupported(_))));
    }

    #[tokio::test]
    async fn fallback_boundary_used_when_primary_lacks_capability() {
        let tmp = TempDir::new().unwrap();
        let primary = Arc::new(HeadlessBoundary::with_capabilities([OsCapability::Files]));
        let stub = Arc::new(HeadlessBoundary::new());
        let registry = builtin_registry().unwrap().snapshot();
        let sandbox =
            Arc::new(CodeSandbox::new(tmp.path(), SandboxConfig::default()).unwrap());
        let executor =
            ToolExecutor::new(registry, primary, sandbox, Duration::from_secs(30))
                .with_fallback(stub.clone());

        let result = executor
            .execute("audio.mute", &Map::new(), &ExecutionPolicy::default())
            .await;
        assert!(result.ok);
        assert_eq!(stub.effects(), vec!["audio.mute"]);
    }

    #[tokio::test]
    async fn audit_records_decisions() {
        let tmp = TempDir::new().unwrap();
        let executor = executor_with(Arc::new(HeadlessBoundary::new()), &tmp);

        executor
            .execute("audio.mute", &Map::new(), &ExecutionPolicy::default())
            .await;
        executor
            .execute("power.shutdown", &Map::new(), &ExecutionPolicy::default())
            .await;

        let audit = executor.audit_log();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].decision, "allowed");
        assert_eq!(audit[1].decision, "needs_confirmation");
    }

    #[tokio::test]
    async fn elapsed_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let executor = executor_with(Arc::new(HeadlessBoundary::new()), &tmp);
        let result = executor
            .execute("time.now", &Map::new(), &ExecutionPolicy::default())
            .await;
        assert!(result.ok);
        assert!(result.elapsed_ms < 1_000);
    }
}
