//! The code sandbox — the only component permitted to evaluate
//! synthesized source at runtime.
//!
//! Programs run as a separate interpreter process inside a scratch
//! directory under the data dir. Three fences apply before and during a
//! run:
//!
//! 1. a static import scan against the configured allowlist (violations
//!    never spawn a process, so no partial side effect is possible);
//! 2. a resource preamble inside the child applying the address-space
//!    cap on Unix;
//! 3. a wall-clock timeout around the child, with kill-on-drop so a
//!    cancelled or timed-out program does not outlive its utterance.
//!
//! Packages installed through the constrained installer land in the
//! scratch `site-packages` and are visible only to sandboxed programs.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::debug;

use crate::config::SandboxConfig;
use crate::error::ErrorKind;

// ─── SandboxFailure ──────────────────────────────────────────────────────────

/// Distinct sandbox failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxFailure {
    /// The interpreter rejected the source before running it.
    Parse(String),
    /// The program raised at runtime.
    Runtime(String),
    /// Wall-clock limit exceeded.
    Timeout(u64),
    /// Address-space cap exceeded.
    MemoryLimit,
    /// The source references a module outside the allowlist.
    ForbiddenImport(String),
}

impl SandboxFailure {
    /// Map into the core error taxonomy.
    pub fn to_error_kind(&self) -> ErrorKind {
        match self {
            SandboxFailure::Parse(msg) => ErrorKind::Internal(format!("program parse error: {msg}")),
            SandboxFailure::Runtime(msg) => match missing_module(msg) {
                Some(module) => ErrorKind::MissingDependency(module),
                None => ErrorKind::Internal(format!("program runtime error: {msg}")),
            },
            SandboxFailure::Timeout(ms) => ErrorKind::Timeout(*ms),
            SandboxFailure::MemoryLimit => {
                ErrorKind::Unavailable("sandbox memory limit exceeded".into())
            }
            SandboxFailure::ForbiddenImport(module) => {
                ErrorKind::SandboxViolation(format!("forbidden import '{module}'"))
            }
        }
    }
}

/// Extract the module name from a `ModuleNotFoundError` message.
fn missing_module(stderr: &str) -> Option<String> {
    let marker = "No module named '";
    let start = stderr.find(marker)? + marker.len();
    let end = stderr[start..].find('\'')? + start;
    Some(stderr[start..end].to_string())
}

// ─── ProgramOutcome ──────────────────────────────────────────────────────────

/// Result of one sandboxed program run.
#[derive(Debug, Clone)]
pub struct ProgramOutcome {
    pub stdout: String,
    pub stderr: String,
    /// Parsed from the final stdout line when it is valid JSON.
    pub value: Option<Value>,
    pub ok: bool,
    pub error: Option<SandboxFailure>,
}

impl ProgramOutcome {
    fn failure(failure: SandboxFailure, stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            value: None,
            ok: false,
            error: Some(failure),
        }
    }
}

// ─── CodeSandbox ─────────────────────────────────────────────────────────────

/// Subprocess-based program evaluator.
pub struct CodeSandbox {
    scratch_dir: PathBuf,
    config: SandboxConfig,
    allowed: BTreeSet<String>,
}

impl CodeSandbox {
    /// Create the sandbox rooted at `<data_dir>/sandbox`.
    pub fn new(data_dir: &Path, config: SandboxConfig) -> Result<Self, ErrorKind> {
        let scratch_dir = data_dir.join("sandbox");
        std::fs::create_dir_all(scratch_dir.join("site-packages"))
            .map_err(|e| ErrorKind::Internal(format!("failed to create sandbox dir: {e}")))?;
        let allowed = config.allowed_imports.iter().cloned().collect();
        Ok(Self {
            scratch_dir,
            config,
            allowed,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Static import scan. Returns the first module outside the allowlist.
    pub fn scan_imports(&self, source: &str) -> Result<(), SandboxFailure> {
        for line in source.lines() {
            let trimmed = line.trim_start();
            let module = if let Some(rest) = trimmed.strip_prefix("import ") {
                first_module(rest)
            } else if let Some(rest) = trimmed.strip_prefix("from ") {
                first_module(rest)
            } else {
                // `__import__("x")` and importlib sidestep the static scan;
                // reject them outright.
                if trimmed.contains("__import__") || trimmed.contains("importlib") {
                    return Err(SandboxFailure::ForbiddenImport("dynamic import".into()));
                }
                continue;
            };
            if let Some(module) = module {
                if !self.allowed.contains(&module) && !self.installed(&module) {
                    return Err(SandboxFailure::ForbiddenImport(module));
                }
            }
        }
        Ok(())
    }

    /// Whether a module was installed into the scratch site-packages.
    fn installed(&self, module: &str) -> bool {
        let site = self.scratch_dir.join("site-packages");
        site.join(module).is_dir() || site.join(format!("{module}.py")).is_file()
    }

    /// Evaluate `source` with `inputs` bound as a JSON dict.
    pub async fn run_program(&self, source: &str, inputs: &Map<String, Value>) -> ProgramOutcome {
        if let Err(violation) = self.scan_imports(source) {
            return ProgramOutcome::failure(violation, String::new(), String::new());
        }

        let program = match self.compose(source, inputs) {
            Ok(p) => p,
            Err(e) => {
                return ProgramOutcome::failure(
                    SandboxFailure::Runtime(e.to_string()),
                    String::new(),
                    String::new(),
                );
            }
        };

        let path = self.scratch_dir.join(format!("program-{}.py", uuid::Uuid::new_v4()));
        if let Err(e) = std::fs::write(&path, &program) {
            return ProgramOutcome::failure(
                SandboxFailure::Runtime(format!("failed to stage program: {e}")),
                String::new(),
                String::new(),
            );
        }

        let outcome = self.spawn_and_wait(&path).await;
        let _ = std::fs::remove_file(&path);
        outcome
    }

    async fn spawn_and_wait(&self, path: &Path) -> ProgramOutcome {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let timeout_ms = timeout.as_millis() as u64;

        let child = Command::new(&self.config.interpreter)
            .arg("-I") // isolated mode: no user site, no env-var injection
            .arg(path)
            .current_dir(&self.scratch_dir)
            .env("PYTHONPATH", self.scratch_dir.join("site-packages"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                return ProgramOutcome::failure(
                    SandboxFailure::Runtime(format!(
                        "failed to spawn {}: {e}",
                        self.config.interpreter
                    )),
                    String::new(),
                    String::new(),
                );
            }
        };

        let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;
        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ProgramOutcome::failure(
                    SandboxFailure::Runtime(format!("failed to collect output: {e}")),
                    String::new(),
                    String::new(),
                );
            }
            // kill_on_drop reaps the child when the timeout wins.
            Err(_) => {
                debug!(timeout_ms, "sandbox program timed out");
                return ProgramOutcome::failure(
                    SandboxFailure::Timeout(timeout_ms),
                    String::new(),
                    String::new(),
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            let value = stdout
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .and_then(|l| serde_json::from_str(l).ok());
            return ProgramOutcome {
                stdout,
                stderr,
                value,
                ok: true,
                error: None,
            };
        }

        let failure = classify_failure(&stderr, timeout_ms);
        ProgramOutcome::failure(failure, stdout, stderr)
    }

    /// Wrap user source with the resource preamble and bound inputs.
    fn compose(&self, source: &str, inputs: &Map<String, Value>) -> Result<String, ErrorKind> {
        let inputs_json = serde_json::to_string(&Value::Object(inputs.clone()))
            .map_err(|e| ErrorKind::Internal(format!("failed to encode inputs: {e}")))?;
        // JSON-encode the JSON text itself: JSON string escapes are valid
        // Python string-literal escapes, so the dict survives verbatim.
        let inputs_literal = serde_json::to_string(&inputs_json)
            .map_err(|e| ErrorKind::Internal(format!("failed to encode inputs: {e}")))?;
        let memory_bytes = self.config.memory_limit_mb * 1024 * 1024;
        Ok(format!(
            "import json as _json\n\
             try:\n\
             \x20   import resource as _resource\n\
             \x20   _resource.setrlimit(_resource.RLIMIT_AS, ({memory_bytes}, {memory_bytes}))\n\
             except Exception:\n\
             \x20   pass\n\
             INPUTS = _json.loads({inputs_literal})\n\
             {source}\n"
        ))
    }

    /// Install a package into the scratch site-packages.
    ///
    /// The package name is validated against a conservative charset before
    /// it reaches the installer command line.
    pub async fn install_package(&self, package: &str) -> Result<String, ErrorKind> {
        if !package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || package.is_empty()
            || package.starts_with('-')
        {
            return Err(ErrorKind::BadArgs(format!(
                "invalid package name '{package}'"
            )));
        }

        let target = self.scratch_dir.join("site-packages");
        let output = Command::new(&self.config.interpreter)
            .args(["-m", "pip", "install", "--quiet", "--target"])
            .arg(&target)
            .arg(package)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ErrorKind::Unavailable(format!("failed to run pip: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ErrorKind::MissingDependency(format!(
                "install of '{package}' failed: {}",
                stderr.trim()
            )));
        }
        Ok(format!("installed {package}"))
    }
}

/// First dotted module segment of an import clause.
fn first_module(clause: &str) -> Option<String> {
    let token = clause.split_whitespace().next()?;
    let root = token.split('.').next()?;
    if root.is_empty() {
        None
    } else {
        Some(root.trim_end_matches(',').to_string())
    }
}

/// Classify a non-zero interpreter exit by its stderr.
fn classify_failure(stderr: &str, timeout_ms: u64) -> SandboxFailure {
    if stderr.contains("SyntaxError") || stderr.contains("IndentationError") {
        SandboxFailure::Parse(last_line(stderr))
    } else if stderr.contains("MemoryError") {
        SandboxFailure::MemoryLimit
    } else if stderr.is_empty() {
        // Killed without diagnostics; treat as the wall-clock fence.
        SandboxFailure::Timeout(timeout_ms)
    } else {
        SandboxFailure::Runtime(last_line(stderr))
    }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox(tmp: &TempDir) -> CodeSandbox {
        CodeSandbox::new(tmp.path(), SandboxConfig::default()).unwrap()
    }

    #[test]
    fn allowed_import_passes_scan() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        assert!(sb.scan_imports("import math\nprint(math.pi)").is_ok());
    }

    #[test]
    fn forbidden_import_rejected() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        let err = sb.scan_imports("import socket").unwrap_err();
        assert_eq!(err, SandboxFailure::ForbiddenImport("socket".into()));
    }

    #[test]
    fn from_import_scanned() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        assert!(sb.scan_imports("from math import sqrt").is_ok());
        assert!(sb.scan_imports("from os import path").is_err());
    }

    #[test]
    fn dynamic_import_rejected() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        assert!(sb.scan_imports("m = __import__('os')").is_err());
    }

    #[test]
    fn dotted_import_uses_root_module() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        assert!(sb.scan_imports("import os.path").is_err());
    }

    #[tokio::test]
    async fn violation_spawns_no_process() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        let outcome = sb.run_program("import subprocess", &Map::new()).await;
        assert!(!outcome.ok);
        assert!(matches!(outcome.error, Some(SandboxFailure::ForbiddenImport(_))));
        assert!(outcome.stdout.is_empty());
    }

    #[test]
    fn missing_module_detected() {
        let kind = SandboxFailure::Runtime(
            "ModuleNotFoundError: No module named 'requests'".into(),
        )
        .to_error_kind();
        assert_eq!(kind, ErrorKind::MissingDependency("requests".into()));
    }

    #[test]
    fn failure_mapping_is_pinned() {
        assert!(matches!(
            SandboxFailure::Timeout(10_000).to_error_kind(),
            ErrorKind::Timeout(10_000)
        ));
        assert!(matches!(
            SandboxFailure::MemoryLimit.to_error_kind(),
            ErrorKind::Unavailable(_)
        ));
        assert!(matches!(
            SandboxFailure::ForbiddenImport("socket".into()).to_error_kind(),
            ErrorKind::SandboxViolation(_)
        ));
        assert!(matches!(
            SandboxFailure::Parse("bad".into()).to_error_kind(),
            ErrorKind::Internal(_)
        ));
    }

    #[test]
    fn classify_syntax_error() {
        let f = classify_failure("  File \"x.py\", line 1\nSyntaxError: invalid syntax", 1000);
        assert!(matches!(f, SandboxFailure::Parse(_)));
    }

    #[test]
    fn classify_memory_error() {
        assert_eq!(classify_failure("MemoryError", 1000), SandboxFailure::MemoryLimit);
    }

    #[tokio::test]
    async fn invalid_package_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        for bad in ["", "-rf", "pkg; rm -rf /", "pkg name"] {
            let err = sb.install_package(bad).await.unwrap_err();
            assert!(matches!(err, ErrorKind::BadArgs(_)), "accepted '{bad}'");
        }
    }

    #[test]
    fn compose_binds_inputs() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        let mut inputs = Map::new();
        inputs.insert("n".into(), serde_json::json!(42));
        let program = sb.compose("print(INPUTS['n'])", &inputs).unwrap();
        assert!(program.contains("INPUTS = _json.loads"));
        assert!(program.contains("print(INPUTS['n'])"));
    }
}
