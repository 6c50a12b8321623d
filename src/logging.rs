//! Tracing initialization and the append-only utterance log.
//!
//! Diagnostic logging goes through `tracing` with an env-filter
//! (`RUST_LOG`); per-utterance records go to `logs/utterances.jsonl`
//! under the data dir, one JSON object per line.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::ErrorKind;

/// Initialize the global tracing subscriber on stderr. Safe to call
/// once; later calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Initialize tracing with a daily-rolling diagnostic file under
/// `<data_dir>/logs` in addition to stderr. The returned guard must be
/// held for the process lifetime or buffered lines are lost.
pub fn init_with_dir(data_dir: &Path) -> Option<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(data_dir.join("logs"), "aura.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let initialized = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .is_ok();
    initialized.then_some(guard)
}

// ─── UtteranceRecord ─────────────────────────────────────────────────────────

/// One line of the utterance log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceRecord {
    pub id: u64,
    pub utterance: String,
    pub layer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub ok: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─── UtteranceLog ────────────────────────────────────────────────────────────

/// Append-only JSONL writer for per-utterance records.
pub struct UtteranceLog {
    file: Mutex<std::fs::File>,
}

impl UtteranceLog {
    /// Open (creating) `<data_dir>/logs/utterances.jsonl`.
    pub fn open(data_dir: &Path) -> Result<Self, ErrorKind> {
        let dir = data_dir.join("logs");
        fs::create_dir_all(&dir)
            .map_err(|e| ErrorKind::Internal(format!("failed to create log dir: {e}")))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("utterances.jsonl"))
            .map_err(|e| ErrorKind::Internal(format!("failed to open utterance log: {e}")))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one record. Log failures are reported but never fatal.
    pub fn append(&self, record: &UtteranceRecord) {
        let Ok(line) = serde_json::to_string(record) else {
            tracing::warn!("failed to serialize utterance record");
            return;
        };
        let mut file = self.file.lock().expect("utterance log lock poisoned");
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!(error = %e, "failed to append utterance record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: u64) -> UtteranceRecord {
        UtteranceRecord {
            id,
            utterance: "mute".into(),
            layer: "fast".into(),
            tool: Some("audio.mute".into()),
            ok: true,
            elapsed_ms: 3,
            error: None,
        }
    }

    #[test]
    fn appends_one_line_per_record() {
        let tmp = TempDir::new().unwrap();
        let log = UtteranceLog::open(tmp.path()).unwrap();
        log.append(&record(1));
        log.append(&record(2));

        let content =
            fs::read_to_string(tmp.path().join("logs").join("utterances.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: UtteranceRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.tool.as_deref(), Some("audio.mute"));
    }

    #[test]
    fn reopening_appends() {
        let tmp = TempDir::new().unwrap();
        UtteranceLog::open(tmp.path()).unwrap().append(&record(1));
        UtteranceLog::open(tmp.path()).unwrap().append(&record(2));
        let content =
            fs::read_to_string(tmp.path().join("logs").join("utterances.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn error_field_omitted_when_none() {
        let json = serde_json::to_string(&record(1)).unwrap();
        assert!(!json.contains("error"));
    }
}
