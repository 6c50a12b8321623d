//! The OS boundary — the only component that touches platform APIs.
//!
//! Every side effect the assistant performs (audio, display, power, app
//! control, input synthesis, clipboard, files, screenshots) goes through
//! [`OsBoundary`]. Tool handlers receive a reference to the boundary and
//! never import platform APIs themselves; tests substitute
//! [`HeadlessBoundary`].

pub mod headless;
pub mod host;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use headless::HeadlessBoundary;
pub use host::HostBoundary;

// ─── OsCapability ────────────────────────────────────────────────────────────

/// Capability tags grouping the boundary's operations. A tool declares the
/// tags it requires; the executor skips tools whose tags are missing on
/// the current host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsCapability {
    Audio,
    Display,
    Power,
    Apps,
    Input,
    Clipboard,
    Files,
    Desktop,
    Time,
}

// ─── OsOp ────────────────────────────────────────────────────────────────────

/// Flat identifier for each boundary operation. Tool specs bind to one of
/// these at registration; the executor dispatches on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsOp {
    AudioSetVolume,
    AudioMute,
    AudioUnmute,
    AudioGetVolume,
    DisplaySetBrightness,
    DisplayGetBrightness,
    PowerLock,
    PowerSleep,
    PowerShutdown,
    AppsOpen,
    AppsClose,
    AppsFocus,
    InputType,
    InputKey,
    InputClick,
    ClipboardRead,
    ClipboardWrite,
    FilesCreate,
    FilesCreateDir,
    FilesRead,
    FilesWrite,
    FilesMove,
    FilesDelete,
    DesktopScreenshot,
    TimeNow,
}

impl OsOp {
    /// The capability tag this operation belongs to.
    pub fn capability(&self) -> OsCapability {
        use OsOp::*;
        match self {
            AudioSetVolume | AudioMute | AudioUnmute | AudioGetVolume => OsCapability::Audio,
            DisplaySetBrightness | DisplayGetBrightness => OsCapability::Display,
            PowerLock | PowerSleep | PowerShutdown => OsCapability::Power,
            AppsOpen | AppsClose | AppsFocus => OsCapability::Apps,
            InputType | InputKey | InputClick => OsCapability::Input,
            ClipboardRead | ClipboardWrite => OsCapability::Clipboard,
            FilesCreate | FilesCreateDir | FilesRead | FilesWrite | FilesMove | FilesDelete => {
                OsCapability::Files
            }
            DesktopScreenshot => OsCapability::Desktop,
            TimeNow => OsCapability::Time,
        }
    }
}

// ─── OsBoundary ──────────────────────────────────────────────────────────────

/// The process-wide OS access surface.
///
/// Implementations must be `Send + Sync`; the executor holds the boundary
/// behind an `Arc<dyn OsBoundary>`. Hosts missing a capability return
/// `false` from [`available`](Self::available) and a typed
/// `ErrorKind::Unsupported` from the operations themselves.
#[async_trait]
pub trait OsBoundary: Send + Sync {
    /// Whether the host supports operations tagged with `cap`.
    fn available(&self, cap: OsCapability) -> bool;

    // ── audio ──
    async fn set_volume(&self, level: u8) -> Result<()>;
    async fn mute(&self) -> Result<()>;
    async fn unmute(&self) -> Result<()>;
    async fn get_volume(&self) -> Result<u8>;

    // ── display ──
    async fn set_brightness(&self, level: u8) -> Result<()>;
    async fn get_brightness(&self) -> Result<u8>;

    // ── power ──
    async fn lock(&self) -> Result<()>;
    async fn sleep(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;

    // ── apps ──
    async fn open_app(&self, name: &str) -> Result<()>;
    async fn close_app(&self, name: &str) -> Result<()>;
    async fn focus_app(&self, name: &str) -> Result<()>;

    // ── input ──
    async fn type_text(&self, text: &str) -> Result<()>;
    async fn press_key(&self, key: &str) -> Result<()>;
    async fn click(&self, x: i32, y: i32) -> Result<()>;

    // ── clipboard ──
    async fn clipboard_read(&self) -> Result<String>;
    async fn clipboard_write(&self, text: &str) -> Result<()>;

    // ── files ──
    async fn create_file(&self, path: &Path) -> Result<()>;
    async fn create_dir(&self, path: &Path) -> Result<()>;
    async fn read_file(&self, path: &Path) -> Result<String>;
    async fn write_file(&self, path: &Path, content: &str) -> Result<()>;
    async fn move_path(&self, from: &Path, to: &Path) -> Result<()>;
    async fn delete_path(&self, path: &Path) -> Result<()>;

    // ── desktop ──
    async fn screenshot(&self, dest_dir: &Path) -> Result<PathBuf>;

    // ── time ──
    fn now(&self) -> DateTime<Local>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_op_has_a_capability() {
        assert_eq!(OsOp::AudioMute.capability(), OsCapability::Audio);
        assert_eq!(OsOp::FilesWrite.capability(), OsCapability::Files);
        assert_eq!(OsOp::DesktopScreenshot.capability(), OsCapability::Desktop);
        assert_eq!(OsOp::TimeNow.capability(), OsCapability::Time);
    }

    #[test]
    fn ops_serialize_snake_case() {
        let json = serde_json::to_string(&OsOp::AudioSetVolume).unwrap();
        assert_eq!(json, "\"audio_set_volume\"");
    }
}
