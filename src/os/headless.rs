//! Recording [`OsBoundary`] double for tests and headless hosts.
//!
//! Every side effect is appended to an in-memory effect log instead of
//! touching the platform. Capability availability is configurable so
//! tests can exercise the executor's unsupported/stub-fallback paths.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::error::{ErrorKind, Result};

use super::{OsBoundary, OsCapability};

/// Boundary double that records effects instead of performing them.
pub struct HeadlessBoundary {
    available: BTreeSet<OsCapability>,
    effects: Mutex<Vec<String>>,
    volume: Mutex<u8>,
    clipboard: Mutex<String>,
}

impl HeadlessBoundary {
    /// All capabilities available (the common test configuration).
    pub fn new() -> Self {
        Self::with_capabilities([
            OsCapability::Audio,
            OsCapability::Display,
            OsCapability::Power,
            OsCapability::Apps,
            OsCapability::Input,
            OsCapability::Clipboard,
            OsCapability::Files,
            OsCapability::Desktop,
            OsCapability::Time,
        ])
    }

    pub fn with_capabilities(caps: impl IntoIterator<Item = OsCapability>) -> Self {
        Self {
            available: caps.into_iter().collect(),
            effects: Mutex::new(Vec::new()),
            volume: Mutex::new(50),
            clipboard: Mutex::new(String::new()),
        }
    }

    /// Snapshot of recorded effects, oldest first.
    pub fn effects(&self) -> Vec<String> {
        self.effects.lock().expect("effects lock poisoned").clone()
    }

    fn record(&self, effect: String) {
        self.effects.lock().expect("effects lock poisoned").push(effect);
    }

    fn require(&self, cap: OsCapability) -> Result<()> {
        if self.available.contains(&cap) {
            Ok(())
        } else {
            Err(ErrorKind::Unsupported(format!("{cap:?} is not available on this host")))
        }
    }
}

impl Default for HeadlessBoundary {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OsBoundary for HeadlessBoundary {
    fn available(&self, cap: OsCapability) -> bool {
        self.available.contains(&cap)
    }

    async fn set_volume(&self, level: u8) -> Result<()> {
        self.require(OsCapability::Audio)?;
        *self.volume.lock().expect("volume lock poisoned") = level;
        self.record(format!("audio.set_volume({level})"));
        Ok(())
    }

    async fn mute(&self) -> Result<()> {
        self.require(OsCapability::Audio)?;
        self.record("audio.mute".into());
        Ok(())
    }

    async fn unmute(&self) -> Result<()> {
        self.require(OsCapability::Audio)?;
        self.record("audio.unmute".into());
        Ok(())
    }

    async fn get_volume(&self) -> Result<u8> {
        self.require(OsCapability::Audio)?;
        Ok(*self.volume.lock().expect("volume lock poisoned"))
    }

    async fn set_brightness(&self, level: u8) -> Result<()> {
        self.require(OsCapability::Display)?;
        self.record(format!("display.set_brightness({level})"));
        Ok(())
    }

    async fn get_brightness(&self) -> Result<u8> {
        self.require(OsCapability::Display)?;
        Ok(70)
    }

    async fn lock(&self) -> Result<()> {
        self.require(OsCapability::Power)?;
        self.record("power.lock".into());
        Ok(())
    }

    async fn sleep(&self) -> Result<()> {
        self.require(OsCapability::Power)?;
        self.record("power.sleep".into());
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.require(OsCapability::Power)?;
        self.record("power.shutdown".into());
        Ok(())
    }

    async fn open_app(&self, name: &str) -> Result<()> {
        self.require(OsCapability::Apps)?;
        self.record(format!("apps.open({name})"));
        Ok(())
    }

    async fn close_app(&self, name: &str) -> Result<()> {
        self.require(OsCapability::Apps)?;
        self.record(format!("apps.close({name})"));
        Ok(())
    }

    async fn focus_app(&self, name: &str) -> Result<()> {
        self.require(OsCapability::Apps)?;
        self.record(format!("apps.focus({name})"));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.require(OsCapability::Input)?;
        self.record(format!("input.type({text})"));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.require(OsCapability::Input)?;
        self.record(format!("input.key({key})"));
        Ok(())
    }

    async fn click(&self, x: i32, y: i32) -> Result<()> {
        self.require(OsCapability::Input)?;
        self.record(format!("input.click({x},{y})"));
        Ok(())
    }

    async fn clipboard_read(&self) -> Result<String> {
        self.require(OsCapability::Clipboard)?;
        Ok(self.clipboard.lock().expect("clipboard lock poisoned").clone())
    }

    async fn clipboard_write(&self, text: &str) -> Result<()> {
        self.require(OsCapability::Clipboard)?;
        *self.clipboard.lock().expect("clipboard lock poisoned") = text.to_owned();
        self.record(format!("clipboard.write({text})"));
        Ok(())
    }

    async fn create_file(&self, path: &Path) -> Result<()> {
        self.require(OsCapability::Files)?;
        self.record(format!("files.create({})", path.display()));
        Ok(())
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        self.require(OsCapability::Files)?;
        self.record(format!("files.create_dir({})", path.display()));
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<String> {
        self.require(OsCapability::Files)?;
        self.record(format!("files.read({})", path.display()));
        Ok(String::new())
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        self.require(OsCapability::Files)?;
        self.record(format!("files.write({}, {} bytes)", path.display(), content.len()));
        Ok(())
    }

    async fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        self.require(OsCapability::Files)?;
        self.record(format!("files.move({} -> {})", from.display(), to.display()));
        Ok(())
    }

    async fn delete_path(&self, path: &Path) -> Result<()> {
        self.require(OsCapability::Files)?;
        self.record(format!("files.delete({})", path.display()));
        Ok(())
    }

    async fn screenshot(&self, dest_dir: &Path) -> Result<PathBuf> {
        self.require(OsCapability::Desktop)?;
        let dest = dest_dir.join("screenshot.png");
        self.record(format!("desktop.screenshot({})", dest.display()));
        Ok(dest)
    }

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn effects_are_recorded_in_order() {
        let boundary = HeadlessBoundary::new();
        boundary.set_volume(30).await.unwrap();
        boundary.mute().await.unwrap();
        assert_eq!(boundary.effects(), vec!["audio.set_volume(30)", "audio.mute"]);
    }

    #[tokio::test]
    async fn volume_is_remembered() {
        let boundary = HeadlessBoundary::new();
        boundary.set_volume(42).await.unwrap();
        assert_eq!(boundary.get_volume().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn missing_capability_errors() {
        let boundary = HeadlessBoundary::with_capabilities([OsCapability::Files]);
        assert!(matches!(
            boundary.mute().await.unwrap_err(),
            ErrorKind::Unsupported(_)
        ));
    }

    #[tokio::test]
    async fn clipboard_round_trips() {
        let boundary = HeadlessBoundary::new();
        boundary.clipboard_write("copied").await.unwrap();
        assert_eq!(boundary.clipboard_read().await.unwrap(), "copied");
    }
}
