//! Native [`OsBoundary`] implementation.
//!
//! Shells out to the platform's standard utilities via `tokio::process`
//! rather than linking windowing or audio libraries. Each helper probes
//! for its utility once at construction; missing utilities mark the whole
//! capability unavailable so the executor can fall back or surface a
//! typed `Unsupported` error.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::process::Command;

use crate::error::{ErrorKind, Result};

use super::{OsBoundary, OsCapability};

// ─── HostBoundary ────────────────────────────────────────────────────────────

/// Boundary backed by the real host.
pub struct HostBoundary {
    available: BTreeSet<OsCapability>,
}

impl HostBoundary {
    /// Probe the host for each capability's backing utility.
    pub fn detect() -> Self {
        let mut available = BTreeSet::new();
        // Files and time need nothing beyond the standard library.
        available.insert(OsCapability::Files);
        available.insert(OsCapability::Time);

        if which("pactl") || which("amixer") || which("osascript") {
            available.insert(OsCapability::Audio);
        }
        if which("brightnessctl") || which("osascript") {
            available.insert(OsCapability::Display);
        }
        if which("loginctl") || which("systemctl") || which("pmset") {
            available.insert(OsCapability::Power);
        }
        if which("xdg-open") || which("open") {
            available.insert(OsCapability::Apps);
        }
        if which("xdotool") {
            available.insert(OsCapability::Input);
        }
        if which("wl-copy") || which("xclip") || which("pbcopy") {
            available.insert(OsCapability::Clipboard);
        }
        if which("grim") || which("scrot") || which("screencapture") {
            available.insert(OsCapability::Desktop);
        }

        Self { available }
    }

    /// Construct with an explicit capability set (used by tests).
    pub fn with_capabilities(caps: impl IntoIterator<Item = OsCapability>) -> Self {
        Self {
            available: caps.into_iter().collect(),
        }
    }

    fn require(&self, cap: OsCapability) -> Result<()> {
        if self.available.contains(&cap) {
            Ok(())
        } else {
            Err(ErrorKind::Unsupported(format!("{cap:?} is not available on this host")))
        }
    }
}

/// Probe `PATH` for a utility.
fn which(bin: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file())
}

/// Run a utility to completion, mapping a non-zero exit to `Unavailable`.
async fn run(bin: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ErrorKind::Unavailable(format!("failed to spawn {bin}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ErrorKind::Unavailable(format!(
            "{bin} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pick the first utility present on this host.
fn pick<'a>(candidates: &[&'a str]) -> Result<&'a str> {
    candidates
        .iter()
        .copied()
        .find(|bin| which(bin))
        .ok_or_else(|| {
            ErrorKind::Unsupported(format!("none of {candidates:?} found on this host"))
        })
}

#[async_trait]
impl OsBoundary for HostBoundary {
    fn available(&self, cap: OsCapability) -> bool {
        self.available.contains(&cap)
    }

    // ── audio ──

    async fn set_volume(&self, level: u8) -> Result<()> {
        self.require(OsCapability::Audio)?;
        match pick(&["pactl", "amixer", "osascript"])? {
            "pactl" => {
                run("pactl", &["set-sink-volume", "@DEFAULT_SINK@", &format!("{level}%")]).await?;
            }
            "amixer" => {
                run("amixer", &["set", "Master", &format!("{level}%")]).await?;
            }
            _ => {
                run("osascript", &["-e", &format!("set volume output volume {level}")]).await?;
            }
        }
        Ok(())
    }

    async fn mute(&self) -> Result<()> {
        self.require(OsCapability::Audio)?;
        match pick(&["pactl", "amixer", "osascript"])? {
            "pactl" => run("pactl", &["set-sink-mute", "@DEFAULT_SINK@", "1"]).await.map(drop),
            "amixer" => run("amixer", &["set", "Master", "mute"]).await.map(drop),
            _ => run("osascript", &["-e", "set volume output muted true"]).await.map(drop),
        }
    }

    async fn unmute(&self) -> Result<()> {
        self.require(OsCapability::Audio)?;
        match pick(&["pactl", "amixer", "osascript"])? {
            "pactl" => run("pactl", &["set-sink-mute", "@DEFAULT_SINK@", "0"]).await.map(drop),
            "amixer" => run("amixer", &["set", "Master", "unmute"]).await.map(drop),
            _ => run("osascript", &["-e", "set volume output muted false"]).await.map(drop),
        }
    }

    async fn get_volume(&self) -> Result<u8> {
        self.require(OsCapability::Audio)?;
        let out = match pick(&["pactl", "amixer", "osascript"])? {
            "pactl" => run("pactl", &["get-sink-volume", "@DEFAULT_SINK@"]).await?,
            "amixer" => run("amixer", &["get", "Master"]).await?,
            _ => run("osascript", &["-e", "output volume of (get volume settings)"]).await?,
        };
        parse_first_percent(&out)
            .ok_or_else(|| ErrorKind::Internal(format!("could not parse volume from: {out}")))
    }

    // ── display ──

    async fn set_brightness(&self, level: u8) -> Result<()> {
        self.require(OsCapability::Display)?;
        run("brightnessctl", &["set", &format!("{level}%")]).await.map(drop)
    }

    async fn get_brightness(&self) -> Result<u8> {
        self.require(OsCapability::Display)?;
        let cur: f64 = run("brightnessctl", &["get"]).await?.trim().parse().map_err(|e| {
            ErrorKind::Internal(format!("could not parse brightness: {e}"))
        })?;
        let max: f64 = run("brightnessctl", &["max"]).await?.trim().parse().map_err(|e| {
            ErrorKind::Internal(format!("could not parse max brightness: {e}"))
        })?;
        if max <= 0.0 {
            return Err(ErrorKind::Internal("max brightness is zero".into()));
        }
        Ok(((cur / max) * 100.0).round() as u8)
    }

    // ── power ──

    async fn lock(&self) -> Result<()> {
        self.require(OsCapability::Power)?;
        match pick(&["loginctl", "pmset"])? {
            "loginctl" => run("loginctl", &["lock-session"]).await.map(drop),
            _ => run("pmset", &["displaysleepnow"]).await.map(drop),
        }
    }

    async fn sleep(&self) -> Result<()> {
        self.require(OsCapability::Power)?;
        match pick(&["systemctl", "pmset"])? {
            "systemctl" => run("systemctl", &["suspend"]).await.map(drop),
            _ => run("pmset", &["sleepnow"]).await.map(drop),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.require(OsCapability::Power)?;
        run("systemctl", &["poweroff"]).await.map(drop)
    }

    // ── apps ──

    async fn open_app(&self, name: &str) -> Result<()> {
        self.require(OsCapability::Apps)?;
        // `open -a` resolves application names on macOS. Elsewhere, launch
        // the binary by its lowercased name, detached, and do not wait for
        // the application to exit.
        if which("open") {
            return run("open", &["-a", name]).await.map(drop);
        }
        let lowered = name.to_lowercase().replace(' ', "-");
        Command::new(&lowered)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(drop)
            .map_err(|e| ErrorKind::Unavailable(format!("could not launch '{name}': {e}")))
    }

    async fn close_app(&self, name: &str) -> Result<()> {
        self.require(OsCapability::Apps)?;
        run("pkill", &["-f", "-i", name]).await.map(drop)
    }

    async fn focus_app(&self, name: &str) -> Result<()> {
        self.require(OsCapability::Apps)?;
        run("wmctrl", &["-a", name]).await.map(drop)
    }

    // ── input ──

    async fn type_text(&self, text: &str) -> Result<()> {
        self.require(OsCapability::Input)?;
        run("xdotool", &["type", "--delay", "20", text]).await.map(drop)
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.require(OsCapability::Input)?;
        run("xdotool", &["key", key]).await.map(drop)
    }

    async fn click(&self, x: i32, y: i32) -> Result<()> {
        self.require(OsCapability::Input)?;
        run("xdotool", &["mousemove", &x.to_string(), &y.to_string(), "click", "1"])
            .await
            .map(drop)
    }

    // ── clipboard ──

    async fn clipboard_read(&self) -> Result<String> {
        self.require(OsCapability::Clipboard)?;
        match pick(&["wl-paste", "xclip", "pbpaste"])? {
            "wl-paste" => run("wl-paste", &["--no-newline"]).await,
            "xclip" => run("xclip", &["-selection", "clipboard", "-o"]).await,
            _ => run("pbpaste", &[]).await,
        }
    }

    async fn clipboard_write(&self, text: &str) -> Result<()> {
        self.require(OsCapability::Clipboard)?;
        // Clipboard writers read stdin; feed the text through a pipe.
        let bin = pick(&["wl-copy", "xclip", "pbcopy"])?;
        let mut cmd = Command::new(bin);
        if bin == "xclip" {
            cmd.args(["-selection", "clipboard"]);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| ErrorKind::Unavailable(format!("failed to spawn {bin}: {e}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| ErrorKind::Unavailable(format!("clipboard write failed: {e}")))?;
        }
        let status = child
            .wait()
            .await
            .map_err(|e| ErrorKind::Unavailable(format!("clipboard write failed: {e}")))?;
        if !status.success() {
            return Err(ErrorKind::Unavailable(format!("{bin} exited with {status}")));
        }
        Ok(())
    }

    // ── files ──

    async fn create_file(&self, path: &Path) -> Result<()> {
        self.require(OsCapability::Files)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ErrorKind::Unavailable(format!("create_dir_all failed: {e}")))?;
        }
        tokio::fs::File::create(path)
            .await
            .map(drop)
            .map_err(|e| ErrorKind::Unavailable(format!("create failed: {e}")))
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        self.require(OsCapability::Files)?;
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ErrorKind::Unavailable(format!("create_dir failed: {e}")))
    }

    async fn read_file(&self, path: &Path) -> Result<String> {
        self.require(OsCapability::Files)?;
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ErrorKind::Unavailable(format!("read failed: {e}")))
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        self.require(OsCapability::Files)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ErrorKind::Unavailable(format!("create_dir_all failed: {e}")))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| ErrorKind::Unavailable(format!("write failed: {e}")))
    }

    async fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        self.require(OsCapability::Files)?;
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| ErrorKind::Unavailable(format!("move failed: {e}")))
    }

    async fn delete_path(&self, path: &Path) -> Result<()> {
        self.require(OsCapability::Files)?;
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| ErrorKind::Unavailable(format!("stat failed: {e}")))?;
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        result.map_err(|e| ErrorKind::Unavailable(format!("delete failed: {e}")))
    }

    // ── desktop ──

    async fn screenshot(&self, dest_dir: &Path) -> Result<PathBuf> {
        self.require(OsCapability::Desktop)?;
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| ErrorKind::Unavailable(format!("create_dir failed: {e}")))?;
        let dest = dest_dir.join(format!(
            "screenshot-{}.png",
            Local::now().format("%Y%m%d-%H%M%S")
        ));
        let dest_str = dest.to_string_lossy().into_owned();
        match pick(&["grim", "scrot", "screencapture"])? {
            "grim" => run("grim", &[&dest_str]).await.map(drop)?,
            "scrot" => run("scrot", &[&dest_str]).await.map(drop)?,
            _ => run("screencapture", &["-x", &dest_str]).await.map(drop)?,
        }
        Ok(dest)
    }

    // ── time ──

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Extract the first `NN%` percentage in a utility's output.
fn parse_first_percent(out: &str) -> Option<u8> {
    let idx = out.find('%')?;
    let digits: String = out[..idx]
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let digits: String = digits.chars().rev().collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_percent_from_pactl_output() {
        let out = "Volume: front-left: 32768 /  50% / -18.06 dB";
        assert_eq!(parse_first_percent(out), Some(50));
    }

    #[test]
    fn parse_percent_missing() {
        assert_eq!(parse_first_percent("no percentage here"), None);
    }

    #[test]
    fn explicit_capabilities_respected() {
        let boundary = HostBoundary::with_capabilities([OsCapability::Files]);
        assert!(boundary.available(OsCapability::Files));
        assert!(!boundary.available(OsCapability::Audio));
    }

    #[tokio::test]
    async fn missing_capability_is_unsupported() {
        let boundary = HostBoundary::with_capabilities([]);
        let err = boundary.set_volume(50).await.unwrap_err();
        assert!(matches!(err, ErrorKind::Unsupported(_)));
    }

    #[tokio::test]
    async fn file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let boundary = HostBoundary::with_capabilities([OsCapability::Files]);
        let path = tmp.path().join("notes").join("hello.txt");

        boundary.write_file(&path, "Hi").await.unwrap();
        assert_eq!(boundary.read_file(&path).await.unwrap(), "Hi");

        let moved = tmp.path().join("hello-moved.txt");
        boundary.move_path(&path, &moved).await.unwrap();
        assert!(moved.exists());

        boundary.delete_path(&moved).await.unwrap();
        assert!(!moved.exists());
    }

    #[tokio::test]
    async fn delete_directory_recurses() {
        let tmp = TempDir::new().unwrap();
        let boundary = HostBoundary::with_capabilities([OsCapability::Files]);
        let dir = tmp.path().join("nested");
        boundary.create_dir(&dir).await.unwrap();
        boundary.write_file(&dir.join("a.txt"), "x").await.unwrap();
        boundary.delete_path(&dir).await.unwrap();
        assert!(!dir.exists());
    }
}
