//! The builtin tool table.
//!
//! Registered once at process start. Names are dotted `group.op` and map
//! 1:1 onto OS-boundary operations, plus the two sandbox-backed tools
//! (`run_program`, `system.install_package`). Keywords and canonical
//! phrases feed the router's keyword and fuzzy phases.

use serde_json::json;

use crate::error::ErrorKind;
use crate::os::OsOp;

use super::registry::ToolRegistry;
use super::spec::{ArgKind, ArgSpec, HandlerBinding, RiskLevel, ToolSpec};

/// Build the registry with every builtin tool.
pub fn builtin_registry() -> Result<ToolRegistry, ErrorKind> {
    let mut reg = ToolRegistry::new();
    for spec in builtin_specs() {
        reg.register(spec)?;
    }
    Ok(reg)
}

fn builtin_specs() -> Vec<ToolSpec> {
    vec![
        // ── audio ──
        ToolSpec::new(
            "audio.set_volume",
            "Set the system output volume to a percentage.",
            HandlerBinding::Os(OsOp::AudioSetVolume),
        )
        .with_arg(
            "level",
            ArgSpec::required(ArgKind::Integer, "Volume percent (0-100).").with_range(0.0, 100.0),
        )
        .with_keywords(["set", "volume", "sound", "loudness"])
        .with_canonical_phrase("set volume to 50"),
        ToolSpec::new(
            "audio.mute",
            "Mute the system audio output.",
            HandlerBinding::Os(OsOp::AudioMute),
        )
        .with_keywords(["mute", "silence", "quiet"])
        .with_canonical_phrase("mute the sound"),
        ToolSpec::new(
            "audio.unmute",
            "Unmute the system audio output.",
            HandlerBinding::Os(OsOp::AudioUnmute),
        )
        .with_keywords(["unmute", "sound", "back"])
        .with_canonical_phrase("unmute the sound"),
        ToolSpec::new(
            "audio.get_volume",
            "Report the current output volume.",
            HandlerBinding::Os(OsOp::AudioGetVolume),
        )
        .with_keywords(["current", "volume", "level"])
        .with_canonical_phrase("what is the volume"),
        // ── display ──
        ToolSpec::new(
            "display.set_brightness",
            "Set the display brightness to a percentage.",
            HandlerBinding::Os(OsOp::DisplaySetBrightness),
        )
        .with_arg(
            "level",
            ArgSpec::required(ArgKind::Integer, "Brightness percent (0-100).")
                .with_range(0.0, 100.0),
        )
        .with_keywords(["set", "brightness", "screen", "dim"])
        .with_canonical_phrase("set brightness to 50"),
        ToolSpec::new(
            "display.get_brightness",
            "Report the current display brightness.",
            HandlerBinding::Os(OsOp::DisplayGetBrightness),
        )
        .with_keywords(["current", "brightness", "screen"])
        .with_canonical_phrase("what is the brightness"),
        // ── power ──
        ToolSpec::new(
            "power.lock",
            "Lock the current session.",
            HandlerBinding::Os(OsOp::PowerLock),
        )
        .with_keywords(["lock", "screen", "session"])
        .with_canonical_phrase("lock the screen"),
        ToolSpec::new(
            "power.sleep",
            "Suspend the machine.",
            HandlerBinding::Os(OsOp::PowerSleep),
        )
        .with_risk(RiskLevel::Medium)
        .with_keywords(["sleep", "suspend", "computer"])
        .with_canonical_phrase("put the computer to sleep"),
        ToolSpec::new(
            "power.shutdown",
            "Shut the machine down.",
            HandlerBinding::Os(OsOp::PowerShutdown),
        )
        .with_risk(RiskLevel::Confirm)
        .with_keywords(["shutdown", "shut", "down", "power", "off"])
        .with_canonical_phrase("shut down the computer"),
        // ── apps ──
        ToolSpec::new(
            "apps.open",
            "Open an application by name.",
            HandlerBinding::Os(OsOp::AppsOpen),
        )
        .with_arg("name", ArgSpec::required(ArgKind::String, "Application name."))
        .with_keywords(["open", "launch", "start", "app"])
        .with_canonical_phrase("open spotify"),
        ToolSpec::new(
            "apps.close",
            "Close a running application by name.",
            HandlerBinding::Os(OsOp::AppsClose),
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("name", ArgSpec::required(ArgKind::String, "Application name."))
        .with_keywords(["close", "quit", "kill", "app"])
        .with_canonical_phrase("close spotify"),
        ToolSpec::new(
            "apps.focus",
            "Bring an application's window to the foreground.",
            HandlerBinding::Os(OsOp::AppsFocus),
        )
        .with_arg("name", ArgSpec::required(ArgKind::String, "Application name."))
        .with_keywords(["focus", "switch", "window"])
        .with_canonical_phrase("focus spotify"),
        // ── input ──
        ToolSpec::new(
            "input.type",
            "Type text into the focused window.",
            HandlerBinding::Os(OsOp::InputType),
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("text", ArgSpec::required(ArgKind::String, "Text to type."))
        .with_keywords(["type", "write", "text"])
        .with_canonical_phrase("type hello world"),
        ToolSpec::new(
            "input.key",
            "Press a single key or chord.",
            HandlerBinding::Os(OsOp::InputKey),
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("key", ArgSpec::required(ArgKind::String, "Key name, e.g. 'Return'."))
        .with_keywords(["press", "key", "hit"])
        .with_canonical_phrase("press enter"),
        ToolSpec::new(
            "input.click",
            "Click at screen coordinates.",
            HandlerBinding::Os(OsOp::InputClick),
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("x", ArgSpec::required(ArgKind::Integer, "X coordinate."))
        .with_arg("y", ArgSpec::required(ArgKind::Integer, "Y coordinate."))
        .with_keywords(["click", "mouse"])
        .with_canonical_phrase("click at 100 200"),
        // ── clipboard ──
        ToolSpec::new(
            "clipboard.read",
            "Read the clipboard contents.",
            HandlerBinding::Os(OsOp::ClipboardRead),
        )
        .with_keywords(["clipboard", "paste", "copied"])
        .with_canonical_phrase("what is on the clipboard"),
        ToolSpec::new(
            "clipboard.write",
            "Replace the clipboard contents.",
            HandlerBinding::Os(OsOp::ClipboardWrite),
        )
        .with_arg("text", ArgSpec::required(ArgKind::String, "Text to place on the clipboard."))
        .with_keywords(["copy", "clipboard"])
        .with_canonical_phrase("copy hello to the clipboard"),
        // ── files ──
        ToolSpec::new(
            "files.create",
            "Create an empty file.",
            HandlerBinding::Os(OsOp::FilesCreate),
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("path", ArgSpec::required(ArgKind::String, "Path of the file to create."))
        .with_keywords(["create", "new", "file"])
        .with_canonical_phrase("create a file"),
        ToolSpec::new(
            "files.create_dir",
            "Create a directory (and parents).",
            HandlerBinding::Os(OsOp::FilesCreateDir),
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("path", ArgSpec::required(ArgKind::String, "Path of the directory to create."))
        .with_keywords(["create", "folder", "directory"])
        .with_canonical_phrase("create a folder"),
        ToolSpec::new(
            "files.read",
            "Read a text file.",
            HandlerBinding::Os(OsOp::FilesRead),
        )
        .with_arg("path", ArgSpec::required(ArgKind::String, "Path of the file to read."))
        .with_keywords(["read", "show", "file", "contents"])
        .with_canonical_phrase("read the file"),
        ToolSpec::new(
            "files.write",
            "Write text to a file, creating it if needed.",
            HandlerBinding::Os(OsOp::FilesWrite),
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("path", ArgSpec::required(ArgKind::String, "Path of the file to write."))
        .with_arg("content", ArgSpec::required(ArgKind::String, "Content to write."))
        .with_keywords(["write", "save", "file"])
        .with_canonical_phrase("save a file"),
        ToolSpec::new(
            "files.move",
            "Move or rename a file or directory.",
            HandlerBinding::Os(OsOp::FilesMove),
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("from", ArgSpec::required(ArgKind::String, "Source path."))
        .with_arg("to", ArgSpec::required(ArgKind::String, "Destination path."))
        .with_keywords(["move", "rename", "file"])
        .with_canonical_phrase("move the file"),
        ToolSpec::new(
            "files.delete",
            "Delete a file or directory.",
            HandlerBinding::Os(OsOp::FilesDelete),
        )
        .with_risk(RiskLevel::Confirm)
        .with_arg("path", ArgSpec::required(ArgKind::String, "Path to delete."))
        .with_keywords(["delete", "remove", "file"])
        .with_canonical_phrase("delete the file"),
        // ── desktop ──
        ToolSpec::new(
            "desktop.screenshot",
            "Capture the screen to an image file.",
            HandlerBinding::Os(OsOp::DesktopScreenshot),
        )
        .with_keywords(["screenshot", "capture", "screen"])
        .with_canonical_phrase("take a screenshot"),
        // ── time ──
        ToolSpec::new(
            "time.now",
            "Report the current local date and time.",
            HandlerBinding::Os(OsOp::TimeNow),
        )
        .with_keywords(["time", "date", "clock", "today"])
        .with_canonical_phrase("what time is it"),
        // ── sandbox-backed ──
        ToolSpec::new(
            "run_program",
            "Evaluate a generated program in the code sandbox.",
            HandlerBinding::RunProgram,
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("source", ArgSpec::required(ArgKind::String, "Program source."))
        .with_arg(
            "inputs",
            ArgSpec::optional(ArgKind::String, "JSON object of template inputs.")
                .with_default(json!("{}")),
        )
        .with_timeout_secs(15),
        ToolSpec::new(
            "system.install_package",
            "Install a package into the sandbox environment.",
            HandlerBinding::InstallPackage,
        )
        .with_risk(RiskLevel::Medium)
        .with_arg("package", ArgSpec::required(ArgKind::String, "Package name."))
        .with_timeout_secs(120),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_loads() {
        let reg = builtin_registry().unwrap();
        assert!(reg.len() >= 25);
    }

    #[test]
    fn names_are_unique() {
        // builtin_registry would fail loudly on a duplicate.
        assert!(builtin_registry().is_ok());
    }

    #[test]
    fn core_tools_present() {
        let reg = builtin_registry().unwrap();
        for name in [
            "audio.set_volume",
            "audio.mute",
            "files.create_dir",
            "files.write",
            "apps.open",
            "desktop.screenshot",
            "time.now",
            "run_program",
            "system.install_package",
        ] {
            assert!(reg.lookup(name).is_some(), "missing builtin '{name}'");
        }
    }

    #[test]
    fn shutdown_requires_confirmation() {
        let reg = builtin_registry().unwrap();
        assert_eq!(reg.lookup("power.shutdown").unwrap().risk, RiskLevel::Confirm);
        assert_eq!(reg.lookup("files.delete").unwrap().risk, RiskLevel::Confirm);
    }

    #[test]
    fn volume_level_is_range_constrained() {
        let reg = builtin_registry().unwrap();
        let spec = reg.lookup("audio.set_volume").unwrap();
        assert!(spec.args["level"].constraint.is_some());
    }
}
