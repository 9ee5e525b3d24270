//! CLI smoke tests - verify basic command-line interface functionality
//!
//! These tests run the actual compiled binary to ensure:
//! - Help and version flags work
//! - Commands parse correctly
//! - Local commands work without a daemon

use std::fs;
use std::process::Command;

/// Helper to get the path to the compiled soundbrick binary
fn soundbrick_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_soundbrick"));
    // Keep clients away from any daemon running on the developer's machine
    cmd.env("XDG_RUNTIME_DIR", std::env::temp_dir().join("soundbrick-smoke-no-daemon"));
    cmd
}

#[test]
fn cli_help_works() {
    let output = soundbrick_bin()
        .arg("--help")
        .output()
        .expect("Failed to run soundbrick --help");

    assert!(
        output.status.success(),
        "soundbrick --help should exit successfully"
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"), "Help should show usage");
    for command in ["daemon", "status", "cycle", "mute", "select", "set", "reconnect", "validate"] {
        assert!(stdout.contains(command), "Help should list {command} command");
    }
}

#[test]
fn cli_version_works() {
    let output = soundbrick_bin()
        .arg("--version")
        .output()
        .expect("Failed to run soundbrick --version");

    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("soundbrick"), "Version should mention soundbrick");
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "Version should show the package version"
    );
}

#[test]
fn cli_validate_accepts_good_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "ip = \"192.168.1.40\"\noutput2 = \"Headphones\"\n").unwrap();

    let output = soundbrick_bin()
        .args(["validate", "--config"])
        .arg(&path)
        .output()
        .expect("Failed to run soundbrick validate");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "validate should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("Configuration valid"));
    assert!(stdout.contains("Headphones"));
    assert!(stdout.contains("192.168.1.40"));
}

#[test]
fn cli_validate_rejects_bad_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "hotkey = \"F12\"\n").unwrap();

    let output = soundbrick_bin()
        .args(["validate", "--config"])
        .arg(&path)
        .output()
        .expect("Failed to run soundbrick validate");

    assert!(!output.status.success(), "invalid hotkey should fail validation");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("hotkey"), "error should name the bad key: {stderr}");
}

#[test]
fn cli_select_out_of_range_is_rejected() {
    let output = soundbrick_bin()
        .args(["select", "5"])
        .output()
        .expect("Failed to run soundbrick select");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("5"), "error should mention the bad value");
}

#[test]
fn cli_request_without_daemon_fails_helpfully() {
    let output = soundbrick_bin()
        .arg("cycle")
        .output()
        .expect("Failed to run soundbrick cycle");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not running"), "unexpected error: {stderr}");
}

#[test]
fn cli_status_without_daemon_reports_not_running() {
    let output = soundbrick_bin()
        .args(["status", "--json"])
        .output()
        .expect("Failed to run soundbrick status");

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["running"], serde_json::Value::Bool(false));
}

#[test]
fn cli_unknown_command_fails() {
    let output = soundbrick_bin()
        .arg("frobnicate")
        .output()
        .expect("Failed to run soundbrick");

    assert!(!output.status.success());
}
