//! CLI commands
//!
//! `validate` works locally on the settings file. Everything else is a request to the
//! running daemon over IPC.

use color_eyre::eyre::{Result, bail};
use crossterm::style::Stylize;
use std::path::Path;

use crate::config::{ConfigStore, SettingsBackend, TomlFileBackend};
use crate::ipc::{self, Request, Response, StatusInfo};
use crate::protocol::{CurrentOutput, Output};
use crate::style::{BrickStyle, link_label};

// ============================================================================
// Local Commands (no daemon needed)
// ============================================================================

/// Validate the settings file and print a summary
///
/// # Errors
/// Returns an error if the file is missing, unreadable, or holds invalid values.
pub fn validate(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        bail!(
            "Settings file not found: {}\nThe daemon creates it with defaults on first start.",
            config_path.display()
        );
    }

    let mut backend = TomlFileBackend::new(config_path);
    let store = ConfigStore::load(&mut backend)?;
    store.validate()?;
    store.print_summary(&backend.describe());
    Ok(())
}

/// Format uptime in human-readable form
fn format_uptime(secs: u64) -> String {
    const SECS_PER_MINUTE: u64 = 60;
    const SECS_PER_HOUR: u64 = 3600;

    if secs < SECS_PER_MINUTE {
        return format!("{secs}s");
    }
    if secs < SECS_PER_HOUR {
        return format!("{mins}m", mins = secs / SECS_PER_MINUTE);
    }
    let hours = secs / SECS_PER_HOUR;
    let mins = (secs % SECS_PER_HOUR) / SECS_PER_MINUTE;
    if mins > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{hours}h")
    }
}

fn describe_current(info: &StatusInfo) -> String {
    match info.current_output {
        Some(CurrentOutput::Active(output)) => {
            let label = info
                .labels
                .get(output.index())
                .map_or_else(|| output.to_string(), Clone::clone);
            format!("{} ({label})", output.position())
        }
        Some(CurrentOutput::Muted) => "Muted".to_string(),
        None => "Unknown".to_string(),
    }
}

// ============================================================================
// IPC-based Commands (require daemon)
// ============================================================================

/// Query daemon status
///
/// # Errors
/// Returns an error if IPC communication fails or JSON serialization fails.
pub async fn status(json_output: bool) -> Result<()> {
    let info = if ipc::is_daemon_running().await {
        match ipc::send_request(&Request::Status).await? {
            Response::Status(info) => Some(info),
            Response::Error { message } => bail!("{message}"),
            Response::Ok { .. } => bail!("Unexpected response from daemon"),
        }
    } else {
        None
    };

    if json_output {
        let json = match &info {
            Some(info) => serde_json::json!({
                "running": true,
                "uptime_human": format_uptime(info.uptime_secs),
                "daemon": info,
            }),
            None => serde_json::json!({ "running": false }),
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("{}", "Daemon".header());
    println!("{}", "-".repeat(6));
    let Some(info) = info else {
        println!("{} {}", "Status:".dim(), "Not running".error());
        println!("  Start with: {}", "soundbrick daemon".technical());
        return Ok(());
    };

    println!(
        "{} {}",
        "Status:".dim(),
        format!("Running (uptime: {})", format_uptime(info.uptime_secs)).success()
    );
    println!("{} {}", "Version:".dim(), info.version);
    println!();

    println!("{}", "Device".header());
    println!("{}", "-".repeat(6));
    let address = if info.device_address.is_empty() {
        "(not set)".to_string()
    } else {
        info.device_address.clone()
    };
    println!("{} {}", "Address:".dim(), address.technical());
    println!("{} {}", "Link:".dim(), link_label(info.link));
    let current = describe_current(&info);
    if info.current_output == Some(CurrentOutput::Muted) {
        println!("{} {}", "Output:".dim(), current.warning());
    } else {
        println!("{} {}", "Output:".dim(), current.bold());
    }
    if info.busy {
        println!("{} {}", "Pending:".dim(), "command in flight".warning());
    }
    println!();

    println!("{}", "Outputs".header());
    println!("{}", "-".repeat(7));
    for output in Output::ALL {
        let label = info.labels.get(output.index()).map_or("", String::as_str);
        let enabled = info.enabled.get(output.index()).copied().unwrap_or(true);
        let state = if enabled {
            "enabled".success()
        } else {
            "disabled".dim()
        };
        println!("  {}. {} {}", output.position(), label.bold(), state);
    }

    Ok(())
}

/// Send a request that answers with `Ok`/`Error` and print the outcome
async fn simple_request(request: &Request) -> Result<()> {
    if !ipc::is_daemon_running().await {
        bail!("Daemon is not running. Start it with `soundbrick daemon`.");
    }

    match ipc::send_request(request).await? {
        Response::Ok { message } => {
            println!("{}", message.success());
            Ok(())
        }
        Response::Error { message } => bail!("{message}"),
        Response::Status(_) => bail!("Unexpected response from daemon"),
    }
}

/// Switch to the next enabled output
///
/// # Errors
/// Returns an error if the daemon is not running or rejects the request.
pub async fn cycle() -> Result<()> {
    simple_request(&Request::Cycle).await
}

/// Toggle mute
///
/// # Errors
/// Returns an error if the daemon is not running or rejects the request.
pub async fn toggle_mute() -> Result<()> {
    simple_request(&Request::ToggleMute).await
}

/// Switch to output `position` (1-based)
///
/// # Errors
/// Returns an error if the position is out of range or the daemon rejects the request.
pub async fn select(position: u8) -> Result<()> {
    let Some(output) = Output::from_position(usize::from(position)) else {
        bail!("Output must be between 1 and 4, got {position}");
    };
    simple_request(&Request::Select { output }).await
}

/// Change a setting
///
/// # Errors
/// Returns an error if the daemon is not running or rejects the key or value.
pub async fn set(key: &str, value: &str) -> Result<()> {
    simple_request(&Request::Set {
        key: key.to_string(),
        value: value.to_string(),
    })
    .await
}

/// Reconnect to the configured device address
///
/// # Errors
/// Returns an error if the daemon is not running.
pub async fn reconnect() -> Result<()> {
    simple_request(&Request::Reconnect).await
}

/// Gracefully shutdown the daemon
///
/// # Errors
/// Returns an error if no daemon is running or IPC communication fails.
pub async fn shutdown() -> Result<()> {
    simple_request(&Request::Shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::LinkState;
    use std::fs;
    use test_case::test_case;

    #[test_case(0, "0s")]
    #[test_case(59, "59s")]
    #[test_case(60, "1m")]
    #[test_case(3599, "59m")]
    #[test_case(3600, "1h")]
    #[test_case(3720, "1h 2m")]
    fn test_format_uptime(secs: u64, expected: &str) {
        assert_eq!(format_uptime(secs), expected);
    }

    fn info(current: Option<CurrentOutput>) -> StatusInfo {
        StatusInfo {
            version: "0.0.0".to_string(),
            uptime_secs: 0,
            link: LinkState::Down,
            device_address: String::new(),
            current_output: current,
            labels: vec!["A".into(), "B".into(), "Kitchen".into(), "D".into()],
            enabled: vec![true; 4],
            busy: false,
        }
    }

    #[test]
    fn test_describe_current() {
        let third = Output::new(2).unwrap();
        assert_eq!(
            describe_current(&info(Some(CurrentOutput::Active(third)))),
            "3 (Kitchen)"
        );
        assert_eq!(describe_current(&info(Some(CurrentOutput::Muted))), "Muted");
        assert_eq!(describe_current(&info(None)), "Unknown");
    }

    #[test]
    fn test_validate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_validate_reports_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "enabled = \"ON, MAYBE, ON, ON\"\n").unwrap();

        let err = validate(&path).unwrap_err();
        assert!(format!("{err:#}").contains("enabled"));
    }

    #[test]
    fn test_validate_accepts_good_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "ip = \"192.168.1.40\"\noutput1 = \"Desk\"\n").unwrap();

        validate(&path).unwrap();
    }
}
