//! Command-line interface definitions
//!
//! Uses clap for argument parsing with derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sound Brick - networked audio output switch
///
/// Switch the outputs of a Sound Brick box from the desktop.
#[derive(Parser)]
#[command(name = "soundbrick")]
#[command(version)]
#[command(about = "Sound Brick - Switch audio outputs on a networked hardware switch box")]
#[command(after_help = "\
BEHAVIOR:
  - The daemon keeps a UDP link to the box and owns all settings
  - Output changes are only recorded once the box confirms them
  - Requests arriving while a command is in flight are queued and applied in order
  - Cycling skips disabled outputs; muting remembers the output to restore

DAEMON MANAGEMENT:
  soundbrick daemon              Run the daemon (logs to the state directory)
  soundbrick daemon --foreground Run with logs to stderr
  soundbrick status              Query daemon status (or just: soundbrick)
  soundbrick reconnect           Reconnect to the configured address
  soundbrick shutdown            Gracefully stop the daemon

OUTPUT COMMANDS:
  soundbrick cycle               Switch to the next enabled output
  soundbrick mute                Toggle mute
  soundbrick select N            Switch to output N (1-4)

SETTINGS:
  soundbrick set KEY VALUE       Change a setting (e.g. set output1 \"Desk Speakers\")
  soundbrick validate            Check the settings file (local, no daemon needed)

  Keys: output1..output4, enabled, ip, hotkey, notify, log_level

IPC SOCKET:
  $XDG_RUNTIME_DIR/soundbrick.sock (or /tmp/soundbrick.sock)")]
pub struct Args {
    /// Settings file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Development mode: settings in ./config.toml, notifications only logged
    #[arg(short = 'D', long, global = true)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon (device link, state hub, IPC server)
    Daemon {
        /// Run in foreground with logs to stderr
        #[arg(short, long)]
        foreground: bool,
    },

    /// Query daemon status via IPC
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Switch to the next enabled output
    Cycle,

    /// Toggle mute
    Mute,

    /// Switch to a specific output
    Select {
        /// Output number (1-4)
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        output: u8,
    },

    /// Change a setting
    Set {
        /// Setting key (output1..output4, enabled, ip, hotkey, notify, log_level)
        key: String,

        /// New value
        value: String,
    },

    /// Reconnect to the configured device address
    Reconnect,

    /// Gracefully shutdown the daemon
    Shutdown,

    /// Validate the settings file (local, no daemon needed)
    Validate,
}
