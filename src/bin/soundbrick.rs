//! Sound Brick binary entry point
//!
//! Dispatches to daemon mode or subcommands based on CLI arguments.

use clap::Parser;
use color_eyre::eyre::Result;
use soundbrick::cli::{Args, Command};
use soundbrick::commands;
use soundbrick::config::TomlFileBackend;
use soundbrick::daemon::{self, DaemonOptions};
use soundbrick::logging::{self, LogTarget};

/// CLI commands log warnings and errors to stderr; `RUST_LOG` overrides
fn init_logging() -> Result<()> {
    logging::init("warn", &LogTarget::Stderr).map(drop)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_path = TomlFileBackend::resolve_path(args.config.as_deref(), args.dev)?;

    match args.command {
        // Daemon handles its own logging initialization (file vs stderr)
        Some(Command::Daemon { foreground }) => {
            daemon::run(DaemonOptions {
                config_path,
                foreground,
                dev: args.dev,
            })
            .await
        }

        // No subcommand - show status
        None => {
            init_logging()?;
            commands::status(false).await
        }

        Some(Command::Status { json }) => {
            init_logging()?;
            commands::status(json).await
        }

        // Output requests (require daemon)
        Some(Command::Cycle) => {
            init_logging()?;
            commands::cycle().await
        }

        Some(Command::Mute) => {
            init_logging()?;
            commands::toggle_mute().await
        }

        Some(Command::Select { output }) => {
            init_logging()?;
            commands::select(output).await
        }

        // Settings and link control (require daemon)
        Some(Command::Set { key, value }) => {
            init_logging()?;
            commands::set(&key, &value).await
        }

        Some(Command::Reconnect) => {
            init_logging()?;
            commands::reconnect().await
        }

        Some(Command::Shutdown) => {
            init_logging()?;
            commands::shutdown().await
        }

        // Local commands (no daemon needed)
        Some(Command::Validate) => {
            init_logging()?;
            commands::validate(&config_path)
        }
    }
}
