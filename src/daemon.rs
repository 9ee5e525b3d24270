//! Daemon mode
//!
//! Hosts the state hub and the device worker, serves IPC requests from CLI invocations,
//! and stops cleanly on `soundbrick shutdown`, Ctrl-C or SIGTERM.

use color_eyre::eyre::{Result, WrapErr, eyre};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::signal;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, SettingKey, SettingsBackend, TomlFileBackend};
use crate::device::LinkOptions;
use crate::hub::{Change, HubHandle, OutputRequest, Snapshot, StateHub, Topic};
use crate::ipc::{self, IpcServer, Request, Response, StatusInfo};
use crate::logging::{self, LogTarget};
use crate::notification::{DesktopNotifier, LogNotifier, Notice, Notifier, Priority};
use crate::protocol::Output;

/// How the daemon was asked to run
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config_path: PathBuf,
    pub foreground: bool,
    pub dev: bool,
}

/// Run the daemon until shutdown
///
/// # Errors
/// Returns an error if settings cannot be loaded, logging cannot be set up, or the IPC
/// socket cannot be bound. Device problems are never fatal.
pub async fn run(options: DaemonOptions) -> Result<()> {
    let mut backend = TomlFileBackend::new(&options.config_path);
    let store = ConfigStore::load(&mut backend)?;

    let target = if options.foreground {
        LogTarget::Stderr
    } else {
        LogTarget::File(logging::log_dir()?)
    };
    // Held until return so buffered lines reach the file
    let _log_guard = logging::init(&store.log_level(), &target)?;

    info!("Starting Sound Brick daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Settings: {}", backend.describe());
    if let Err(e) = store.validate() {
        warn!("{:#}", e);
    }

    let notifier: Arc<dyn Notifier> = if options.dev {
        info!("Dev mode: notifications are only logged");
        Arc::new(LogNotifier)
    } else {
        Arc::new(DesktopNotifier::spawn())
    };

    let ipc_server = IpcServer::bind().await?;
    info!("IPC server listening on {:?}", ipc_server.socket_path());

    let has_address = !store.device_address().is_empty();
    let notify_enabled = store.notifications_enabled();
    let (hub, mut hub_task) = StateHub::spawn(
        store,
        Box::new(backend),
        Arc::clone(&notifier),
        LinkOptions::default(),
    );

    if notify_enabled {
        notifier.notify(Notice::new(
            "Sound Brick",
            "Sound Brick is running.",
            Priority::Info,
        ));
    }

    if has_address {
        hub.reconnect()?;
    } else {
        warn!("No device address configured; set one with `soundbrick set ip ADDRESS`");
    }

    let mut changes = hub.subscribe();
    let mut terminate =
        unix_signal(SignalKind::terminate()).wrap_err("Failed to install SIGTERM handler")?;
    let started = Instant::now();

    loop {
        tokio::select! {
            Some(mut stream) = ipc_server.accept() => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_ipc_request(&mut stream, &hub, started).await {
                        error!("IPC request handling error: {:#}", e);
                    }
                });
            }

            change = changes.recv() => match change {
                Ok(change) => log_change(&change),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("Change log skipped {} notifications", missed);
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },

            result = &mut hub_task => {
                return match result {
                    Ok(result) => {
                        info!("Daemon stopped");
                        result
                    }
                    Err(e) => Err(eyre!("State hub task failed: {e}")),
                };
            }

            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }

            _ = terminate.recv() => {
                info!("Terminated, shutting down");
                break;
            }
        }
    }

    hub.shutdown()?;
    hub_task
        .await
        .map_err(|e| eyre!("State hub task failed: {e}"))?
}

/// Daemon-side reaction to published changes
fn log_change(change: &Change) {
    match change.topic {
        Topic::Setting(SettingKey::Hotkey) => {
            info!("Hotkey code is now {}", change.value);
        }
        Topic::Setting(SettingKey::LogLevel) => {
            info!("Log level '{}' takes effect on next start", change.value);
        }
        Topic::Setting(key) => debug!("{} changed to '{}'", key, change.value),
        Topic::Link => debug!("Link {}", change.value),
    }
}

/// Handle a single IPC request from a client
async fn handle_ipc_request<S>(stream: &mut S, hub: &HubHandle, started: Instant) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = ipc::read_request(stream).await?;
    debug!("IPC request: {:?}", request);

    if request == Request::Shutdown {
        info!("Shutdown requested via IPC");
        // Answer first; the process exits once the hub has stopped
        ipc::write_response(
            stream,
            &Response::Ok {
                message: "Daemon shutting down...".to_string(),
            },
        )
        .await?;
        return hub.shutdown();
    }

    let response = respond(request, hub, started.elapsed().as_secs());
    ipc::write_response(stream, &response).await
}

/// Turn a request into intents and an immediate answer
fn respond(request: Request, hub: &HubHandle, uptime_secs: u64) -> Response {
    match request {
        Request::Status => Response::Status(status_info(&hub.snapshot(), uptime_secs)),
        Request::Cycle => request_output(hub, OutputRequest::Cycle, "Cycling output"),
        Request::ToggleMute => request_output(hub, OutputRequest::ToggleMute, "Toggling mute"),
        Request::Select { output } => request_output(
            hub,
            OutputRequest::Select(output),
            &format!("Selecting {output}"),
        ),
        Request::Set { key, value } => set_setting(hub, &key, &value),
        Request::Reconnect => accepted(hub.reconnect(), "Reconnecting"),
        Request::Shutdown => accepted(hub.shutdown(), "Daemon shutting down..."),
    }
}

fn request_output(hub: &HubHandle, request: OutputRequest, message: &str) -> Response {
    // The hub alerts the desktop as well; the CLI caller gets a direct answer
    let link_up = hub.snapshot().link.is_up();
    let submitted = hub.request(request);
    if !link_up {
        return Response::Error {
            message: "Device link is down. Check the address and run `soundbrick reconnect`."
                .to_string(),
        };
    }
    accepted(submitted, message)
}

fn set_setting(hub: &HubHandle, key: &str, value: &str) -> Response {
    let key = match SettingKey::from_str(key) {
        Ok(key) => key,
        Err(message) => return Response::Error { message },
    };

    if key == SettingKey::CurrentOutput {
        return Response::Error {
            message: "current_output follows the device; use select, cycle or mute".to_string(),
        };
    }

    match key.normalize(value) {
        Ok(normalized) => {
            let message = format!("{key} = '{normalized}'");
            accepted(hub.set(key, normalized), &message)
        }
        Err(reason) => Response::Error {
            message: format!("Invalid value for {key}: {reason}"),
        },
    }
}

fn accepted(result: Result<()>, message: &str) -> Response {
    match result {
        Ok(()) => Response::Ok {
            message: message.to_string(),
        },
        Err(e) => Response::Error {
            message: format!("{e:#}"),
        },
    }
}

fn status_info(snapshot: &Snapshot, uptime_secs: u64) -> StatusInfo {
    let settings = &snapshot.settings;
    StatusInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs,
        link: snapshot.link,
        device_address: settings.device_address().to_string(),
        current_output: settings.current_output(),
        labels: Output::ALL
            .iter()
            .map(|&output| settings.label(output).to_string())
            .collect(),
        enabled: settings.enabled().to_vec(),
        busy: snapshot.in_flight.is_some() || snapshot.queued > 0,
    }
}
