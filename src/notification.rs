//! Desktop notifications
//!
//! The hub hands user-facing notices to a [`Notifier`]. The desktop implementation
//! coalesces bursts: notices arriving within a short window collapse into the single
//! most urgent one, so a failed reconnect does not stack three toasts on the screen.

use color_eyre::eyre::{Result, WrapErr};
use notify_rust::Notification;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Window in which notices are merged into one toast
pub const COALESCE_WINDOW: Duration = Duration::from_millis(350);

const APP_NAME: &str = "Sound Brick";

/// Urgency of a notice; higher wins when coalescing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Info,
    Warning,
    Error,
}

/// A user-facing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub body: String,
    pub priority: Priority,
}

impl Notice {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority,
        }
    }
}

/// Receiver of user-facing notices. Must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier that only logs (dev mode, or when no desktop is available)
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        info!("[notice] {}: {}", notice.title, notice.body);
    }
}

/// Coalescing desktop notifier backed by a background task
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl DesktopNotifier {
    /// Spawn the coalescing task on the current runtime
    #[must_use]
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_alert_queue(rx));
        Self { tx }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            debug!("Notification task stopped; dropping notice");
        }
    }
}

async fn run_alert_queue(mut rx: mpsc::UnboundedReceiver<Notice>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        let deadline = tokio::time::Instant::now() + COALESCE_WINDOW;
        while let Ok(Some(notice)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            batch.push(notice);
        }

        let Some(notice) = most_urgent(batch) else {
            continue;
        };

        let shown = tokio::task::spawn_blocking(move || {
            send_notification(&notice.title, &notice.body, notice.priority)
        })
        .await;

        match shown {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Notification failed: {:#}", e),
            Err(e) => warn!("Notification task panicked: {}", e),
        }
    }
}

/// Pick the notice to show from a burst: highest priority, earliest among equals
#[must_use]
pub fn most_urgent(batch: Vec<Notice>) -> Option<Notice> {
    batch
        .into_iter()
        .reduce(|best, next| if next.priority > best.priority { next } else { best })
}

/// Send a desktop notification
///
/// # Errors
/// Returns an error if the notification cannot be sent (e.g., no notification daemon running).
pub fn send_notification(summary: &str, body: &str, priority: Priority) -> Result<()> {
    let icon = match priority {
        Priority::Info => "audio-speakers",
        Priority::Warning => "dialog-warning",
        Priority::Error => "dialog-error",
    };

    Notification::new()
        .summary(summary)
        .body(body)
        .appname(APP_NAME)
        .icon(icon)
        .timeout(3000)
        .show()
        .wrap_err("Failed to show notification")?;

    Ok(())
}
