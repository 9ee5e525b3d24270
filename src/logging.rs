//! Logging setup
//!
//! CLI invocations and the foreground daemon log to stderr. The background daemon writes
//! to `daemon.log` in the state directory through a non-blocking writer, rotating to
//! `daemon.log.old` once the file grows past [`MAX_LOG_BYTES`].

use color_eyre::eyre::{Result, WrapErr};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Rotation threshold for the daemon log
pub const MAX_LOG_BYTES: u64 = 1_000_000;

pub const LOG_FILE_NAME: &str = "daemon.log";

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

/// Build the filter: `RUST_LOG` wins, otherwise `soundbrick=<level>`
#[must_use]
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("soundbrick={level}")))
}

/// Install the global subscriber
///
/// The returned guard must be kept alive for the life of the process when logging to a
/// file; dropping it flushes and stops the writer thread.
///
/// # Errors
/// Returns an error if the log directory cannot be created or a subscriber is already set.
pub fn init(level: &str, target: &LogTarget) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(level);

    match target {
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .try_init()
                .map_err(|e| color_eyre::eyre::eyre!("Failed to install logger: {e}"))?;
            Ok(None)
        }
        LogTarget::File(dir) => {
            fs::create_dir_all(dir)
                .wrap_err_with(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RotatingFileAppender::new(dir, LOG_FILE_NAME, MAX_LOG_BYTES);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|e| color_eyre::eyre::eyre!("Failed to install logger: {e}"))?;
            Ok(Some(guard))
        }
    }
}

/// Directory for the daemon log (`$XDG_STATE_HOME/soundbrick`, falling back to the data dir)
///
/// # Errors
/// Returns an error if neither directory can be determined.
pub fn log_dir() -> Result<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|dir| dir.join("soundbrick"))
        .ok_or_else(|| color_eyre::eyre::eyre!("Could not determine a state directory for logs"))
}

/// Size-rotated log file: `current` plus one `.old` backup, re-created if deleted
/// externally, 0o600 on Unix.
pub struct RotatingFileAppender {
    path: PathBuf,
    backup_path: PathBuf,
    max_size_bytes: u64,
    file: Mutex<Option<File>>,
}

impl RotatingFileAppender {
    pub fn new(dir: impl AsRef<Path>, filename: &str, max_size_bytes: u64) -> Self {
        let dir = dir.as_ref();
        Self {
            path: dir.join(filename),
            backup_path: dir.join(format!("{filename}.old")),
            max_size_bytes,
            file: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path, append: bool) -> io::Result<File> {
        let mut options = fs::OpenOptions::new();
        options.create(true).write(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }

        #[cfg(unix)]
        options.mode(0o600);

        options.open(path)
    }

    fn current<'a>(&self, slot: &'a mut Option<File>) -> io::Result<&'a mut File> {
        if !self.path.exists() {
            *slot = None;
        }

        if slot.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            *slot = Some(Self::open(&self.path, true)?);
        }

        slot.as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }

    fn rotate(&self, slot: &mut Option<File>) -> io::Result<()> {
        *slot = None;
        if self.path.exists() {
            fs::rename(&self.path, &self.backup_path)?;
        }
        *slot = Some(Self::open(&self.path, false)?);
        Ok(())
    }
}

impl Write for RotatingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut slot = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("Log mutex poisoned: {e}")))?;

        let size = self
            .current(&mut slot)
            .and_then(|f| f.metadata())
            .map_or(0, |m| m.len());

        if size >= self.max_size_bytes
            && let Err(e) = self.rotate(&mut slot)
        {
            eprintln!("Failed to rotate log file: {e}");
        }

        self.current(&mut slot)?.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("Log mutex poisoned: {e}")))?;

        if let Some(file) = slot.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}
