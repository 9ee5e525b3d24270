//! IPC infrastructure for daemon communication
//!
//! Unix socket IPC so CLI invocations can act as producers for the daemon's state hub.
//! Messages are length-prefixed JSON.

use color_eyre::eyre::{Result, WrapErr, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, warn};

use crate::hub::LinkState;
use crate::protocol::{CurrentOutput, Output};

// ============================================================================
// Message Types
// ============================================================================

/// Requests sent from CLI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Query daemon status
    Status,
    /// Advance to the next enabled output
    Cycle,
    /// Mute, or restore the output that was active before muting
    ToggleMute,
    /// Switch to a specific output
    Select { output: Output },
    /// Write a setting
    Set { key: String, value: String },
    /// Reconnect to the configured device address
    Reconnect,
    /// Gracefully shutdown the daemon
    Shutdown,
}

/// Responses sent from daemon to CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Status information
    Status(StatusInfo),
    /// Request accepted
    Ok { message: String },
    /// Request rejected
    Error { message: String },
}

/// Daemon status as reported over IPC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub version: String,
    pub uptime_secs: u64,
    pub link: LinkState,
    pub device_address: String,
    pub current_output: Option<CurrentOutput>,
    pub labels: Vec<String>,
    pub enabled: Vec<bool>,
    pub busy: bool,
}

// ============================================================================
// Socket Path Management
// ============================================================================

/// Get the IPC socket path
/// Prefers $XDG_RUNTIME_DIR/soundbrick.sock, falls back to /tmp/soundbrick.sock
#[must_use]
pub fn get_socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR").map_or_else(
        || PathBuf::from("/tmp/soundbrick.sock"),
        |runtime_dir| PathBuf::from(runtime_dir).join("soundbrick.sock"),
    )
}

/// Check whether a daemon is answering on the socket
pub async fn is_daemon_running() -> bool {
    is_socket_alive(&get_socket_path()).await
}

async fn is_socket_alive(path: &Path) -> bool {
    matches!(
        tokio::time::timeout(Duration::from_millis(100), UnixStream::connect(path)).await,
        Ok(Ok(_))
    )
}

/// Remove a socket file left behind by a daemon that is no longer running
///
/// # Errors
/// Returns an error if another daemon is already listening, or the stale file cannot be removed.
pub async fn cleanup_stale_socket(socket_path: &Path) -> Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }

    if is_socket_alive(socket_path).await {
        bail!(
            "Another daemon is already listening on {}",
            socket_path.display()
        );
    }

    debug!("Removing stale socket: {:?}", socket_path);
    std::fs::remove_file(socket_path)
        .wrap_err_with(|| format!("Failed to remove stale socket: {}", socket_path.display()))
}

// ============================================================================
// Protocol Helpers
// ============================================================================

const MAX_MESSAGE_SIZE: usize = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Read a length-prefixed JSON message from a stream
async fn read_message<T, S>(stream: &mut S) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    S: AsyncRead + Unpin,
{
    // 4-byte big-endian length prefix
    let mut len_buf = [0u8; 4];
    tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut len_buf))
        .await
        .wrap_err("Timeout reading message length")?
        .wrap_err("Failed to read message length")?;

    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_SIZE {
        bail!("Message too large: {msg_len} bytes (max: {MAX_MESSAGE_SIZE})");
    }

    let mut msg_buf = vec![0u8; msg_len];
    tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut msg_buf))
        .await
        .wrap_err("Timeout reading message payload")?
        .wrap_err("Failed to read message payload")?;

    serde_json::from_slice(&msg_buf).wrap_err("Failed to deserialize message")
}

/// Write a length-prefixed JSON message to a stream
async fn write_message<T, S>(stream: &mut S, message: &T) -> Result<()>
where
    T: Serialize,
    S: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(message).wrap_err("Failed to serialize message")?;
    if json.len() > MAX_MESSAGE_SIZE {
        bail!(
            "Message too large: {} bytes (max: {MAX_MESSAGE_SIZE})",
            json.len()
        );
    }

    let len = u32::try_from(json.len())
        .wrap_err("Message length does not fit the frame header")?
        .to_be_bytes();
    stream
        .write_all(&len)
        .await
        .wrap_err("Failed to write message length")?;
    stream
        .write_all(&json)
        .await
        .wrap_err("Failed to write message payload")?;
    stream.flush().await.wrap_err("Failed to flush stream")?;

    Ok(())
}

// ============================================================================
// IPC Client (for CLI commands)
// ============================================================================

/// Send a request to the daemon and wait for the response
///
/// # Errors
/// Returns an error if the daemon is not reachable or the exchange fails.
pub async fn send_request(request: &Request) -> Result<Response> {
    let socket_path = get_socket_path();

    let mut stream = tokio::time::timeout(Duration::from_secs(2), UnixStream::connect(&socket_path))
        .await
        .wrap_err("Timeout connecting to daemon")?
        .wrap_err_with(|| {
            format!(
                "Failed to connect to daemon. Is it running?\nSocket: {}",
                socket_path.display()
            )
        })?;

    debug!("Connected to daemon at {:?}", socket_path);
    write_request(&mut stream, request).await?;
    read_response(&mut stream).await
}

/// Write a request frame (client side)
///
/// # Errors
/// Returns an error if the request cannot be written.
pub async fn write_request<S: AsyncWrite + Unpin>(stream: &mut S, request: &Request) -> Result<()> {
    write_message(stream, request).await
}

/// Read a response frame (client side)
///
/// # Errors
/// Returns an error on malformed frames, oversize messages, or timeout.
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Response> {
    read_message(stream).await
}

// ============================================================================
// IPC Server (for daemon)
// ============================================================================

/// Listening socket of the daemon; the socket file is removed on drop
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind the well-known socket path
    ///
    /// # Errors
    /// Returns an error if another daemon is running or the socket cannot be bound.
    pub async fn bind() -> Result<Self> {
        Self::bind_at(get_socket_path()).await
    }

    /// Bind a specific socket path
    ///
    /// # Errors
    /// Returns an error if another daemon is running or the socket cannot be bound.
    pub async fn bind_at(socket_path: PathBuf) -> Result<Self> {
        cleanup_stale_socket(&socket_path).await?;

        let listener = UnixListener::bind(&socket_path)
            .wrap_err_with(|| format!("Failed to bind IPC socket: {}", socket_path.display()))?;
        debug!("IPC server listening on {:?}", socket_path);

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept the next incoming connection; `None` if accept failed (non-fatal)
    pub async fn accept(&self) -> Option<UnixStream> {
        match self.listener.accept().await {
            Ok((stream, _addr)) => Some(stream),
            Err(e) => {
                error!("Failed to accept IPC connection: {}", e);
                None
            }
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!("Failed to remove IPC socket on shutdown: {}", e);
        } else {
            debug!("Removed IPC socket: {:?}", self.socket_path);
        }
    }
}

/// Read a request from a client connection
///
/// # Errors
/// Returns an error on malformed frames, oversize messages, or timeout.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Request> {
    read_message(stream).await
}

/// Write a response to a client connection
///
/// # Errors
/// Returns an error if the response cannot be written.
pub async fn write_response<S: AsyncWrite + Unpin>(stream: &mut S, response: &Response) -> Result<()> {
    write_message(stream, response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_request_framing_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = Request::Set {
            key: "output2".to_string(),
            value: "Headphones".to_string(),
        };

        write_message(&mut client, &request).await.unwrap();
        let received = read_request(&mut server).await.unwrap();

        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_frame_is_big_endian_length_then_json() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_message(&mut client, &Request::Cycle).await.unwrap();
        drop(client);

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();

        let json = br#"{"type":"Cycle"}"#;
        assert_eq!(&raw[..4], &u32::try_from(json.len()).unwrap().to_be_bytes());
        assert_eq!(&raw[4..], json);
    }

    #[tokio::test]
    async fn test_oversize_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let huge = u32::try_from(MAX_MESSAGE_SIZE + 1).unwrap().to_be_bytes();
        client.write_all(&huge).await.unwrap();

        let err = read_request(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_server_removes_socket_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soundbrick.sock");

        let server = IpcServer::bind_at(path.clone()).await.unwrap();
        assert!(path.exists());
        assert!(is_socket_alive(&path).await);

        drop(server);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_second_server_refuses_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soundbrick.sock");

        let _first = IpcServer::bind_at(path.clone()).await.unwrap();
        assert!(IpcServer::bind_at(path).await.is_err());
    }

    #[test]
    fn test_select_request_json_shape() {
        let json = serde_json::to_string(&Request::Select {
            output: Output::new(2).unwrap(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"Select","output":2}"#);
    }
}
