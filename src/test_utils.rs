//! Shared helpers for unit tests: a loopback fake device and a recording notifier.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::device::LinkOptions;
use crate::notification::{Notice, Notifier};

/// Link options for tests: ephemeral local port and a short deadline
pub(crate) fn test_link_options() -> LinkOptions {
    LinkOptions {
        local_port: 0,
        timeout: Duration::from_millis(300),
        ..LinkOptions::default()
    }
}

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// A UDP "switch box" on 127.0.0.1 that answers with a scripted responder
pub(crate) struct FakeDevice {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    silent: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl FakeDevice {
    /// Device that echoes every command back, like real firmware that accepted it
    pub(crate) async fn echo() -> Self {
        Self::spawn(|cmd| Some(cmd.to_string())).await
    }

    /// Device whose reply to each command is decided by `responder` (`None` = no reply)
    pub(crate) async fn spawn(
        responder: impl FnMut(&str) -> Option<String> + Send + 'static,
    ) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake device socket");
        let addr = socket.local_addr().expect("fake device has no address");
        let received = Arc::new(Mutex::new(Vec::new()));
        let silent = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(Self::serve(
            socket,
            Box::new(responder),
            Arc::clone(&received),
            Arc::clone(&silent),
        ));

        Self {
            addr,
            received,
            silent,
            task,
        }
    }

    async fn serve(
        socket: UdpSocket,
        mut responder: Responder,
        received: Arc<Mutex<Vec<String>>>,
        silent: Arc<AtomicBool>,
    ) {
        let mut buf = [0u8; 512];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            let command = String::from_utf8_lossy(&buf[..len]).to_string();
            received.lock().unwrap().push(command.clone());

            if silent.load(Ordering::SeqCst) {
                continue;
            }
            if let Some(reply) = responder(&command) {
                let _ = socket.send_to(reply.as_bytes(), from).await;
            }
        }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Address string as a user would configure it
    pub(crate) fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Every command received so far, in order
    pub(crate) fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Stop answering (commands are still recorded)
    pub(crate) fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Notifier that keeps every notice for later inspection
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub(crate) fn titles(&self) -> Vec<String> {
        self.notices().into_iter().map(|n| n.title).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}
