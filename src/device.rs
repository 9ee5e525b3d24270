//! UDP link to the switch box
//!
//! A [`DeviceLink`] owns one UDP socket bound to the well-known client port and one
//! peer address. It performs single-shot request/reply exchanges with a deadline and
//! never retries on its own: every failure is reported to the caller, which decides
//! whether to reconnect.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::protocol::{CLIENT_PORT, DEVICE_PORT, EXCHANGE_TIMEOUT, MAX_DATAGRAM, OutputIndex, parse_reply};

/// Failures talking to the device
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Address empty, unresolvable, or resolved somewhere other than requested
    #[error("device not reachable at '{address}': {reason}")]
    NotReachable { address: String, reason: String },

    /// Local client port could not be bound
    #[error("could not bind UDP port {port} (is another program using it?): {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// No reply within the deadline
    #[error("no reply from device within {} ms", .0.as_millis())]
    Timeout(Duration),

    /// Socket-level failure while sending or receiving
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// A reply arrived from a different address than the one dialed
    #[error("reply came from {learned} instead of the configured device")]
    AddressChanged { learned: SocketAddr },

    /// Reply body is not a decimal integer
    #[error("unrecognized reply '{body}'")]
    Unrecognized { body: String },
}

impl DeviceError {
    /// Whether the link must be considered down after this error
    #[must_use]
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::NotReachable { .. } | Self::Bind { .. } | Self::Timeout(_) | Self::Io(_)
        )
    }
}

/// Ports and deadline used by a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Local port to bind; `0` picks an ephemeral port
    pub local_port: u16,
    /// Port appended to addresses that do not carry one
    pub device_port: u16,
    pub timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            local_port: CLIENT_PORT,
            device_port: DEVICE_PORT,
            timeout: EXCHANGE_TIMEOUT,
        }
    }
}

/// A live link plus the device's answer to the connect probe
#[derive(Debug)]
pub struct Connected {
    pub link: DeviceLink,
    /// Wire value the device sent in reply to the status query
    pub probe_reply: i32,
}

/// Exclusive owner of the UDP socket and peer address
#[derive(Debug)]
pub struct DeviceLink {
    // Not connect()ed, so replies from a device that changed address still arrive
    socket: UdpSocket,
    peer: SocketAddr,
    timeout: Duration,
}

impl DeviceLink {
    /// Resolve `address`, bind the client port and probe the device
    ///
    /// Only a literal IPv4 `host[:port]` is accepted; hostnames never match exactly and
    /// are rejected.
    ///
    /// # Errors
    /// `NotReachable` if the address is empty, does not resolve, or resolves to a
    /// different address than requested; `Bind` if the local port is taken; any
    /// exchange error if the probe fails; `Unrecognized` if the probe reply is not a
    /// known output index.
    pub async fn connect(address: &str, options: &LinkOptions) -> Result<Connected, DeviceError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(DeviceError::NotReachable {
                address: String::new(),
                reason: "no device address configured".to_string(),
            });
        }

        let target = with_default_port(address, options.device_port);
        let peer = resolve(&target).await?;

        let socket = UdpSocket::bind(("0.0.0.0", options.local_port))
            .await
            .map_err(|source| DeviceError::Bind {
                port: options.local_port,
                source,
            })?;

        debug!(
            "Bound {:?}, dialing device at {}",
            socket.local_addr().ok(),
            peer
        );

        let mut link = Self {
            socket,
            peer,
            timeout: options.timeout,
        };
        let probe_reply = link.exchange(OutputIndex::StatusQuery).await?;
        if OutputIndex::from_wire(probe_reply).is_none() {
            return Err(DeviceError::Unrecognized {
                body: probe_reply.to_string(),
            });
        }
        info!("Device at {} answered status query with {}", peer, probe_reply);

        Ok(Connected { link, probe_reply })
    }

    /// Send one command and wait for the device's reply
    ///
    /// Taking `&mut self` keeps at most one request outstanding per link.
    ///
    /// # Errors
    /// `Timeout` when nothing arrives before the deadline, `Io` on socket errors,
    /// `AddressChanged` when the reply comes from another address, and `Unrecognized`
    /// when the body is not an integer.
    pub async fn exchange(&mut self, command: OutputIndex) -> Result<i32, DeviceError> {
        self.discard_stale();

        let body = command.encode();
        debug!("Sending {} ({}) to {}", command, command.to_wire(), self.peer);
        self.socket.send_to(&body, self.peer).await?;

        let deadline = self.timeout;
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, from) = tokio::time::timeout(deadline, self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| DeviceError::Timeout(deadline))??;

        if from != self.peer {
            return Err(DeviceError::AddressChanged { learned: from });
        }

        let reply = &buf[..len];
        parse_reply(reply).ok_or_else(|| DeviceError::Unrecognized {
            body: String::from_utf8_lossy(reply).trim().to_string(),
        })
    }

    /// Address of the device this link talks to
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Local address of the client socket
    ///
    /// # Errors
    /// Returns an error if the socket cannot report its address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Drop late replies to earlier, timed-out exchanges so they are not taken as the
    /// answer to the next command.
    fn discard_stale(&self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while let Ok((len, from)) = self.socket.try_recv_from(&mut buf) {
            trace!(
                "Discarding stale datagram from {}: {:?}",
                from,
                String::from_utf8_lossy(&buf[..len])
            );
        }
    }
}

/// Append the device port unless the address already ends in one
#[must_use]
pub fn with_default_port(address: &str, port: u16) -> String {
    let has_port = address
        .rsplit_once(':')
        .is_some_and(|(host, p)| !host.is_empty() && !host.contains(':') && p.parse::<u16>().is_ok());

    if has_port {
        address.to_string()
    } else {
        format!("{address}:{port}")
    }
}

/// Host part of a learned address, as stored in the settings
#[must_use]
pub fn host_of(addr: SocketAddr, device_port: u16) -> String {
    if addr.port() == device_port {
        addr.ip().to_string()
    } else {
        addr.to_string()
    }
}

async fn resolve(target: &str) -> Result<SocketAddr, DeviceError> {
    let not_reachable = |reason: String| DeviceError::NotReachable {
        address: target.to_string(),
        reason,
    };

    let mut candidates = tokio::net::lookup_host(target)
        .await
        .map_err(|e| not_reachable(format!("could not resolve: {e}")))?;

    let resolved = candidates
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| not_reachable("no IPv4 address".to_string()))?;

    // A partial or malformed address can resolve to something unrelated; only accept
    // an exact match.
    if resolved.to_string() != target {
        return Err(not_reachable(format!("resolved to {resolved}")));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeDevice, test_link_options};
    use test_case::test_case;

    #[test_case("192.168.1.20", "192.168.1.20:4210")]
    #[test_case("192.168.1.20:5000", "192.168.1.20:5000")]
    #[test_case("10.0.0.1:notaport", "10.0.0.1:notaport:4210")]
    fn test_with_default_port(input: &str, expected: &str) {
        assert_eq!(with_default_port(input, 4210), expected);
    }

    #[test]
    fn test_host_of_strips_default_port() {
        let addr: SocketAddr = "10.0.0.9:4210".parse().unwrap();
        assert_eq!(host_of(addr, 4210), "10.0.0.9");
        let other: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        assert_eq!(host_of(other, 4210), "10.0.0.9:5000");
    }

    #[test]
    fn test_link_failure_classification() {
        assert!(DeviceError::Timeout(Duration::from_secs(1)).is_link_failure());
        assert!(DeviceError::Io(io::Error::other("boom")).is_link_failure());
        assert!(!DeviceError::Unrecognized { body: "x".into() }.is_link_failure());
        let learned = "10.0.0.2:4210".parse().unwrap();
        assert!(!DeviceError::AddressChanged { learned }.is_link_failure());
    }

    #[tokio::test]
    async fn test_connect_probes_device() {
        let device = FakeDevice::echo().await;
        let connected = DeviceLink::connect(&device.address(), &test_link_options())
            .await
            .unwrap();

        assert_eq!(connected.probe_reply, -2);
        assert_eq!(connected.link.peer(), device.addr());
        assert_eq!(device.received(), vec!["-2".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_address() {
        let err = DeviceLink::connect("  ", &test_link_options()).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotReachable { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_connect_rejects_address_that_resolves_elsewhere() {
        // "localhost" resolves to 127.0.0.1, which is not the literal that was asked for
        let device = FakeDevice::echo().await;
        let address = format!("localhost:{}", device.addr().port());
        let err = DeviceLink::connect(&address, &test_link_options())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotReachable { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_connect_rejects_hostname() {
        let err = DeviceLink::connect("localhost", &test_link_options())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotReachable { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_connect_fails_on_out_of_range_probe_reply() {
        let device = FakeDevice::spawn(|_| Some("17".to_string())).await;
        let err = DeviceLink::connect(&device.address(), &test_link_options())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Unrecognized { ref body } if body == "17"), "{err}");
    }

    #[tokio::test]
    async fn test_exchange_returns_reply() {
        let device = FakeDevice::spawn(|cmd| match cmd {
            "-2" => Some("-2".to_string()),
            other => Some(format!("{other}\n")),
        })
        .await;
        let mut link = DeviceLink::connect(&device.address(), &test_link_options())
            .await
            .unwrap()
            .link;

        let reply = link
            .exchange(OutputIndex::Output(crate::protocol::Output::ALL[2]))
            .await
            .unwrap();
        assert_eq!(reply, 2);
    }

    #[tokio::test]
    async fn test_exchange_times_out_after_one_second() {
        let device = FakeDevice::spawn(|cmd| (cmd == "-2").then(|| "-2".to_string())).await;
        let options = LinkOptions {
            local_port: 0,
            ..LinkOptions::default()
        };
        let mut link = DeviceLink::connect(&device.address(), &options)
            .await
            .unwrap()
            .link;

        let started = std::time::Instant::now();
        let err = link.exchange(OutputIndex::Muted).await.unwrap_err();

        assert!(matches!(err, DeviceError::Timeout(d) if d == EXCHANGE_TIMEOUT), "{err}");
        assert!(err.is_link_failure());
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_exchange_reports_unrecognized_body() {
        let device = FakeDevice::spawn(|cmd| match cmd {
            "-2" => Some("-2".to_string()),
            _ => Some("hello".to_string()),
        })
        .await;
        let mut link = DeviceLink::connect(&device.address(), &test_link_options())
            .await
            .unwrap()
            .link;

        let err = link.exchange(OutputIndex::Muted).await.unwrap_err();
        assert!(matches!(err, DeviceError::Unrecognized { ref body } if body == "hello"));
    }

    #[tokio::test]
    async fn test_reply_from_other_address_is_address_learning() {
        let device = FakeDevice::echo().await;
        let mut link = DeviceLink::connect(&device.address(), &test_link_options())
            .await
            .unwrap()
            .link;

        let imposter = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let imposter_addr = imposter.local_addr().unwrap();
        let client_port = link.local_addr().unwrap().port();

        // Silence the real device, then answer from the imposter
        device.set_silent(true);
        let answer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            imposter
                .send_to(b"1", ("127.0.0.1", client_port))
                .await
                .unwrap();
        });

        let err = link.exchange(OutputIndex::Muted).await.unwrap_err();
        answer.await.unwrap();

        match err {
            DeviceError::AddressChanged { learned } => assert_eq!(learned, imposter_addr),
            other => panic!("expected AddressChanged, got {other}"),
        }
    }
}
