//! CID handshake, vehicle side.
//!
//! Sends `RequestCID` to the monitor's rendezvous port and waits on the same
//! local socket for an `AssignCID` from the monitor host. Datagrams from any
//! other host, or that are not an assignment, are dropped.

use mavc_core::protocol::MAX_DATAGRAM_BYTES;
use mavc_core::{decode, encode_datagram, Cid, HomeHint, Message, Origin, Payload};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{sleep, timeout};

use crate::backoff::Backoff;
use crate::config::AgentConfig;
use crate::error::SessionError;

const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_MAX: Duration = Duration::from_secs(5);

/// Outcome of a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub cid: Cid,
    /// Rendezvous address the assignment came from
    pub monitor: SocketAddr,
}

/// Obtain a CID from the monitor.
///
/// Each attempt waits `handshake_timeout` for an answer; silent attempts are
/// retried with exponential back-off up to `handshake_attempts` times.
pub async fn request_cid(
    config: &AgentConfig,
    home: Option<HomeHint>,
) -> Result<Handshake, SessionError> {
    let monitor = resolve(&config.monitor_host, config.base_port).await?;
    let local: SocketAddr = match monitor {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    let request = encode_datagram(&Message::from_drone(Payload::RequestCid { home }))?;

    let attempts = config.handshake_attempts.max(1);
    let mut backoff = Backoff::new(RETRY_BASE, RETRY_MAX);

    for attempt in 1..=attempts {
        socket.send_to(&request, monitor).await?;
        tracing::debug!(%monitor, attempt, "Sent CID request");

        match timeout(config.handshake_timeout, await_assignment(&socket, monitor.ip())).await {
            Ok(Ok(cid)) => {
                tracing::info!(cid, %monitor, "CID assigned");
                return Ok(Handshake { cid, monitor });
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                tracing::warn!(%monitor, attempt, attempts, "No CID assignment before timeout");
                if attempt < attempts {
                    sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    Err(SessionError::HandshakeExhausted { monitor, attempts })
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, SessionError> {
    let mut addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
    // Prefer IPv4; the monitor binds an IPv4 wildcard by default.
    addrs.sort_by_key(|addr| !addr.is_ipv4());
    addrs
        .into_iter()
        .next()
        .ok_or_else(|| SessionError::Resolve(host.to_string()))
}

async fn await_assignment(socket: &UdpSocket, expected: IpAddr) -> std::io::Result<Cid> {
    let mut buf = [0u8; MAX_DATAGRAM_BYTES];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        if from.ip() != expected {
            tracing::debug!(%from, "Dropping datagram from unexpected host");
            continue;
        }
        match decode(&buf[..len]) {
            Ok(Message {
                origin: Origin::Monitor,
                payload: Payload::AssignCid(assignment),
            }) => return Ok(assignment.cid),
            Ok(other) => {
                tracing::debug!(message_type = %other.message_type(), "Ignoring non-assignment during handshake");
            }
            Err(err) => tracing::debug!(%from, error = %err, "Ignoring malformed datagram"),
        }
    }
}
