//! Rendezvous loop: CID requests, plus reports for the vehicle whose port
//! coincides with the rendezvous port.

use mavc_core::protocol::MAX_DATAGRAM_BYTES;
use mavc_core::{decode, Cid, Origin, Payload};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::Registry;

/// CID whose per-vehicle port is the rendezvous port itself.
const RENDEZVOUS_CID: Cid = 0;

pub(super) async fn run_rendezvous(registry: Arc<Registry>, mut shutdown: broadcast::Receiver<()>) {
    let mut buf = [0u8; MAX_DATAGRAM_BYTES];

    loop {
        let (len, from) = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Rendezvous loop shutting down");
                break;
            }
            received = registry.rendezvous.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(err) => {
                    tracing::warn!(error = %err, "Rendezvous receive failed");
                    continue;
                }
            },
        };

        let message = match decode(&buf[..len]) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(%from, error = %err, "Ignoring malformed datagram");
                continue;
            }
        };
        if message.origin != Origin::Drone {
            tracing::debug!(%from, "Ignoring datagram not sent by a vehicle");
            continue;
        }

        match message.payload {
            Payload::RequestCid { home } => registry.handle_request(from, home).await,
            Payload::ReportState(report) => registry.apply_report(RENDEZVOUS_CID, from.ip(), &report),
            other => {
                tracing::debug!(%from, message_type = %other.message_type(), "Ignoring unexpected datagram");
            }
        }
    }
}
