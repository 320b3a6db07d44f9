//! Per-vehicle channels on the monitor side.

use mavc_core::protocol::{MAX_DATAGRAM_BYTES, READ_CHUNK_BYTES};
use mavc_core::{decode, Cid, FrameBuffer, Origin, Payload};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

use super::{Frame, Registry};

/// Accept the vehicle's stream, then read acknowledgements until it closes.
///
/// Aborting this task leaves the writer running so frames already queued,
/// such as `Done`, still go out before the write side closes.
pub(super) async fn run_stream(
    registry: Arc<Registry>,
    cid: Cid,
    host: IpAddr,
    listener: TcpListener,
    outbound: mpsc::UnboundedReceiver<Frame>,
) {
    let stream = loop {
        match listener.accept().await {
            Ok((stream, peer)) if peer.ip() == host => break stream,
            Ok((_, peer)) => {
                tracing::warn!(cid, %peer, "Rejecting stream from unexpected host");
            }
            Err(err) => {
                tracing::warn!(cid, error = %err, "Accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };
    drop(listener);
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(cid, error = %err, "Failed to set TCP_NODELAY");
    }

    let (mut reader, writer) = stream.into_split();
    let writer = tokio::spawn(run_writer(cid, writer, outbound));
    registry.mark_connected(cid);

    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(cid, error = %err, "Stream read failed");
                break;
            }
        };
        frames.extend(&chunk[..n]);
        for frame in frames.drain_frames() {
            let message = match decode(&frame) {
                Ok(message) if message.origin == Origin::Drone => message,
                Ok(_) => {
                    tracing::debug!(cid, "Ignoring frame not sent by a vehicle");
                    continue;
                }
                Err(err) => {
                    tracing::debug!(cid, error = %err, "Ignoring malformed frame");
                    continue;
                }
            };
            match message.payload {
                Payload::ActionArrived(arrival) => registry.record_arrival(cid, arrival),
                Payload::ReportState(report) => registry.apply_report(cid, host, &report),
                other => {
                    tracing::debug!(cid, message_type = %other.message_type(), "Ignoring unexpected frame");
                }
            }
        }
    }

    writer.abort();
    registry.mark_disconnected(cid);
}

/// Runs until every sender is gone, then closes the write side.
async fn run_writer(cid: Cid, mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            tracing::warn!(cid, error = %err, "Stream write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Receive state reports on the vehicle's own datagram port.
pub(super) async fn run_reports(registry: Arc<Registry>, cid: Cid, host: IpAddr, socket: UdpSocket) {
    let mut buf = [0u8; MAX_DATAGRAM_BYTES];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                tracing::debug!(cid, error = %err, "Report receive failed");
                continue;
            }
        };
        if from.ip() != host {
            tracing::debug!(cid, %from, "Dropping datagram from unexpected host");
            continue;
        }
        match decode(&buf[..len]) {
            Ok(message) if message.origin == Origin::Drone => match message.payload {
                Payload::ReportState(report) => registry.apply_report(cid, host, &report),
                other => {
                    tracing::debug!(cid, message_type = %other.message_type(), "Ignoring unexpected datagram");
                }
            },
            Ok(_) => tracing::debug!(cid, "Ignoring datagram not sent by a vehicle"),
            Err(err) => tracing::debug!(cid, error = %err, "Ignoring malformed datagram"),
        }
    }
}
