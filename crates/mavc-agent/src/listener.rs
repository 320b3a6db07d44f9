//! Listener loop: reads framed monitor messages off the per-vehicle stream.

use mavc_core::protocol::READ_CHUNK_BYTES;
use mavc_core::{decode, Action, ActionRecord, Cid, FrameBuffer, Origin, Payload};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::session::{until_closing, SessionShared};

/// Actions of a dispatch batch addressed to `cid`, in batch order.
pub fn actions_for(cid: Cid, records: Vec<ActionRecord>) -> Vec<Action> {
    records
        .into_iter()
        .filter(|record| record.cid == cid)
        .map(|record| record.action)
        .collect()
}

pub(crate) async fn run_listener(shared: Arc<SessionShared>, mut reader: OwnedReadHalf) {
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut state = shared.subscribe_state();

    loop {
        tokio::select! {
            _ = until_closing(&mut state) => break,
            read = reader.read(&mut chunk) => match read {
                Ok(0) => {
                    tracing::info!(cid = shared.cid, "Monitor closed the stream");
                    shared.begin_close("stream closed by monitor");
                    break;
                }
                Ok(n) => {
                    frames.extend(&chunk[..n]);
                    for frame in frames.drain_frames() {
                        handle_frame(&shared, &frame);
                    }
                }
                Err(err) => {
                    tracing::warn!(cid = shared.cid, error = %err, "Stream read failed");
                    shared.begin_close("stream read failed");
                    break;
                }
            },
        }
    }

    tracing::debug!(cid = shared.cid, "Listener stopped");
}

fn handle_frame(shared: &SessionShared, frame: &[u8]) {
    let message = match decode(frame) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!(cid = shared.cid, error = %err, "Skipping malformed frame");
            return;
        }
    };
    if message.origin != Origin::Monitor {
        tracing::debug!(cid = shared.cid, "Skipping frame not sent by a monitor");
        return;
    }

    match message.payload {
        Payload::DispatchActions(records) => {
            let total = records.len();
            let actions = actions_for(shared.cid, records);
            tracing::debug!(cid = shared.cid, queued = actions.len(), total, "Dispatch received");
            shared.queue.extend(actions);
        }
        Payload::SetGeofence(fence) => shared.install_geofence(fence),
        Payload::Done => {
            tracing::info!(cid = shared.cid, "Monitor ended the session");
            shared.begin_close("done received");
        }
        other => {
            tracing::debug!(cid = shared.cid, message_type = %other.message_type(), "Ignoring unexpected message");
        }
    }
}
