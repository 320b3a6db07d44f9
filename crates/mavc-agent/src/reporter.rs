//! Reporter loop: periodic `ReportState` datagrams.

use mavc_core::{encode_datagram, Cid, Message, Payload, StateReport};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};

use crate::session::{until_closing, SessionShared};
use crate::vehicle::Vehicle;

/// Snapshot the vehicle's telemetry as a full state report.
pub fn sample_state(cid: Cid, vehicle: &Vehicle) -> StateReport {
    let telemetry = &vehicle.telemetry;
    StateReport::full(
        cid,
        telemetry.is_armed(),
        telemetry.flight_mode(),
        telemetry.current_position(),
    )
}

/// `socket` is connected to the vehicle's per-CID port on the monitor.
pub(crate) async fn run_reporter(shared: Arc<SessionShared>, socket: UdpSocket) {
    let mut ticker = interval(shared.config.report_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut state = shared.subscribe_state();

    loop {
        tokio::select! {
            _ = until_closing(&mut state) => break,
            _ = ticker.tick() => {
                let report = sample_state(shared.cid, &shared.vehicle);
                let bytes = match encode_datagram(&Message::from_drone(Payload::ReportState(report))) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::warn!(cid = shared.cid, error = %err, "Failed to encode state report");
                        continue;
                    }
                };
                // Reports are fire-and-forget; a lost one is replaced by the next tick.
                if let Err(err) = socket.send(&bytes).await {
                    tracing::warn!(cid = shared.cid, error = %err, "Failed to send state report");
                }
            }
        }
    }

    tracing::debug!(cid = shared.cid, "Reporter stopped");
}
