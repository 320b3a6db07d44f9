//! Executor loop: pops actions in order and drives the actuator.

use mavc_core::{planar_distance_m, ActionKind, Arrival, Payload};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ActuatorError;
use crate::session::{SessionShared, SessionState};
use crate::vehicle::{run_blocking, Vehicle};

pub(crate) async fn run_executor(shared: Arc<SessionShared>) {
    let mut state = shared.subscribe_state();
    let idle = shared.config.executor_idle_poll;

    // Checked between actions, so an in-flight maneuver always finishes.
    while *state.borrow_and_update() == SessionState::Active {
        let Some(action) = shared.queue.pop() else {
            tokio::select! {
                _ = shared.queue.wait_for_push(idle) => {}
                _ = state.changed() => {}
            }
            continue;
        };

        tracing::info!(cid = shared.cid, step = action.step, action = action.kind.name(), "Executing action");
        match execute_action(&shared.vehicle, &action.kind).await {
            Ok(()) => {
                if action.sync {
                    shared.send(Payload::ActionArrived(Arrival {
                        cid: shared.cid,
                        step: action.step,
                    }));
                }
            }
            Err(ActuatorError::ConnectionLost) => {
                tracing::error!(cid = shared.cid, step = action.step, "Lost connection to vehicle");
                shared.begin_close("vehicle connection lost");
                break;
            }
            Err(err) => {
                tracing::warn!(cid = shared.cid, step = action.step, error = %err, "Action failed, skipping");
            }
        }
    }

    tracing::debug!(cid = shared.cid, "Executor stopped");
}

/// Run one action to completion.
///
/// A non-zero time budget on a move is turned into an airspeed
/// (`distance / time`) before the move starts.
pub async fn execute_action(vehicle: &Vehicle, kind: &ActionKind) -> Result<(), ActuatorError> {
    let actuator = vehicle.actuator.clone();
    match *kind {
        ActionKind::ArmAndTakeoff { alt } => {
            run_blocking(move || actuator.arm_and_takeoff(alt)).await?;
        }
        ActionKind::GoTo { lat, lon, alt, time_s } => {
            let speed = if time_s > 0.0 {
                let here = vehicle.telemetry.current_position();
                Some(planar_distance_m(here.lat, here.lon, lat, lon) / time_s)
            } else {
                None
            };
            run_blocking(move || {
                if let Some(speed) = speed {
                    actuator.set_airspeed(speed)?;
                }
                actuator.go_to(lat, lon, alt)
            })
            .await?;
        }
        ActionKind::GoBy {
            north_m,
            east_m,
            alt,
            time_s,
        } => {
            let speed = (time_s > 0.0).then(|| north_m.hypot(east_m) / time_s);
            run_blocking(move || {
                if let Some(speed) = speed {
                    actuator.set_airspeed(speed)?;
                }
                actuator.go_by(north_m, east_m, alt)
            })
            .await?;
        }
        ActionKind::Land { lat, lon } => {
            run_blocking(move || actuator.land(lat, lon)).await?;
        }
        ActionKind::Wait { time_s } => {
            let hold = Duration::try_from_secs_f64(time_s).unwrap_or(Duration::ZERO);
            tokio::time::sleep(hold).await;
        }
    }
    Ok(())
}
