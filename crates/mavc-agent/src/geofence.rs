//! Geofence monitor.
//!
//! Polls telemetry against the active fence. On breach it clears the action
//! queue and commands a return to base directly, bypassing the executor. It
//! fires once per excursion and re-arms when the vehicle is back inside.

use mavc_core::Geofence;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::queue::ActionQueue;
use crate::session::{until_closing, SessionState};
use crate::vehicle::{run_blocking, Vehicle};

/// A running monitor for one fence. Dropping the handle stops the monitor.
#[derive(Debug)]
pub struct GeofenceHandle {
    fence: Geofence,
    task: JoinHandle<()>,
}

impl GeofenceHandle {
    pub fn fence(&self) -> Geofence {
        self.fence
    }
}

impl Drop for GeofenceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GeofenceSettings {
    pub poll_interval: Duration,
    pub margin_m: f64,
}

pub(crate) fn spawn_monitor(
    fence: Geofence,
    settings: GeofenceSettings,
    vehicle: Vehicle,
    queue: Arc<ActionQueue>,
    state: watch::Receiver<SessionState>,
) -> GeofenceHandle {
    let task = tokio::spawn(run_monitor(fence, settings, vehicle, queue, state));
    GeofenceHandle { fence, task }
}

async fn run_monitor(
    fence: Geofence,
    settings: GeofenceSettings,
    vehicle: Vehicle,
    queue: Arc<ActionQueue>,
    mut state: watch::Receiver<SessionState>,
) {
    let mut ticker = interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut breached = false;

    loop {
        tokio::select! {
            _ = until_closing(&mut state) => break,
            _ = ticker.tick() => {}
        }

        let here = vehicle.telemetry.current_position();
        let outside = fence.is_breached(here.lat, here.lon, settings.margin_m);
        if !outside {
            breached = false;
            continue;
        }
        if breached {
            continue;
        }
        breached = true;

        let dropped = queue.clear();
        tracing::warn!(
            distance_m = fence.distance_from_center(here.lat, here.lon),
            radius_m = fence.radius_m,
            dropped,
            "Geofence breached, returning to base"
        );

        // Detached: a replaced or stopped monitor must not abort the return.
        let actuator = vehicle.actuator.clone();
        tokio::spawn(async move {
            if let Err(err) = run_blocking(move || actuator.return_to_base()).await {
                tracing::error!(error = %err, "Return to base failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActuatorError;
    use crate::vehicle::{Actuator, Telemetry};
    use mavc_core::{geo::offset_position, Action, ActionKind, Position};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const CENTER: (f64, f64) = (38.0, -114.0);

    #[derive(Default)]
    struct FakeVehicle {
        position: Mutex<Position>,
        returns: AtomicUsize,
    }

    impl FakeVehicle {
        fn move_north(&self, meters: f64) {
            let (lat, lon) = offset_position(CENTER.0, CENTER.1, meters, 0.0);
            *self.position.lock().unwrap() = Position::new(lat, lon, 10.0);
        }
    }

    impl Actuator for FakeVehicle {
        fn arm_and_takeoff(&self, alt: f64) -> Result<Position, ActuatorError> {
            Ok(Position::new(CENTER.0, CENTER.1, alt))
        }
        fn go_to(&self, lat: f64, lon: f64, alt: f64) -> Result<Position, ActuatorError> {
            Ok(Position::new(lat, lon, alt))
        }
        fn go_by(&self, _: f64, _: f64, alt: f64) -> Result<Position, ActuatorError> {
            Ok(Position::new(CENTER.0, CENTER.1, alt))
        }
        fn land(&self, _: f64, _: f64) -> Result<(), ActuatorError> {
            Ok(())
        }
        fn return_to_base(&self) -> Result<(), ActuatorError> {
            self.returns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Telemetry for FakeVehicle {
        fn current_position(&self) -> Position {
            *self.position.lock().unwrap()
        }
        fn is_armed(&self) -> bool {
            true
        }
        fn flight_mode(&self) -> String {
            "GUIDED".to_string()
        }
    }

    struct Harness {
        fake: Arc<FakeVehicle>,
        queue: Arc<ActionQueue>,
        _state: watch::Sender<SessionState>,
        handle: GeofenceHandle,
    }

    fn start(radius_m: f64, north_m: f64) -> Harness {
        let fake = Arc::new(FakeVehicle::default());
        fake.move_north(north_m);
        let queue = Arc::new(ActionQueue::new());
        queue.extend((1..=3).map(|step| Action::new(ActionKind::Wait { time_s: 5.0 }, step)));
        let (tx, rx) = watch::channel(SessionState::Active);
        let handle = spawn_monitor(
            Geofence::new(radius_m, CENTER.0, CENTER.1),
            GeofenceSettings {
                poll_interval: Duration::from_millis(10),
                margin_m: 0.1,
            },
            Vehicle::new(fake.clone()),
            queue.clone(),
            rx,
        );
        Harness {
            fake,
            queue,
            _state: tx,
            handle,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_breach_clears_queue_and_returns_once() {
        let h = start(50.0, 80.0);
        settle().await;

        assert!(h.queue.is_empty());
        assert_eq!(h.fake.returns.load(Ordering::SeqCst), 1);

        // Still outside: no repeat.
        settle().await;
        assert_eq!(h.fake.returns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inside_fence_is_left_alone() {
        let h = start(50.0, 20.0);
        settle().await;

        assert_eq!(h.queue.len(), 3);
        assert_eq!(h.fake.returns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rearms_after_reentry() {
        let h = start(50.0, 80.0);
        settle().await;
        h.fake.move_north(10.0);
        settle().await;
        h.fake.move_north(90.0);
        settle().await;

        assert_eq!(h.fake.returns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_monitor() {
        let h = start(50.0, 20.0);
        drop(h.handle);
        h.fake.move_north(200.0);
        settle().await;

        assert_eq!(h.queue.len(), 3);
        assert_eq!(h.fake.returns.load(Ordering::SeqCst), 0);
    }
}
