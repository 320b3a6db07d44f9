//! Simulated vehicle.
//!
//! Flies straight lines at a fixed cruise speed and climb rate, one tick at a
//! time. A return to base preempts whatever maneuver is in flight.

use mavc_agent::{Actuator, ActuatorError, Telemetry};
use mavc_core::geo::{offset_position, EARTH_RADIUS_M};
use mavc_core::Position;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Horizontal distance at which a move counts as arrived.
const ARRIVAL_RADIUS_M: f64 = 1.0;
/// Vertical tolerance when holding or reaching an altitude.
const ALTITUDE_TOLERANCE_M: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub cruise_speed_mps: f64,
    pub max_speed_mps: f64,
    pub climb_rate_mps: f64,
    pub tick: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cruise_speed_mps: 5.0,
            max_speed_mps: 15.0,
            climb_rate_mps: 2.5,
            tick: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct SimState {
    position: Position,
    armed: bool,
    mode: String,
    airspeed_mps: f64,
}

pub struct SimVehicle {
    config: SimConfig,
    home: (f64, f64),
    state: Mutex<SimState>,
    /// Bumped by every return to base; maneuvers started earlier abort.
    generation: AtomicU64,
}

impl SimVehicle {
    pub fn new(home_lat: f64, home_lon: f64, config: SimConfig) -> Self {
        Self {
            config,
            home: (home_lat, home_lon),
            state: Mutex::new(SimState {
                position: Position::new(home_lat, home_lon, 0.0),
                armed: false,
                mode: "STABILIZE".to_string(),
                airspeed_mps: config.cruise_speed_mps,
            }),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_mode(&self, mode: &str) {
        self.lock().mode = mode.to_string();
    }

    fn check_preempted(&self, generation: u64) -> Result<(), ActuatorError> {
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(ActuatorError::Failed("preempted by return to base".to_string()));
        }
        Ok(())
    }

    /// Fly in a straight line to a target, then hold.
    fn fly_to(&self, lat: f64, lon: f64, alt: f64, generation: u64) -> Result<Position, ActuatorError> {
        let dt = self.config.tick.as_secs_f64();
        loop {
            self.check_preempted(generation)?;
            {
                let mut state = self.lock();
                if !state.armed {
                    return Err(ActuatorError::Failed("vehicle is not armed".to_string()));
                }
                let here = state.position;
                let (north_m, east_m) = meters_between(here.lat, here.lon, lat, lon);
                let horizontal = north_m.hypot(east_m);
                let vertical = alt - here.alt;
                if horizontal <= ARRIVAL_RADIUS_M && vertical.abs() <= ALTITUDE_TOLERANCE_M {
                    return Ok(here);
                }

                let step = (state.airspeed_mps * dt).min(horizontal);
                let (next_lat, next_lon) = if horizontal > 0.0 {
                    offset_position(
                        here.lat,
                        here.lon,
                        north_m / horizontal * step,
                        east_m / horizontal * step,
                    )
                } else {
                    (here.lat, here.lon)
                };
                let climb = (self.config.climb_rate_mps * dt).min(vertical.abs()) * vertical.signum();
                state.position = Position::new(next_lat, next_lon, here.alt + climb);
            }
            thread::sleep(self.config.tick);
        }
    }

    /// Descend to the ground and disarm.
    fn descend(&self, generation: Option<u64>) -> Result<(), ActuatorError> {
        let dt = self.config.tick.as_secs_f64();
        loop {
            if let Some(generation) = generation {
                self.check_preempted(generation)?;
            }
            {
                let mut state = self.lock();
                if state.position.alt <= ALTITUDE_TOLERANCE_M {
                    state.position.alt = 0.0;
                    state.armed = false;
                    return Ok(());
                }
                state.position.alt = (state.position.alt - self.config.climb_rate_mps * dt).max(0.0);
            }
            thread::sleep(self.config.tick);
        }
    }
}

/// North/east meters from one point to another.
fn meters_between(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64) {
    let north = (lat2 - lat1).to_radians() * EARTH_RADIUS_M;
    let east = (lon2 - lon1).to_radians() * EARTH_RADIUS_M * lat1.to_radians().cos();
    (north, east)
}

impl Actuator for SimVehicle {
    fn arm_and_takeoff(&self, target_alt: f64) -> Result<Position, ActuatorError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let here = {
            let mut state = self.lock();
            state.armed = true;
            state.mode = "GUIDED".to_string();
            state.position
        };
        tracing::debug!(target_alt, "Sim: arming and taking off");

        // Done once within 95% of the target altitude.
        let reached = self.fly_to(here.lat, here.lon, target_alt, generation)?;
        if reached.alt < target_alt * 0.95 {
            return Err(ActuatorError::Failed("takeoff did not reach altitude".to_string()));
        }
        Ok(reached)
    }

    fn go_to(&self, lat: f64, lon: f64, alt: f64) -> Result<Position, ActuatorError> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.set_mode("GUIDED");
        self.fly_to(lat, lon, alt, generation)
    }

    fn go_by(&self, north_m: f64, east_m: f64, alt: f64) -> Result<Position, ActuatorError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let here = self.current_position();
        let (lat, lon) = offset_position(here.lat, here.lon, north_m, east_m);
        self.set_mode("GUIDED");
        self.fly_to(lat, lon, alt, generation)
    }

    fn land(&self, lat: f64, lon: f64) -> Result<(), ActuatorError> {
        let generation = self.generation.load(Ordering::SeqCst);
        if lat != 0.0 || lon != 0.0 {
            let alt = self.current_position().alt;
            self.fly_to(lat, lon, alt, generation)?;
        }
        self.set_mode("LAND");
        self.descend(Some(generation))
    }

    fn return_to_base(&self) -> Result<(), ActuatorError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_mode("RTL");
        tracing::info!("Sim: returning to base");

        let alt = self.current_position().alt;
        if self.is_armed() {
            self.fly_to(self.home.0, self.home.1, alt, generation)?;
        }
        self.descend(Some(generation))
    }

    fn set_airspeed(&self, speed_mps: f64) -> Result<(), ActuatorError> {
        if !speed_mps.is_finite() || speed_mps <= 0.0 {
            return Err(ActuatorError::Failed(format!("invalid airspeed {speed_mps}")));
        }
        self.lock().airspeed_mps = speed_mps.min(self.config.max_speed_mps);
        Ok(())
    }
}

impl Telemetry for SimVehicle {
    fn current_position(&self) -> Position {
        self.lock().position
    }

    fn is_armed(&self) -> bool {
        self.lock().armed
    }

    fn flight_mode(&self) -> String {
        self.lock().mode.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavc_core::planar_distance_m;
    use std::sync::Arc;

    fn fast() -> SimVehicle {
        SimVehicle::new(
            38.0,
            -114.0,
            SimConfig {
                cruise_speed_mps: 200.0,
                max_speed_mps: 400.0,
                climb_rate_mps: 100.0,
                tick: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn test_takeoff_and_goto() {
        let sim = fast();
        let up = sim.arm_and_takeoff(10.0).unwrap();
        assert!(up.alt >= 9.5);
        assert!(sim.is_armed());
        assert_eq!(sim.flight_mode(), "GUIDED");

        let there = sim.go_to(38.001, -114.0, 10.0).unwrap();
        assert!(planar_distance_m(there.lat, there.lon, 38.001, -114.0) <= 1.5);
    }

    #[test]
    fn test_go_by_moves_relative() {
        let sim = fast();
        sim.arm_and_takeoff(5.0).unwrap();
        let there = sim.go_by(100.0, 0.0, 5.0).unwrap();
        let moved = planar_distance_m(38.0, -114.0, there.lat, there.lon);
        assert!((moved - 100.0).abs() < 2.0, "moved {moved}");
    }

    #[test]
    fn test_moves_need_armed_vehicle() {
        let sim = fast();
        assert!(matches!(sim.go_to(38.001, -114.0, 5.0), Err(ActuatorError::Failed(_))));
    }

    #[test]
    fn test_land_in_place_disarms() {
        let sim = fast();
        sim.arm_and_takeoff(5.0).unwrap();
        sim.go_by(20.0, 20.0, 5.0).unwrap();
        let before = sim.current_position();

        sim.land(0.0, 0.0).unwrap();
        let after = sim.current_position();
        assert!(!sim.is_armed());
        assert_eq!(after.alt, 0.0);
        assert_eq!((after.lat, after.lon), (before.lat, before.lon));
    }

    #[test]
    fn test_return_to_base_preempts_move() {
        let sim = Arc::new(SimVehicle::new(
            38.0,
            -114.0,
            SimConfig {
                cruise_speed_mps: 50.0,
                max_speed_mps: 50.0,
                climb_rate_mps: 50.0,
                tick: Duration::from_millis(2),
            },
        ));
        sim.arm_and_takeoff(5.0).unwrap();

        let mover = {
            let sim = sim.clone();
            thread::spawn(move || sim.go_by(10_000.0, 0.0, 5.0))
        };
        thread::sleep(Duration::from_millis(50));
        sim.return_to_base().unwrap();

        assert!(matches!(mover.join().unwrap(), Err(ActuatorError::Failed(_))));
        let home = sim.current_position();
        assert!(planar_distance_m(home.lat, home.lon, 38.0, -114.0) <= 1.5);
        assert!(!sim.is_armed());
    }

    #[test]
    fn test_airspeed_is_clamped() {
        let sim = fast();
        sim.set_airspeed(10_000.0).unwrap();
        assert_eq!(sim.lock().airspeed_mps, 400.0);
        assert!(sim.set_airspeed(0.0).is_err());
    }
}
