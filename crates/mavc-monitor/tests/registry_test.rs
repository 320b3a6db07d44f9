//! Registry tests over loopback, with real agent sessions where a full
//! vehicle is needed.

use mavc_agent::{ActuatorError, AgentConfig, SessionState, Vehicle, VehicleSession};
use mavc_agent::{Actuator, Telemetry};
use mavc_core::protocol::MAX_DATAGRAM_BYTES;
use mavc_core::{
    decode, encode_datagram, Action, ActionKind, ActionRecord, Arrival, Cid, Message, Payload,
    Position, StateReport,
};
use mavc_monitor::{Config, LinkState, Registry, RegistryError, RegistryEvent};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct SimpleVehicle {
    position: Mutex<Position>,
    armed: AtomicBool,
}

impl SimpleVehicle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            position: Mutex::new(Position::new(38.0, -114.0, 0.0)),
            armed: AtomicBool::new(false),
        })
    }
}

impl Actuator for SimpleVehicle {
    fn arm_and_takeoff(&self, alt: f64) -> Result<Position, ActuatorError> {
        self.armed.store(true, Ordering::SeqCst);
        let mut position = self.position.lock().unwrap();
        position.alt = alt;
        Ok(*position)
    }

    fn go_to(&self, lat: f64, lon: f64, alt: f64) -> Result<Position, ActuatorError> {
        let position = Position::new(lat, lon, alt);
        *self.position.lock().unwrap() = position;
        Ok(position)
    }

    fn go_by(&self, _north_m: f64, _east_m: f64, alt: f64) -> Result<Position, ActuatorError> {
        let mut position = self.position.lock().unwrap();
        position.alt = alt;
        Ok(*position)
    }

    fn land(&self, _lat: f64, _lon: f64) -> Result<(), ActuatorError> {
        self.armed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn return_to_base(&self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

impl Telemetry for SimpleVehicle {
    fn current_position(&self) -> Position {
        *self.position.lock().unwrap()
    }

    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    fn flight_mode(&self) -> String {
        "GUIDED".to_string()
    }
}

async fn start_registry() -> Arc<Registry> {
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    let mut config = Config::local(port);
    config.stale_after = Duration::from_secs(60);
    Registry::bind(config).await.expect("bind registry")
}

fn agent_config(registry: &Registry) -> AgentConfig {
    AgentConfig::new("127.0.0.1", registry.config().base_port)
        .with_report_interval(Duration::from_millis(50))
        .with_executor_idle_poll(Duration::from_millis(20))
        .with_handshake(Duration::from_millis(500), 3)
}

async fn connect_vehicle(registry: &Registry) -> VehicleSession {
    connect_with(registry, SimpleVehicle::new()).await
}

async fn connect_with(registry: &Registry, vehicle: Arc<SimpleVehicle>) -> VehicleSession {
    VehicleSession::connect(agent_config(registry), Vehicle::new(vehicle))
        .await
        .expect("session")
}

/// Raw datagram-only client for handshake-level tests.
struct RawClient {
    socket: UdpSocket,
    rendezvous: SocketAddr,
}

impl RawClient {
    async fn new(registry: &Registry) -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            rendezvous: registry.local_addr().unwrap(),
        }
    }

    async fn send_to(&self, payload: Payload, to: SocketAddr) {
        let bytes = encode_datagram(&Message::from_drone(payload)).unwrap();
        self.socket.send_to(&bytes, to).await.unwrap();
    }

    async fn request_cid(&self) -> Cid {
        self.send_to(Payload::RequestCid { home: None }, self.rendezvous)
            .await;
        let mut buf = [0u8; MAX_DATAGRAM_BYTES];
        let len = timeout(WAIT, self.socket.recv(&mut buf))
            .await
            .expect("no assignment")
            .unwrap();
        match decode(&buf[..len]).unwrap().payload {
            Payload::AssignCid(assignment) => assignment.cid,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn vehicle_addr(&self, cid: Cid) -> SocketAddr {
        SocketAddr::new(self.rendezvous.ip(), self.rendezvous.port() + cid as u16)
    }
}

async fn next_state_update(events: &mut broadcast::Receiver<RegistryEvent>, cid: Cid) {
    timeout(WAIT, async {
        loop {
            if let Ok(RegistryEvent::StateUpdated(state)) = events.recv().await {
                if state.cid == cid {
                    return;
                }
            }
        }
    })
    .await
    .expect("no state update");
}

fn partial(cid: Cid, alt: f64) -> StateReport {
    StateReport {
        cid,
        armed: None,
        mode: None,
        lat: None,
        lon: None,
        alt: Some(alt),
    }
}

#[tokio::test]
async fn test_cids_follow_arrival_order() {
    let registry = start_registry().await;
    let started_first = RawClient::new(&registry).await;
    let started_second = RawClient::new(&registry).await;

    // The client created second asks first.
    assert_eq!(started_second.request_cid().await, 0);
    assert_eq!(started_first.request_cid().await, 1);

    let cids: Vec<Cid> = registry.list().iter().map(|s| s.cid).collect();
    assert_eq!(cids, vec![0, 1]);
    registry.shutdown();
}

#[tokio::test]
async fn test_repeated_request_gets_same_cid() {
    let registry = start_registry().await;
    let client = RawClient::new(&registry).await;

    let first = client.request_cid().await;
    let again = client.request_cid().await;

    assert_eq!(first, again);
    assert_eq!(registry.list().len(), 1);
    registry.shutdown();
}

#[tokio::test]
async fn test_duplicate_request_after_connect_keeps_cid() {
    let registry = start_registry().await;
    let client = RawClient::new(&registry).await;
    let cid = client.request_cid().await;
    let _stream = TcpStream::connect(client.vehicle_addr(cid)).await.unwrap();
    assert_eq!(timeout(WAIT, registry.register_vehicle()).await.unwrap().unwrap(), cid);

    // A late copy of the original request.
    assert_eq!(client.request_cid().await, cid);

    let links: Vec<(Cid, LinkState)> = registry
        .snapshots()
        .iter()
        .map(|snapshot| (snapshot.state.cid, snapshot.link))
        .collect();
    assert_eq!(links, vec![(cid, LinkState::Connected)]);
    registry.shutdown();
}

#[tokio::test]
async fn test_partial_reports_merge() {
    let registry = start_registry().await;
    let mut events = registry.subscribe();
    let zero = RawClient::new(&registry).await;
    let one = RawClient::new(&registry).await;
    assert_eq!(zero.request_cid().await, 0);
    assert_eq!(one.request_cid().await, 1);

    // CID 0 reports through the rendezvous port, CID 1 through its own.
    for (client, cid) in [(&zero, 0), (&one, 1)] {
        let full = StateReport::full(cid, true, "GUIDED", Position::new(38.5, -114.5, 3.0));
        client
            .send_to(Payload::ReportState(full), client.vehicle_addr(cid))
            .await;
        next_state_update(&mut events, cid).await;

        client
            .send_to(Payload::ReportState(partial(cid, 12.0)), client.vehicle_addr(cid))
            .await;
        next_state_update(&mut events, cid).await;

        let state = registry.get_state(cid).unwrap();
        assert!(state.armed);
        assert_eq!(state.mode, "GUIDED");
        assert_eq!((state.lat, state.lon, state.alt), (38.5, -114.5, 12.0));
        assert!(state.last_seen_at.is_some());
    }
    registry.shutdown();
}

#[tokio::test]
async fn test_report_for_other_vehicle_is_ignored() {
    let registry = start_registry().await;
    let mut events = registry.subscribe();
    let zero = RawClient::new(&registry).await;
    let one = RawClient::new(&registry).await;
    zero.request_cid().await;
    one.request_cid().await;

    // CID 1's report sent to CID 0's port is dropped; the valid one after it lands.
    one.send_to(Payload::ReportState(partial(1, 50.0)), one.vehicle_addr(0))
        .await;
    one.send_to(Payload::ReportState(partial(1, 7.0)), one.vehicle_addr(1))
        .await;
    next_state_update(&mut events, 1).await;

    assert_eq!(registry.get_state(1).unwrap().alt, 7.0);
    assert!(registry.get_state(0).unwrap().last_seen_at.is_none());
    registry.shutdown();
}

#[tokio::test]
async fn test_register_vehicle_returns_bound_vehicles() {
    let registry = start_registry().await;

    let session = connect_vehicle(&registry).await;
    let cid = timeout(WAIT, registry.register_vehicle()).await.unwrap().unwrap();

    assert_eq!(cid, session.cid());
    assert_eq!(registry.snapshot(cid).unwrap().link, LinkState::Connected);
    session.close().await;
    registry.shutdown();
    assert!(matches!(registry.register_vehicle().await, Err(RegistryError::Closed)));
}

#[tokio::test]
async fn test_synced_action_is_acknowledged_exactly_once() {
    let registry = start_registry().await;

    let mut sessions = Vec::new();
    for expected in 0..4 {
        let session = connect_vehicle(&registry).await;
        assert_eq!(session.cid(), expected);
        assert_eq!(timeout(WAIT, registry.register_vehicle()).await.unwrap().unwrap(), expected);
        sessions.push(session);
    }

    let go_to = ActionKind::GoTo {
        lat: 38.0,
        lon: -114.0,
        alt: 5.0,
        time_s: 0.0,
    };
    let mut events = registry.subscribe();
    let recipients = registry
        .dispatch(vec![ActionRecord::new(3, Action::new(go_to, 7).synced())])
        .unwrap();
    assert_eq!(recipients, vec![3]);

    let mut arrivals = Vec::new();
    let _ = timeout(Duration::from_millis(800), async {
        loop {
            if let Ok(RegistryEvent::ActionArrived(arrival)) = events.recv().await {
                arrivals.push(arrival);
            }
        }
    })
    .await;
    assert_eq!(arrivals, vec![Arrival { cid: 3, step: 7 }]);

    for session in &sessions {
        session.close().await;
    }
    registry.shutdown();
}

#[tokio::test]
async fn test_dispatch_fans_out_one_record_per_vehicle() {
    let registry = start_registry().await;

    let mut fleet = Vec::new();
    for _ in 0..3 {
        let vehicle = SimpleVehicle::new();
        let session = connect_with(&registry, vehicle.clone()).await;
        timeout(WAIT, registry.register_vehicle()).await.unwrap().unwrap();
        fleet.push((session, vehicle));
    }

    let target_lat = |cid: Cid| 38.0 + f64::from(cid) * 0.001;
    let records = (0..3)
        .map(|cid| {
            let go_to = ActionKind::GoTo {
                lat: target_lat(cid),
                lon: -114.0,
                alt: 5.0,
                time_s: 0.0,
            };
            ActionRecord::new(cid, Action::new(go_to, 10 + i64::from(cid)).synced())
        })
        .collect();
    let mut events = registry.subscribe();
    assert_eq!(registry.dispatch(records).unwrap(), vec![0, 1, 2]);

    let mut arrivals = Vec::new();
    timeout(WAIT, async {
        while arrivals.len() < 3 {
            if let Ok(RegistryEvent::ActionArrived(arrival)) = events.recv().await {
                arrivals.push(arrival);
            }
        }
    })
    .await
    .expect("missing acknowledgements");
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        if let RegistryEvent::ActionArrived(arrival) = event {
            arrivals.push(arrival);
        }
    }

    arrivals.sort_by_key(|arrival| arrival.cid);
    let expected: Vec<Arrival> = (0..3)
        .map(|cid| Arrival {
            cid,
            step: 10 + i64::from(cid),
        })
        .collect();
    assert_eq!(arrivals, expected);

    // Each vehicle flew only its own record.
    for (session, vehicle) in &fleet {
        assert_eq!(vehicle.current_position().lat, target_lat(session.cid()));
    }
    for (session, _) in &fleet {
        session.close().await;
    }
    registry.shutdown();
}

#[tokio::test]
async fn test_dispatch_to_unbound_vehicle_is_refused() {
    let registry = start_registry().await;
    let client = RawClient::new(&registry).await;
    let cid = client.request_cid().await;

    let wait = Action::new(ActionKind::Wait { time_s: 1.0 }, 1);
    let err = registry
        .dispatch(vec![ActionRecord::new(cid, wait.clone())])
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotConnected(c) if c == cid));

    let err = registry
        .dispatch(vec![ActionRecord::new(cid + 1, wait)])
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownVehicle(_)));
    registry.shutdown();
}

#[tokio::test]
async fn test_close_vehicle_ends_its_session() {
    let registry = start_registry().await;
    let session = connect_vehicle(&registry).await;
    let cid = timeout(WAIT, registry.register_vehicle()).await.unwrap().unwrap();

    registry.close_vehicle(cid).unwrap();
    timeout(WAIT, session.closed()).await.unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(registry.get_state(cid), Err(RegistryError::UnknownVehicle(_))));
    registry.shutdown();
}

#[tokio::test]
async fn test_vehicle_hangup_keeps_last_state() {
    let registry = start_registry().await;
    let mut events = registry.subscribe();
    let session = connect_vehicle(&registry).await;
    let cid = timeout(WAIT, registry.register_vehicle()).await.unwrap().unwrap();
    next_state_update(&mut events, cid).await;

    session.close().await;
    timeout(WAIT, async {
        loop {
            if let Ok(RegistryEvent::Disconnected { cid: gone }) = events.recv().await {
                if gone == cid {
                    return;
                }
            }
        }
    })
    .await
    .expect("no disconnect");

    let snapshot = registry.snapshot(cid).unwrap();
    assert_eq!(snapshot.link, LinkState::Disconnected);
    assert_eq!(snapshot.state.mode, "GUIDED");
    registry.shutdown();
}

#[tokio::test]
async fn test_disconnected_vehicle_state_is_frozen() {
    let registry = start_registry().await;
    let mut events = registry.subscribe();
    let zero = RawClient::new(&registry).await;
    let one = RawClient::new(&registry).await;
    zero.request_cid().await;
    assert_eq!(one.request_cid().await, 1);

    let stream = TcpStream::connect(one.vehicle_addr(1)).await.unwrap();
    assert_eq!(timeout(WAIT, registry.register_vehicle()).await.unwrap().unwrap(), 1);
    let full = StateReport::full(1, true, "GUIDED", Position::new(38.5, -114.5, 3.0));
    one.send_to(Payload::ReportState(full), one.vehicle_addr(1)).await;
    next_state_update(&mut events, 1).await;
    let before = registry.get_state(1).unwrap();

    drop(stream);
    timeout(WAIT, async {
        loop {
            if let Ok(RegistryEvent::Disconnected { cid: 1 }) = events.recv().await {
                return;
            }
        }
    })
    .await
    .expect("no disconnect");

    one.send_to(Payload::ReportState(partial(1, 99.0)), one.vehicle_addr(1))
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.get_state(1).unwrap(), before);

    // The report port is released.
    timeout(WAIT, async {
        while UdpSocket::bind(one.vehicle_addr(1)).await.is_err() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("report port still bound");
    registry.shutdown();
}
