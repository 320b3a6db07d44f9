//! Vehicle session: lifecycle and the tasks that run while it is active.
//!
//! `Connecting -> Active -> Closing -> Closed`. The state lives in a watch
//! channel that every loop selects on. Entering `Closing`, from any loop or
//! from [`VehicleSession::close`], hands control to a supervisor task which
//! waits for the loops, lands an armed vehicle and then marks the session
//! `Closed`.

use mavc_core::protocol::vehicle_port;
use mavc_core::{encode_frame, Cid, Geofence, HomeHint, Message, Payload};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backoff::Backoff;
use crate::config::AgentConfig;
use crate::error::SessionError;
use crate::executor::run_executor;
use crate::geofence::{spawn_monitor, GeofenceHandle, GeofenceSettings};
use crate::handshake::{request_cid, Handshake};
use crate::listener::run_listener;
use crate::queue::ActionQueue;
use crate::reporter::run_reporter;
use crate::vehicle::{run_blocking, Vehicle};

/// Lifecycle of a vehicle session.
///
/// `Connecting` covers the handshake and channel setup inside
/// [`VehicleSession::connect`]; a returned session is already `Active`, so
/// callers observe `Active`, `Closing` and `Closed` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// State shared by the session's loops.
pub(crate) struct SessionShared {
    pub(crate) cid: Cid,
    pub(crate) config: AgentConfig,
    pub(crate) vehicle: Vehicle,
    pub(crate) queue: Arc<ActionQueue>,
    state: watch::Sender<SessionState>,
    outbound: mpsc::UnboundedSender<Message>,
    geofence: Mutex<Option<GeofenceHandle>>,
}

impl SessionShared {
    pub(crate) fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `Closing` unless already closing or closed.
    pub(crate) fn begin_close(&self, reason: &str) -> bool {
        let started = self.state.send_if_modified(|state| match state {
            SessionState::Connecting | SessionState::Active => {
                *state = SessionState::Closing;
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        });
        if started {
            tracing::info!(cid = self.cid, reason, "Session closing");
        }
        started
    }

    /// Queue a message for the stream writer.
    pub(crate) fn send(&self, payload: Payload) {
        if self.outbound.send(Message::from_drone(payload)).is_err() {
            tracing::debug!(cid = self.cid, "Stream writer gone, dropping message");
        }
    }

    /// Replace the active geofence and restart its monitor.
    pub(crate) fn install_geofence(&self, fence: Geofence) {
        if self.current_state() != SessionState::Active {
            return;
        }
        let handle = spawn_monitor(
            fence,
            GeofenceSettings {
                poll_interval: self.config.geofence_poll_interval,
                margin_m: self.config.geofence_margin_m,
            },
            self.vehicle.clone(),
            self.queue.clone(),
            self.subscribe_state(),
        );
        tracing::info!(cid = self.cid, radius_m = fence.radius_m, lat = fence.lat, lon = fence.lon, "Geofence installed");
        // The previous monitor, if any, stops when its handle drops here.
        self.lock_geofence().replace(handle);
    }

    fn active_geofence(&self) -> Option<Geofence> {
        self.lock_geofence().as_ref().map(GeofenceHandle::fence)
    }

    fn clear_geofence(&self) {
        self.lock_geofence().take();
    }

    fn lock_geofence(&self) -> std::sync::MutexGuard<'_, Option<GeofenceHandle>> {
        self.geofence.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves once the session has left `Active`.
pub(crate) async fn until_closing(state: &mut watch::Receiver<SessionState>) {
    loop {
        let active = matches!(
            *state.borrow_and_update(),
            SessionState::Connecting | SessionState::Active
        );
        if !active || state.changed().await.is_err() {
            return;
        }
    }
}

async fn until_closed(state: &mut watch::Receiver<SessionState>) {
    loop {
        let closed = *state.borrow_and_update() == SessionState::Closed;
        if closed || state.changed().await.is_err() {
            return;
        }
    }
}

struct SessionTasks {
    executor: JoinHandle<()>,
    reporter: JoinHandle<()>,
    listener: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// A vehicle's connection to the fleet monitor.
pub struct VehicleSession {
    shared: Arc<SessionShared>,
    monitor: SocketAddr,
}

impl VehicleSession {
    /// Handshake with the monitor, open the per-vehicle channels and start
    /// the session loops. The vehicle's current position is sent as the
    /// home hint.
    pub async fn connect(config: AgentConfig, vehicle: Vehicle) -> Result<Self, SessionError> {
        let here = vehicle.telemetry.current_position();
        let home = HomeHint {
            lat: here.lat,
            lon: here.lon,
        };
        let handshake = request_cid(&config, Some(home)).await?;
        Self::start(config, vehicle, handshake).await
    }

    /// Open the per-vehicle channels for an already assigned CID.
    pub async fn start(
        config: AgentConfig,
        vehicle: Vehicle,
        handshake: Handshake,
    ) -> Result<Self, SessionError> {
        let Handshake { cid, monitor } = handshake;
        let port = vehicle_port(config.base_port, cid).ok_or(SessionError::PortOutOfRange {
            cid,
            base_port: config.base_port,
        })?;
        let channel = SocketAddr::new(monitor.ip(), port);

        let stream = connect_stream(channel, config.connect_attempts).await?;
        let local: SocketAddr = match channel {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let report_socket = UdpSocket::bind(local).await?;
        report_socket.connect(channel).await?;

        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Connecting);

        let shared = Arc::new(SessionShared {
            cid,
            config,
            vehicle,
            queue: Arc::new(ActionQueue::new()),
            state: state_tx,
            outbound: outbound_tx,
            geofence: Mutex::new(None),
        });
        shared.state.send_replace(SessionState::Active);
        tracing::info!(cid, %channel, "Session active");

        let tasks = SessionTasks {
            executor: tokio::spawn(run_executor(shared.clone())),
            reporter: tokio::spawn(run_reporter(shared.clone(), report_socket)),
            listener: tokio::spawn(run_listener(shared.clone(), reader)),
            writer: tokio::spawn(run_writer(shared.clone(), writer, outbound_rx)),
        };
        tokio::spawn(supervise(shared.clone(), tasks));

        Ok(Self { shared, monitor })
    }

    pub fn cid(&self) -> Cid {
        self.shared.cid
    }

    /// Rendezvous address of the monitor this session is bound to.
    pub fn monitor(&self) -> SocketAddr {
        self.monitor
    }

    pub fn state(&self) -> SessionState {
        self.shared.current_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.subscribe_state()
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.shared.queue
    }

    pub fn geofence(&self) -> Option<Geofence> {
        self.shared.active_geofence()
    }

    /// Close the session and wait until it is `Closed`.
    ///
    /// An in-flight maneuver is allowed to finish; an armed vehicle is then
    /// landed in place. Calling this on a closed session does nothing.
    pub async fn close(&self) {
        self.shared.begin_close("close requested");
        self.closed().await;
    }

    /// Wait until the session is `Closed`, however it got there.
    pub async fn closed(&self) {
        let mut state = self.shared.subscribe_state();
        until_closed(&mut state).await;
    }
}

impl Drop for VehicleSession {
    fn drop(&mut self) {
        self.shared.begin_close("session dropped");
    }
}

async fn connect_stream(addr: SocketAddr, attempts: u32) -> Result<TcpStream, SessionError> {
    let attempts = attempts.max(1);
    let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(2));
    let mut attempt = 1;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(err) = stream.set_nodelay(true) {
                    tracing::debug!(error = %err, "Failed to set TCP_NODELAY");
                }
                return Ok(stream);
            }
            Err(err) if attempt < attempts => {
                tracing::debug!(%addr, attempt, error = %err, "Stream connect failed, retrying");
                tokio::time::sleep(backoff.next_delay()).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn run_writer(
    shared: Arc<SessionShared>,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let mut state = shared.subscribe_state();
    loop {
        let message = tokio::select! {
            biased;
            message = outbound.recv() => message,
            _ = until_closed(&mut state) => outbound.try_recv().ok(),
        };
        let Some(message) = message else { break };

        let frame = match encode_frame(&message) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(cid = shared.cid, error = %err, "Failed to encode outbound message");
                continue;
            }
        };
        if let Err(err) = writer.write_all(&frame).await {
            tracing::warn!(cid = shared.cid, error = %err, "Stream write failed");
            shared.begin_close("stream write failed");
            break;
        }
    }

    let _ = writer.shutdown().await;
    tracing::debug!(cid = shared.cid, "Writer stopped");
}

async fn supervise(shared: Arc<SessionShared>, tasks: SessionTasks) {
    let mut state = shared.subscribe_state();
    until_closing(&mut state).await;

    shared.clear_geofence();
    for (name, task) in [
        ("executor", tasks.executor),
        ("reporter", tasks.reporter),
        ("listener", tasks.listener),
    ] {
        if let Err(err) = task.await {
            tracing::error!(cid = shared.cid, task = name, error = %err, "Session task failed");
        }
    }

    if shared.vehicle.telemetry.is_armed() {
        tracing::info!(cid = shared.cid, "Landing armed vehicle before release");
        let actuator = shared.vehicle.actuator.clone();
        if let Err(err) = run_blocking(move || actuator.land(0.0, 0.0)).await {
            tracing::warn!(cid = shared.cid, error = %err, "Landing on close failed");
        }
    }

    shared.state.send_replace(SessionState::Closed);
    if let Err(err) = tasks.writer.await {
        tracing::error!(cid = shared.cid, task = "writer", error = %err, "Session task failed");
    }
    tracing::info!(cid = shared.cid, "Session closed");
}
