//! Cluster registry: CID allocation, vehicle state and instruction fan-out.
//!
//! One rendezvous loop answers CID requests in arrival order. Each accepted
//! vehicle then gets its own stream task (framed instructions out,
//! acknowledgements in) and, unless its port is the rendezvous port, its own
//! report socket.

mod link;
mod rendezvous;

use chrono::Utc;
use dashmap::DashMap;
use mavc_core::protocol::vehicle_port;
use mavc_core::{
    encode_datagram, encode_frame, ActionRecord, Arrival, Cid, CidAssignment, Geofence, HomeHint,
    Message, Payload, StateReport, VehicleState,
};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::AbortHandle;

use crate::config::Config;
use crate::error::RegistryError;

const EVENT_CAPACITY: usize = 256;

/// A serialized, framed message shared by every recipient of a fan-out.
type Frame = Arc<Vec<u8>>;

/// State of a vehicle's instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// CID assigned, stream not connected yet
    AwaitingStream,
    Connected,
    Disconnected,
}

/// Traffic observed by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Registered { cid: Cid, host: IpAddr },
    StateUpdated(VehicleState),
    ActionArrived(Arrival),
    Disconnected { cid: Cid },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSnapshot {
    #[serde(flatten)]
    pub state: VehicleState,
    pub link: LinkState,
}

struct VehicleEntry {
    state: VehicleState,
    host: IpAddr,
    requested_from: SocketAddr,
    link: LinkState,
    outbound: mpsc::UnboundedSender<Frame>,
    tasks: Vec<AbortHandle>,
}

impl Drop for VehicleEntry {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct Registry {
    config: Config,
    vehicles: DashMap<Cid, VehicleEntry>,
    next_cid: AtomicU32,
    rendezvous: UdpSocket,
    events: broadcast::Sender<RegistryEvent>,
    bound_tx: mpsc::UnboundedSender<Cid>,
    bound_rx: Mutex<mpsc::UnboundedReceiver<Cid>>,
    shutdown: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl Registry {
    /// Bind the rendezvous socket and start answering CID requests.
    pub async fn bind(config: Config) -> Result<Arc<Self>, RegistryError> {
        let rendezvous = UdpSocket::bind((config.bind_host, config.base_port)).await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (bound_tx, bound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let registry = Arc::new(Self {
            config,
            vehicles: DashMap::new(),
            next_cid: AtomicU32::new(0),
            rendezvous,
            events,
            bound_tx,
            bound_rx: Mutex::new(bound_rx),
            shutdown,
            closed: AtomicBool::new(false),
        });

        tracing::info!(addr = ?registry.rendezvous.local_addr().ok(), "Registry listening for CID requests");
        tokio::spawn(rendezvous::run_rendezvous(registry.clone(), shutdown_rx));
        Ok(registry)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RegistryError> {
        Ok(self.rendezvous.local_addr()?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Wait for the next vehicle to finish binding (CID assigned and stream
    /// connected). Vehicles are returned in the order they bound.
    pub async fn register_vehicle(&self) -> Result<Cid, RegistryError> {
        let mut shutdown = self.shutdown.subscribe();
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }
        let mut bound = self.bound_rx.lock().await;
        tokio::select! {
            cid = bound.recv() => cid.ok_or(RegistryError::Closed),
            _ = shutdown.recv() => Err(RegistryError::Closed),
        }
    }

    /// Send one `DispatchActions` message to every vehicle the batch targets.
    ///
    /// The batch is serialized once; each recipient gets the whole batch and
    /// picks out its own records. Every target must be connected, otherwise
    /// nothing is sent. Returns the recipients.
    pub fn dispatch(&self, records: Vec<ActionRecord>) -> Result<Vec<Cid>, RegistryError> {
        let targets = targets_of(&records);
        for &cid in &targets {
            self.ensure_connected(cid)?;
        }
        if targets.is_empty() {
            return Ok(targets);
        }

        let frame = Arc::new(encode_frame(&Message::from_monitor(Payload::DispatchActions(
            records,
        )))?);
        for &cid in &targets {
            self.send_frame(cid, frame.clone())?;
        }
        tracing::info!(?targets, "Dispatched action batch");
        Ok(targets)
    }

    /// Replace a vehicle's geofence.
    pub fn set_geofence(&self, cid: Cid, fence: Geofence) -> Result<(), RegistryError> {
        self.ensure_connected(cid)?;
        let frame = encode_frame(&Message::from_monitor(Payload::SetGeofence(fence)))?;
        self.send_frame(cid, Arc::new(frame))?;
        tracing::info!(cid, radius_m = fence.radius_m, "Geofence sent");
        Ok(())
    }

    /// Tell a vehicle its mission is over and forget it.
    pub fn close_vehicle(&self, cid: Cid) -> Result<VehicleState, RegistryError> {
        let (_, entry) = self
            .vehicles
            .remove(&cid)
            .ok_or(RegistryError::UnknownVehicle(cid))?;
        if entry.link == LinkState::Connected {
            match encode_frame(&Message::from_monitor(Payload::Done)) {
                Ok(frame) => {
                    let _ = entry.outbound.send(Arc::new(frame));
                }
                Err(err) => tracing::warn!(cid, error = %err, "Failed to encode Done"),
            }
        }
        let state = entry.state.clone();
        drop(entry);

        let _ = self.events.send(RegistryEvent::Disconnected { cid });
        tracing::info!(cid, "Vehicle closed");
        Ok(state)
    }

    /// Most recently reported state of a vehicle.
    pub fn get_state(&self, cid: Cid) -> Result<VehicleState, RegistryError> {
        self.vehicles
            .get(&cid)
            .map(|entry| entry.state.clone())
            .ok_or(RegistryError::UnknownVehicle(cid))
    }

    pub fn snapshot(&self, cid: Cid) -> Option<VehicleSnapshot> {
        self.vehicles.get(&cid).map(|entry| VehicleSnapshot {
            state: entry.state.clone(),
            link: entry.link,
        })
    }

    /// All known vehicles, ordered by CID.
    pub fn snapshots(&self) -> Vec<VehicleSnapshot> {
        let mut snapshots: Vec<VehicleSnapshot> = self
            .vehicles
            .iter()
            .map(|entry| VehicleSnapshot {
                state: entry.state.clone(),
                link: entry.link,
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.state.cid);
        snapshots
    }

    pub fn list(&self) -> Vec<VehicleState> {
        self.snapshots().into_iter().map(|s| s.state).collect()
    }

    pub fn is_stale(&self, state: &VehicleState) -> bool {
        let threshold = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        state.is_stale(Utc::now(), threshold)
    }

    /// Stop accepting vehicles, end every session and drop all state.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(());

        let cids: Vec<Cid> = self.vehicles.iter().map(|entry| *entry.key()).collect();
        for cid in cids {
            let _ = self.close_vehicle(cid);
        }
        tracing::info!("Registry shut down");
    }

    fn ensure_connected(&self, cid: Cid) -> Result<(), RegistryError> {
        let entry = self
            .vehicles
            .get(&cid)
            .ok_or(RegistryError::UnknownVehicle(cid))?;
        if entry.link != LinkState::Connected {
            return Err(RegistryError::NotConnected(cid));
        }
        Ok(())
    }

    fn send_frame(&self, cid: Cid, frame: Frame) -> Result<(), RegistryError> {
        let entry = self
            .vehicles
            .get(&cid)
            .ok_or(RegistryError::UnknownVehicle(cid))?;
        entry
            .outbound
            .send(frame)
            .map_err(|_| RegistryError::NotConnected(cid))
    }

    /// Answer one `RequestCID`.
    async fn handle_request(self: &Arc<Self>, from: SocketAddr, home: Option<HomeHint>) {
        if let Some(cid) = self.pending_cid_for(from) {
            tracing::debug!(cid, %from, "Repeated CID request, re-sending assignment");
            self.send_assignment(cid, from).await;
            return;
        }

        let cid = self.next_cid.fetch_add(1, Ordering::SeqCst);
        let Some(port) = vehicle_port(self.config.base_port, cid) else {
            tracing::error!(cid, base_port = self.config.base_port, "CID has no port, refusing vehicle");
            return;
        };

        // Bound before replying so the vehicle's connect cannot race the bind.
        let listener = match TcpListener::bind((self.config.bind_host, port)).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(cid, port, error = %err, "Failed to bind vehicle stream port");
                return;
            }
        };
        let reports = if port == self.config.base_port {
            None
        } else {
            match UdpSocket::bind((self.config.bind_host, port)).await {
                Ok(socket) => Some(socket),
                Err(err) => {
                    tracing::error!(cid, port, error = %err, "Failed to bind vehicle report port");
                    return;
                }
            }
        };

        let host = from.ip();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let mut tasks = vec![tokio::spawn(link::run_stream(
            self.clone(),
            cid,
            host,
            listener,
            outbound_rx,
        ))
        .abort_handle()];
        if let Some(socket) = reports {
            tasks.push(tokio::spawn(link::run_reports(self.clone(), cid, host, socket)).abort_handle());
        }

        self.vehicles.insert(
            cid,
            VehicleEntry {
                state: VehicleState::new(cid, home, Utc::now()),
                host,
                requested_from: from,
                link: LinkState::AwaitingStream,
                outbound,
                tasks,
            },
        );

        self.send_assignment(cid, from).await;
        let _ = self.events.send(RegistryEvent::Registered { cid, host });
        tracing::info!(cid, %from, port, "Vehicle registered");
    }

    /// CID already allocated to a live session that asked from `from`.
    fn pending_cid_for(&self, from: SocketAddr) -> Option<Cid> {
        self.vehicles
            .iter()
            .find(|entry| entry.requested_from == from && entry.link != LinkState::Disconnected)
            .map(|entry| *entry.key())
    }

    async fn send_assignment(&self, cid: Cid, to: SocketAddr) {
        let reply = Message::from_monitor(Payload::AssignCid(CidAssignment { cid }));
        let sent = match encode_datagram(&reply) {
            Ok(bytes) => self.rendezvous.send_to(&bytes, to).await.map(drop),
            Err(err) => {
                tracing::error!(cid, error = %err, "Failed to encode CID assignment");
                return;
            }
        };
        if let Err(err) = sent {
            tracing::warn!(cid, %to, error = %err, "Failed to send CID assignment");
        }
    }

    /// Merge a state report received on `cid`'s channel from `from`.
    fn apply_report(&self, cid: Cid, from: IpAddr, report: &StateReport) {
        if report.cid != cid {
            tracing::debug!(cid, reported = report.cid, "Dropping report for another vehicle");
            return;
        }
        let Some(mut entry) = self.vehicles.get_mut(&cid) else {
            return;
        };
        if entry.link == LinkState::Disconnected {
            tracing::debug!(cid, "Dropping report for a disconnected vehicle");
            return;
        }
        if entry.host != from {
            tracing::debug!(cid, %from, "Dropping report from unexpected host");
            return;
        }
        entry.state.apply(report, Utc::now());
        let state = entry.state.clone();
        drop(entry);

        let _ = self.events.send(RegistryEvent::StateUpdated(state));
    }

    fn record_arrival(&self, cid: Cid, arrival: Arrival) {
        if arrival.cid != cid {
            tracing::debug!(cid, reported = arrival.cid, "Dropping acknowledgement for another vehicle");
            return;
        }
        tracing::info!(cid, step = arrival.step, "Action arrived");
        let _ = self.events.send(RegistryEvent::ActionArrived(arrival));
    }

    fn set_link(&self, cid: Cid, link: LinkState) -> bool {
        match self.vehicles.get_mut(&cid) {
            Some(mut entry) if entry.link != link => {
                entry.link = link;
                true
            }
            _ => false,
        }
    }

    fn mark_connected(&self, cid: Cid) {
        if self.set_link(cid, LinkState::Connected) {
            tracing::info!(cid, "Vehicle stream connected");
            let _ = self.bound_tx.send(cid);
        }
    }

    /// Freeze the entry as last-known state and release its report port.
    fn mark_disconnected(&self, cid: Cid) {
        let tasks = match self.vehicles.get_mut(&cid) {
            Some(mut entry) if entry.link != LinkState::Disconnected => {
                entry.link = LinkState::Disconnected;
                std::mem::take(&mut entry.tasks)
            }
            _ => return,
        };
        // Includes the calling stream task, which has no await left.
        for task in tasks {
            task.abort();
        }
        tracing::warn!(cid, "Vehicle stream disconnected");
        let _ = self.events.send(RegistryEvent::Disconnected { cid });
    }
}

/// Distinct CIDs addressed by a batch, ascending.
fn targets_of(records: &[ActionRecord]) -> Vec<Cid> {
    let mut targets: Vec<Cid> = records.iter().map(|record| record.cid).collect();
    targets.sort_unstable();
    targets.dedup();
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavc_core::{Action, ActionKind};

    #[test]
    fn test_targets_are_distinct() {
        let wait = || Action::new(ActionKind::Wait { time_s: 1.0 }, 0);
        let records = vec![
            ActionRecord::new(3, wait()),
            ActionRecord::new(1, wait()),
            ActionRecord::new(3, wait()),
        ];
        assert_eq!(targets_of(&records), vec![1, 3]);
        assert!(targets_of(&[]).is_empty());
    }
}
