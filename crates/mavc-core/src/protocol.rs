//! Protocol constants and endpoint arithmetic.

use crate::models::Cid;

/// Well-known rendezvous port on the monitor host.
pub const DEFAULT_BASE_PORT: u16 = 4396;

/// Largest datagram either side will send or expect.
pub const MAX_DATAGRAM_BYTES: usize = 1024;

/// Chunk size for stream reads.
pub const READ_CHUNK_BYTES: usize = 1024;

/// Wire value of the header's origin field for vehicle-sent messages.
pub const DRONE_ORIGIN: &str = "MAVCluster_Drone";

/// Wire value of the header's origin field for monitor-sent messages.
pub const MONITOR_ORIGIN: &str = "MAVCluster_Monitor";

/// Per-vehicle port: `base_port + cid`.
///
/// Returns `None` when the sum does not fit in a port number.
pub fn vehicle_port(base_port: u16, cid: Cid) -> Option<u16> {
    u16::try_from(cid)
        .ok()
        .and_then(|offset| base_port.checked_add(offset))
}
