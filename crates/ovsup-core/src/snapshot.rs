//! Typed rows of a full client-table snapshot.
//!
//! The protocol crate turns the daemon's `status` dump into these rows;
//! the registry reconciles against them.

use crate::peer::CommonName;

/// One row of the peer table.
///
/// Columns: Common Name, Real Address, Bytes Received, Bytes Sent, Connected Since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRow {
    pub common_name: CommonName,
    pub real_address: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connected_since: String,
}

/// One row of the routing table.
///
/// Columns: Virtual Address, Common Name, Real Address, Last Ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRow {
    pub virtual_address: String,
    pub common_name: CommonName,
    pub real_address: String,
    pub last_ref: String,
}

/// A point-in-time dump of connected peers and their routes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// "Updated" timestamp as printed by the daemon
    pub updated: String,
    pub peers: Vec<PeerRow>,
    pub routes: Vec<RouteRow>,
}

impl RouteRow {
    /// Returns true for iroute subnet rows such as `192.168.50.0/24`.
    pub fn is_subnet(&self) -> bool {
        self.virtual_address.contains('/')
    }
}
