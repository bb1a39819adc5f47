//! Peer entities - one record per connected tunnel client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Environment key holding the certificate subject common name.
///
/// Client env blocks are only merged into the registry when this key is
/// present, since the common name is the peer identity.
pub const COMMON_NAME_ENV_KEY: &str = "X509_0_CN";

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identity of a peer: the common name of its certificate.
///
/// Connection ids (CID) are per tunnel session and change on reconnect,
/// so they are never used as registry keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommonName(String);

impl CommonName {
    /// Creates a new CommonName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommonName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for CommonName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Peer
// ============================================================================

/// A connected tunnel client as known to the registry.
///
/// Counters and timestamps are stored as the daemon reported them. The
/// missing-cycle counter is private to the reconciliation algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Peer identity
    pub common_name: CommonName,

    /// Public endpoint (`ip:port`) the tunnel comes from
    pub real_address: Option<String>,

    /// Address assigned inside the tunnel, unknown until a routing row arrives
    pub virtual_address: Option<String>,

    /// Bytes received from the peer
    pub bytes_received: u64,

    /// Bytes sent to the peer
    pub bytes_sent: u64,

    /// "Connected Since" as printed by the daemon
    pub connected_since: Option<String>,

    /// "Last Ref" from the routing table
    pub last_ref: Option<String>,

    /// Key/value pairs from `>CLIENT:ENV` blocks (certificate fields etc.)
    pub env: BTreeMap<String, String>,

    /// When this record was created locally
    pub first_seen: DateTime<Utc>,

    /// When this record was last refreshed locally
    pub updated_at: DateTime<Utc>,

    pub(crate) missing_cycles: u32,
}

impl Peer {
    /// Creates an empty record for a newly seen peer.
    pub fn new(common_name: CommonName) -> Self {
        let now = Utc::now();
        Self {
            common_name,
            real_address: None,
            virtual_address: None,
            bytes_received: 0,
            bytes_sent: 0,
            connected_since: None,
            last_ref: None,
            env: BTreeMap::new(),
            first_seen: now,
            updated_at: now,
            missing_cycles: 0,
        }
    }

    /// Number of consecutive snapshots this peer has been absent from.
    pub fn missing_cycles(&self) -> u32 {
        self.missing_cycles
    }

    /// Marks the record as refreshed.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Peer View
// ============================================================================

/// Owned, serializable copy of a peer handed to readers outside the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerView {
    pub common_name: CommonName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_address: Option<String>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ref: Option<String>,
    pub env: BTreeMap<String, String>,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PeerView {
    /// Copies a peer record.
    pub fn from_peer(peer: &Peer) -> Self {
        Self {
            common_name: peer.common_name.clone(),
            real_address: peer.real_address.clone(),
            virtual_address: peer.virtual_address.clone(),
            bytes_received: peer.bytes_received,
            bytes_sent: peer.bytes_sent,
            connected_since: peer.connected_since.clone(),
            last_ref: peer.last_ref.clone(),
            env: peer.env.clone(),
            first_seen: peer.first_seen,
            updated_at: peer.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_name_display() {
        let name = CommonName::new("VPN_client");
        assert_eq!(name.to_string(), "VPN_client");
        assert_eq!(name.as_str(), "VPN_client");
        assert_eq!(CommonName::from("VPN_client"), name);
    }

    #[test]
    fn test_new_peer_is_empty() {
        let peer = Peer::new(CommonName::new("alice"));
        assert_eq!(peer.missing_cycles(), 0);
        assert!(peer.virtual_address.is_none());
        assert!(peer.env.is_empty());
        assert_eq!(peer.first_seen, peer.updated_at);
    }

    #[test]
    fn test_view_serialization_skips_unknown_addresses() {
        let mut peer = Peer::new(CommonName::new("alice"));
        peer.real_address = Some("10.13.156.4:1194".to_string());

        let view = PeerView::from_peer(&peer);
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["common_name"], "alice");
        assert_eq!(json["real_address"], "10.13.156.4:1194");
        assert!(json.get("virtual_address").is_none());
    }
}
