//! Peer registry and snapshot reconciliation.
//!
//! The registry is keyed by common name and mutated only through the
//! operations below. In the runtime it is owned by the router task, which
//! makes it single-writer; everything handed out is an owned copy.
//!
//! # Reconciliation
//!
//! Connect/disconnect notices arrive asynchronously while full snapshots
//! are polled periodically, so a peer can be briefly missing from a
//! snapshot it should be in. Eviction is therefore debounced: a peer is
//! removed only after it has been absent from more than
//! [`MISSING_CYCLE_LIMIT`] consecutive snapshots.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::peer::{CommonName, Peer, PeerView};
use crate::snapshot::{RouteRow, Snapshot};

/// A peer absent from more than this many consecutive snapshots is evicted.
pub const MISSING_CYCLE_LIMIT: u32 = 5;

/// What changed while applying one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Peers seen for the first time
    pub connected: Vec<CommonName>,

    /// Peers whose virtual address was supplied by the routing table
    pub addressed: Vec<(CommonName, String)>,

    /// Peers evicted after too many missed snapshots
    pub removed: Vec<CommonName>,
}

impl ReconcileOutcome {
    /// Returns true if the snapshot changed nothing worth reporting.
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.addressed.is_empty() && self.removed.is_empty()
    }
}

/// Mapping of peer identity to peer record.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    peers: HashMap<CommonName, Peer>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if no peers are known.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Looks up a peer by name.
    pub fn get(&self, name: &CommonName) -> Option<&Peer> {
        self.peers.get(name)
    }

    /// Returns true if a peer with this name is known.
    pub fn contains(&self, name: &CommonName) -> bool {
        self.peers.contains_key(name)
    }

    /// Returns an owned copy of one peer.
    pub fn view(&self, name: &CommonName) -> Option<PeerView> {
        self.peers.get(name).map(PeerView::from_peer)
    }

    /// Returns an owned copy of every peer, ordered by name.
    pub fn snapshot(&self) -> Vec<PeerView> {
        let mut views: Vec<PeerView> = self.peers.values().map(PeerView::from_peer).collect();
        views.sort_by(|a, b| a.common_name.cmp(&b.common_name));
        views
    }

    /// Merges a completed client env block into a peer.
    ///
    /// Creates the peer if it is unknown. Returns true when a new record
    /// was created.
    pub fn merge_env(&mut self, name: CommonName, env: BTreeMap<String, String>) -> bool {
        let mut created = false;
        let peer = self.peers.entry(name).or_insert_with_key(|name| {
            created = true;
            Peer::new(name.clone())
        });

        peer.env.extend(env);
        peer.touch();
        created
    }

    /// Applies a full snapshot to the registry.
    ///
    /// 1. Peers in the peer table are refreshed (or created) and their
    ///    missing counter reset.
    /// 2. Routing rows supply virtual addresses. Per peer the first host
    ///    row wins; a subnet row (`a.b.c.0/24`) is used only if there is
    ///    no host row.
    /// 3. Known peers absent from the peer table have their missing counter
    ///    incremented and are evicted once it exceeds [`MISSING_CYCLE_LIMIT`].
    pub fn reconcile(&mut self, snapshot: &Snapshot) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let mut checked = self.checked_set();

        for row in &snapshot.peers {
            if self.peers.contains_key(&row.common_name) {
                checked.remove(&row.common_name);
            } else {
                debug!(common_name = %row.common_name, "New peer in snapshot");
                outcome.connected.push(row.common_name.clone());
            }

            let peer = self
                .peers
                .entry(row.common_name.clone())
                .or_insert_with(|| Peer::new(row.common_name.clone()));

            peer.missing_cycles = 0;
            peer.real_address = Some(row.real_address.clone());
            peer.bytes_received = row.bytes_received;
            peer.bytes_sent = row.bytes_sent;
            peer.connected_since = Some(row.connected_since.clone());
            peer.touch();
        }

        for row in primary_routes(snapshot) {
            if let Some(peer) = self.peers.get_mut(&row.common_name) {
                peer.virtual_address = Some(row.virtual_address.clone());
                peer.last_ref = Some(row.last_ref.clone());
                outcome
                    .addressed
                    .push((row.common_name.clone(), row.virtual_address.clone()));
            }
        }

        let mut absent: Vec<CommonName> = checked.into_iter().collect();
        absent.sort();

        for name in absent {
            let evict = match self.peers.get_mut(&name) {
                Some(peer) => {
                    peer.missing_cycles += 1;
                    debug!(
                        common_name = %name,
                        missing = peer.missing_cycles,
                        "Peer missing from snapshot"
                    );
                    peer.missing_cycles > MISSING_CYCLE_LIMIT
                }
                None => false,
            };

            if evict {
                self.peers.remove(&name);
                outcome.removed.push(name);
            }
        }

        outcome
    }

    /// Names of every peer known before a snapshot is applied.
    fn checked_set(&self) -> HashSet<CommonName> {
        self.peers.keys().cloned().collect()
    }
}

/// One routing row per peer, in first-seen order, preferring host rows
/// over iroute subnets.
fn primary_routes(snapshot: &Snapshot) -> Vec<&RouteRow> {
    let mut chosen: Vec<&RouteRow> = Vec::new();
    let mut index: HashMap<&CommonName, usize> = HashMap::new();

    for row in &snapshot.routes {
        match index.get(&row.common_name) {
            Some(&slot) => {
                if let Some(current) = chosen.get_mut(slot) {
                    if current.is_subnet() && !row.is_subnet() {
                        *current = row;
                    }
                }
            }
            None => {
                index.insert(&row.common_name, chosen.len());
                chosen.push(row);
            }
        }
    }

    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{PeerRow, RouteRow};

    fn peer_row(name: &str) -> PeerRow {
        PeerRow {
            common_name: CommonName::new(name),
            real_address: "10.13.156.4:1194".to_string(),
            bytes_received: 12563,
            bytes_sent: 14885,
            connected_since: "Thu Feb 13 23:39:20 2014".to_string(),
        }
    }

    fn route_row(name: &str, address: &str) -> RouteRow {
        RouteRow {
            virtual_address: address.to_string(),
            common_name: CommonName::new(name),
            real_address: "10.13.156.4:1194".to_string(),
            last_ref: "Thu Feb 13 23:39:20 2014".to_string(),
        }
    }

    fn snapshot_with(peers: &[&str]) -> Snapshot {
        Snapshot {
            updated: "Thu Feb 13 23:39:20 2014".to_string(),
            peers: peers.iter().map(|name| peer_row(name)).collect(),
            routes: Vec::new(),
        }
    }

    #[test]
    fn test_new_peer_is_connected() {
        let mut registry = ClientRegistry::new();
        let outcome = registry.reconcile(&snapshot_with(&["VPN_client"]));

        assert_eq!(outcome.connected, vec![CommonName::new("VPN_client")]);
        assert!(outcome.removed.is_empty());

        let peer = registry.get(&CommonName::new("VPN_client")).unwrap();
        assert_eq!(peer.real_address.as_deref(), Some("10.13.156.4:1194"));
        assert_eq!(peer.bytes_received, 12563);
        assert_eq!(peer.bytes_sent, 14885);
        assert!(peer.virtual_address.is_none());
    }

    #[test]
    fn test_known_peer_is_refreshed_not_reconnected() {
        let mut registry = ClientRegistry::new();
        registry.reconcile(&snapshot_with(&["VPN_client"]));

        let mut snapshot = snapshot_with(&["VPN_client"]);
        if let Some(row) = snapshot.peers.first_mut() {
            row.bytes_sent = 20000;
        }
        let outcome = registry.reconcile(&snapshot);

        assert!(outcome.connected.is_empty());
        assert_eq!(
            registry.get(&CommonName::new("VPN_client")).unwrap().bytes_sent,
            20000
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_rows_create_one_record() {
        let mut registry = ClientRegistry::new();
        let outcome = registry.reconcile(&snapshot_with(&["shared", "shared"]));

        assert_eq!(outcome.connected.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_routing_row_assigns_address() {
        let mut registry = ClientRegistry::new();
        let mut snapshot = snapshot_with(&["VPN_client"]);
        snapshot.routes = vec![
            route_row("VPN_client", "192.168.11.4"),
            route_row("VPN_client", "192.168.50.0/24"),
            route_row("stranger", "192.168.11.9"),
        ];

        let outcome = registry.reconcile(&snapshot);

        assert_eq!(
            outcome.addressed,
            vec![(CommonName::new("VPN_client"), "192.168.11.4".to_string())]
        );
        let peer = registry.get(&CommonName::new("VPN_client")).unwrap();
        assert_eq!(peer.virtual_address.as_deref(), Some("192.168.11.4"));
        assert_eq!(peer.last_ref.as_deref(), Some("Thu Feb 13 23:39:20 2014"));
        assert!(!registry.contains(&CommonName::new("stranger")));
    }

    #[test]
    fn test_host_row_preferred_over_subnet() {
        let mut registry = ClientRegistry::new();
        let mut snapshot = snapshot_with(&["VPN_client"]);
        snapshot.routes = vec![
            route_row("VPN_client", "192.168.50.0/24"),
            route_row("VPN_client", "192.168.11.4"),
        ];

        let outcome = registry.reconcile(&snapshot);

        assert_eq!(
            outcome.addressed,
            vec![(CommonName::new("VPN_client"), "192.168.11.4".to_string())]
        );
    }

    #[test]
    fn test_subnet_row_used_without_host_row() {
        let mut registry = ClientRegistry::new();
        let mut snapshot = snapshot_with(&["VPN_client"]);
        snapshot.routes = vec![route_row("VPN_client", "192.168.50.0/24")];

        registry.reconcile(&snapshot);

        let peer = registry.get(&CommonName::new("VPN_client")).unwrap();
        assert_eq!(peer.virtual_address.as_deref(), Some("192.168.50.0/24"));
    }

    #[test]
    fn test_eviction_after_six_missed_snapshots() {
        let mut registry = ClientRegistry::new();
        for _ in 0..3 {
            registry.reconcile(&snapshot_with(&["VPN_client"]));
        }

        let mut removals = Vec::new();
        for cycle in 1..=10 {
            let outcome = registry.reconcile(&snapshot_with(&[]));
            if !outcome.removed.is_empty() {
                removals.push((cycle, outcome.removed));
            }
        }

        assert_eq!(removals, vec![(6, vec![CommonName::new("VPN_client")])]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_five_missed_snapshots_keep_peer() {
        let mut registry = ClientRegistry::new();
        registry.reconcile(&snapshot_with(&["VPN_client"]));

        for _ in 0..MISSING_CYCLE_LIMIT {
            let outcome = registry.reconcile(&snapshot_with(&[]));
            assert!(outcome.removed.is_empty());
        }

        let peer = registry.get(&CommonName::new("VPN_client")).unwrap();
        assert_eq!(peer.missing_cycles(), MISSING_CYCLE_LIMIT);
    }

    #[test]
    fn test_reappearing_peer_resets_counter() {
        let mut registry = ClientRegistry::new();
        registry.reconcile(&snapshot_with(&["VPN_client"]));

        for _ in 0..4 {
            registry.reconcile(&snapshot_with(&[]));
        }
        registry.reconcile(&snapshot_with(&["VPN_client"]));
        for _ in 0..5 {
            registry.reconcile(&snapshot_with(&[]));
        }

        let peer = registry.get(&CommonName::new("VPN_client")).unwrap();
        assert_eq!(peer.missing_cycles(), 5);
    }

    #[test]
    fn test_merge_env_creates_then_updates() {
        let mut registry = ClientRegistry::new();
        let name = CommonName::new("alice");

        let mut env = BTreeMap::new();
        env.insert("X509_0_CN".to_string(), "alice".to_string());
        assert!(registry.merge_env(name.clone(), env));

        let mut env = BTreeMap::new();
        env.insert("untrusted_ip".to_string(), "203.0.113.7".to_string());
        assert!(!registry.merge_env(name.clone(), env));

        let peer = registry.get(&name).unwrap();
        assert_eq!(peer.env.len(), 2);
        assert_eq!(peer.env.get("untrusted_ip").map(String::as_str), Some("203.0.113.7"));
    }

    #[test]
    fn test_snapshot_is_ordered_copy() {
        let mut registry = ClientRegistry::new();
        registry.reconcile(&snapshot_with(&["carol", "alice", "bob"]));

        let names: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|view| view.common_name.to_string())
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }
}
