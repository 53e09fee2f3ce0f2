//! Routing table of known-good peers
//!
//! A flat concurrent map keyed by node ID. Lookups, the receive path and the
//! maintenance task all share it; the map is sharded so unrelated updates
//! do not contend.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nott_protocol::{three_way_distance, NodeId};
use std::sync::Arc;
use tracing::trace;

use crate::peer::Peer;

pub struct RoutingTable {
    local_id: NodeId,
    entries: DashMap<NodeId, Arc<Peer>>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        RoutingTable {
            local_id,
            entries: DashMap::new(),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a peer, or merge its liveness into the entry already known
    /// under the same ID
    pub fn insert_or_refresh(&self, peer: Arc<Peer>) {
        // Don't add ourselves
        if *peer.id() == self.local_id {
            return;
        }

        match self.entries.entry(*peer.id()) {
            Entry::Occupied(existing) => {
                if existing.get().address() == peer.address() {
                    existing.get().merge_in_timestamps(&peer);
                } else {
                    trace!(
                        "Keeping {} at {}, ignoring claim from {}",
                        peer.id(),
                        existing.get().address(),
                        peer.address()
                    );
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(peer);
            }
        }
    }

    /// Update an existing entry only; unknown peers are not added
    pub fn refresh(&self, peer: &Peer) {
        if let Some(existing) = self.entries.get(peer.id()) {
            existing.merge_in_timestamps(peer);
        }
    }

    /// Record a successful response from `id`
    pub fn notify_of_response(&self, id: &NodeId) {
        if let Some(existing) = self.entries.get(id) {
            existing.signal_response();
        }
    }

    /// Record a request timeout for `id`, evicting it once it needs replacement
    pub fn on_timeout(&self, id: &NodeId) {
        let removed = self.entries.remove_if(id, |_, peer| {
            peer.signal_request_timeout();
            peer.needs_replacement()
        });
        if let Some((id, peer)) = removed {
            trace!("Evicted {} at {} after timeouts", id, peer.address());
        }
    }

    pub fn find_peer_by_id(&self, id: &NodeId) -> Option<Arc<Peer>> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Up to `n` eligible peers sorted by distance to `key`
    pub fn closest_peers(&self, key: &NodeId, n: usize) -> Vec<Arc<Peer>> {
        let mut peers: Vec<Arc<Peer>> = self
            .entries
            .iter()
            .filter(|entry| entry.value().eligible_for_nodes_list())
            .map(|entry| entry.value().clone())
            .collect();

        peers.sort_by(|a, b| three_way_distance(key, a.id(), b.id()));
        peers.truncate(n);
        peers
    }

    /// Drop every entry that needs replacement, returning how many went
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, peer| !peer.needs_replacement());
        before.saturating_sub(self.entries.len())
    }

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
