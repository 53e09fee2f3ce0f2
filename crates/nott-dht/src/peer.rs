//! Peer identity and liveness
//!
//! A `Peer` is shared between the routing table and any number of running
//! lookups. Each mutable field is its own atomic, so concurrent updates may
//! overwrite each other but never tear.

use nott_protocol::{NodeEntry, NodeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use crate::OLD_AND_STALE_TIME;

/// Failures after which a peer is no longer handed out as a routing hint
const MAX_FAILURES_FOR_NODES_LIST: u32 = 2;

/// Failures after which a peer is evicted regardless of age
const MAX_TIMEOUTS: u32 = 2;

/// Value of the clock when the process started. Large enough that any
/// age we care about can be subtracted from it.
const CLOCK_ORIGIN_MS: u64 = 1 << 32;

/// Monotonic milliseconds, unaffected by wall-clock adjustments
fn now() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    CLOCK_ORIGIN_MS + START.get_or_init(Instant::now).elapsed().as_millis() as u64
}

pub struct Peer {
    id: NodeId,
    address: SocketAddr,
    last_seen: AtomicU64,
    failed_queries: AtomicU32,
    verified: AtomicBool,
}

impl Peer {
    pub fn new(id: NodeId, address: SocketAddr) -> Self {
        Peer {
            id,
            address,
            last_seen: AtomicU64::new(now()),
            failed_queries: AtomicU32::new(0),
            verified: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn entry(&self) -> NodeEntry {
        NodeEntry::new(self.id, self.address)
    }

    /// Last time we heard from this peer, in monotonic milliseconds
    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    pub fn failed_queries(&self) -> u32 {
        self.failed_queries.load(Ordering::Relaxed)
    }

    /// Whether the peer ever answered one of our requests
    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::Relaxed)
    }

    /// Same ID and same address
    pub fn matches(&self, other: &Peer) -> bool {
        self.id == other.id && self.address == other.address
    }

    /// May be given to other nodes in `nodes` lists
    pub fn eligible_for_nodes_list(&self) -> bool {
        self.failed_queries() < MAX_FAILURES_FOR_NODES_LIST
    }

    fn old_and_stale(&self) -> bool {
        now().saturating_sub(self.last_seen()) > OLD_AND_STALE_TIME.as_millis() as u64
    }

    /// Should be dropped from the routing table
    pub fn needs_replacement(&self) -> bool {
        let failed = self.failed_queries();
        failed > MAX_TIMEOUTS || (failed > 0 && self.old_and_stale())
    }

    pub fn signal_response(&self) {
        self.last_seen.store(now(), Ordering::Relaxed);
        self.failed_queries.store(0, Ordering::Relaxed);
        self.verified.store(true, Ordering::Relaxed);
    }

    pub fn signal_request_timeout(&self) {
        self.failed_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Take over the newer timestamp and verification of another record of
    /// the same peer
    pub fn merge_in_timestamps(&self, other: &Peer) {
        if std::ptr::eq(self, other) || !self.matches(other) {
            return;
        }
        self.last_seen.fetch_max(other.last_seen(), Ordering::Relaxed);
        if other.is_verified() {
            self.verified.store(true, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: std::time::Duration) {
        self.last_seen
            .store(now().saturating_sub(by.as_millis() as u64), Ordering::Relaxed);
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("failed_queries", &self.failed_queries())
            .finish()
    }
}
