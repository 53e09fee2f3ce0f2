//! Per-lookup candidate graph
//!
//! Remote nodes may drop requests, lie about their IDs (possibly in
//! concert), flood bogus candidates or reuse one IP under many IDs. Every
//! peer a lookup hears about gets one node in an arena, linked to the nodes
//! that reported it (sources) and the nodes it reported (children). The
//! admission rules below work on that graph:
//!
//! - an IP is not queried again while a request to it is in flight, or after
//!   it answered with an unexpected ID or an error
//! - sources whose reports mostly fail lose the right to vouch for new
//!   candidates; reports backed by many sources weigh less against them
//! - IPs that keep failing get new candidates pre-marked unreachable with a
//!   probability growing with their failure count, capped so some still pass
//! - one ID and one IP are accepted at most once per lookup

use nott_protocol::{three_way_distance, NodeId, TransactionId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::call::{Call, CallState};
use crate::peer::Peer;

/// Highest probability of pre-marking a candidate unreachable
const MAX_UNREACHABLE_PROBABILITY: f64 = 0.95;

/// A source stops vouching once this share of its reports is unsuccessful
const SOURCE_PENALTY_LIMIT: f64 = 0.5;

/// Sources required before an attempted candidate may be retried
const RETRY_MIN_SOURCES: usize = 3;

/// Requests a single candidate may receive
const MAX_CALLS_PER_NODE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeHandle(usize);

struct Node {
    peer: Arc<Peer>,
    unreachable: bool,
    /// answered with an ID other than the one it was reported under
    failed: bool,
    accepted: bool,
    sources: HashSet<NodeHandle>,
    children: HashSet<NodeHandle>,
    calls: Vec<Arc<Call>>,
}

impl Node {
    fn new(peer: Arc<Peer>, unreachable: bool) -> Self {
        Node {
            peer,
            unreachable,
            failed: false,
            accepted: false,
            sources: HashSet::new(),
            children: HashSet::new(),
            calls: Vec::new(),
        }
    }

    fn is_fresh(&self) -> bool {
        self.calls.is_empty() && !self.unreachable
    }

    fn unsuccessful(&self) -> bool {
        !self.accepted && (self.failed || self.unreachable)
    }
}

pub struct Candidates {
    target: NodeId,
    nodes: Vec<Node>,
    index: HashMap<(NodeId, SocketAddr), NodeHandle>,
    calls: HashMap<TransactionId, NodeHandle>,
    calls_by_ip: HashMap<IpAddr, Vec<Arc<Call>>>,
    accepted_ids: HashSet<NodeId>,
    accepted_ips: HashMap<IpAddr, NodeId>,
    failures: HashMap<IpAddr, f64>,
    rng: StdRng,
}

impl Candidates {
    pub fn new(target: NodeId) -> Self {
        Self::with_rng(target, StdRng::from_entropy())
    }

    pub fn with_rng(target: NodeId, rng: StdRng) -> Self {
        Candidates {
            target,
            nodes: Vec::new(),
            index: HashMap::new(),
            calls: HashMap::new(),
            calls_by_ip: HashMap::new(),
            accepted_ids: HashSet::new(),
            accepted_ips: HashMap::new(),
            failures: HashMap::new(),
            rng,
        }
    }

    pub fn target(&self) -> &NodeId {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fold in peers reported by `source` (`None` for routing table seeds)
    pub fn add_candidates<I>(&mut self, source: Option<&Arc<Peer>>, peers: I)
    where
        I: IntoIterator<Item = Arc<Peer>>,
    {
        let source = source.and_then(|peer| self.handle_of(peer));
        for peer in peers {
            let handle = self.get_or_create(peer);
            if let Some(source) = source {
                if source != handle {
                    self.nodes[handle.0].sources.insert(source);
                    self.nodes[source.0].children.insert(handle);
                }
            }
        }
    }

    /// Attach an issued call to the candidate it was sent to
    pub fn add_call(&mut self, call: Arc<Call>, peer: &Arc<Peer>) {
        let handle = self.get_or_create(peer.clone());
        self.calls.insert(*call.tid(), handle);
        self.calls_by_ip
            .entry(call.destination().ip())
            .or_default()
            .push(call.clone());
        self.nodes[handle.0].calls.push(call);
    }

    /// The closest admissible candidate, fresh ones first.
    ///
    /// `post_filter` sees the chosen candidate last and may veto it, in
    /// which case nothing is returned.
    pub fn next<F>(&self, mut post_filter: F) -> Option<Arc<Peer>>
    where
        F: FnMut(&Arc<Peer>) -> bool,
    {
        let sorted = self.sorted();
        let chosen = sorted
            .iter()
            .find(|handle| self.admissible(**handle, true))
            .or_else(|| sorted.iter().find(|handle| self.admissible(**handle, false)))?;

        let peer = &self.nodes[chosen.0].peer;
        if post_filter(peer) {
            Some(peer.clone())
        } else {
            None
        }
    }

    /// Validate a responded call. Returns the peer when its claimed ID
    /// matches and neither its ID nor its IP was accepted before.
    pub fn accept_response(&mut self, call: &Call) -> Option<Arc<Peer>> {
        let handle = *self.calls.get(call.tid())?;
        let ip = call.destination().ip();
        let reply = call.reply()?;

        if !call.matches_expected_id() {
            *self.failures.entry(ip).or_insert(0.0) += 1.0;
            self.nodes[handle.0].failed = true;
            // keep the claimed binding around, but never on this call's word
            let claimed = self.get_or_create(Arc::new(Peer::new(reply.id, call.destination())));
            self.nodes[claimed.0].unreachable = true;
            return None;
        }

        if let Some(failures) = self.failures.get_mut(&ip) {
            *failures *= 0.5;
        }

        let id = *self.nodes[handle.0].peer.id();
        if self.accepted_ids.contains(&id) || self.accepted_ips.contains_key(&ip) {
            return None;
        }
        self.accepted_ids.insert(id);
        self.accepted_ips.insert(ip, id);

        let node = &mut self.nodes[handle.0];
        node.accepted = true;
        Some(node.peer.clone())
    }

    /// Account a call that timed out or failed
    pub fn failure(&mut self, call: &Call) {
        let Some(handle) = self.calls.get(call.tid()).copied() else {
            return;
        };
        *self.failures.entry(call.destination().ip()).or_insert(0.0) += 1.0;
        self.nodes[handle.0].unreachable = true;
    }

    /// Number of distinct nodes that reported `peer`
    pub fn source_count(&self, peer: &Peer) -> usize {
        self.handle_of(peer)
            .map(|handle| self.nodes[handle.0].sources.len())
            .unwrap_or(0)
    }

    pub fn is_accepted(&self, peer: &Peer) -> bool {
        self.handle_of(peer)
            .map(|handle| self.nodes[handle.0].accepted)
            .unwrap_or(false)
    }

    pub fn is_unreachable(&self, peer: &Peer) -> bool {
        self.handle_of(peer)
            .map(|handle| self.nodes[handle.0].unreachable)
            .unwrap_or(false)
    }

    pub fn contains(&self, peer: &Peer) -> bool {
        self.handle_of(peer).is_some()
    }

    /// Current failure weight of an IP
    pub fn failures(&self, ip: &IpAddr) -> f64 {
        self.failures.get(ip).copied().unwrap_or(0.0)
    }

    fn handle_of(&self, peer: &Peer) -> Option<NodeHandle> {
        self.index.get(&(*peer.id(), peer.address())).copied()
    }

    fn get_or_create(&mut self, peer: Arc<Peer>) -> NodeHandle {
        let key = (*peer.id(), peer.address());
        if let Some(handle) = self.index.get(&key) {
            return *handle;
        }
        let unreachable = self.roll_unreachable(&peer.address().ip());
        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(Node::new(peer, unreachable));
        self.index.insert(key, handle);
        handle
    }

    fn roll_unreachable(&mut self, ip: &IpAddr) -> bool {
        let failures = self.failures(ip);
        if failures <= 0.0 {
            return false;
        }
        let probability = (1.0 - 1.0 / (1.0 + failures)).min(MAX_UNREACHABLE_PROBABILITY);
        self.rng.gen_bool(probability)
    }

    fn sorted(&self) -> Vec<NodeHandle> {
        let mut handles: Vec<NodeHandle> = (0..self.nodes.len()).map(NodeHandle).collect();
        handles.sort_by(|a, b| {
            let (a, b) = (&self.nodes[a.0], &self.nodes[b.0]);
            three_way_distance(&self.target, a.peer.id(), b.peer.id())
                .then_with(|| b.sources.len().cmp(&a.sources.len()))
        });
        handles
    }

    fn admissible(&self, handle: NodeHandle, fresh: bool) -> bool {
        let node = &self.nodes[handle.0];
        if node.accepted || node.failed {
            return false;
        }
        let eligible = if fresh {
            node.is_fresh()
        } else {
            node.sources.len() >= RETRY_MIN_SOURCES && node.calls.len() < MAX_CALLS_PER_NODE
        };
        eligible && !self.address_blocked(node) && self.has_trusted_source(node)
    }

    fn address_blocked(&self, node: &Node) -> bool {
        let ip = node.peer.address().ip();
        if let Some(id) = self.accepted_ips.get(&ip) {
            if id != node.peer.id() {
                return true;
            }
        }
        if self.accepted_ids.contains(node.peer.id()) {
            return true;
        }

        self.calls_by_ip.get(&ip).is_some_and(|calls| {
            calls.iter().any(|call| match call.state() {
                CallState::Unsent | CallState::Sent | CallState::Error => true,
                CallState::Responded => !call.matches_expected_id(),
                CallState::Stalled => false,
            })
        })
    }

    /// Share of a source's reports that went nowhere, each weighted down by
    /// how many other sources also reported it
    fn penalty(&self, source: NodeHandle) -> f64 {
        let node = &self.nodes[source.0];
        if node.children.is_empty() {
            return 0.0;
        }
        let unsuccessful: f64 = node
            .children
            .iter()
            .map(|child| &self.nodes[child.0])
            .filter(|child| child.unsuccessful())
            .map(|child| 1.0 / child.sources.len().max(1) as f64)
            .sum();
        unsuccessful / node.children.len() as f64
    }

    fn has_trusted_source(&self, node: &Node) -> bool {
        node.sources.is_empty()
            || node
                .sources
                .iter()
                .any(|source| self.penalty(*source) < SOURCE_PENALTY_LIMIT)
    }
}
