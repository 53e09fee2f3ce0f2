//! The bounded set of best peers found by one lookup
//!
//! A lookup is done once it can no longer productively issue requests.
//! With K slots filled, only candidates closer than the current tail are
//! always worth asking. Farther ones are asked one at a time, and not at
//! all once the set has stabilized (enough members are corroborated by
//! several sources) or the tail survived more than K insert attempts.

use nott_protocol::{three_way_distance, NodeId};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::call::{Call, CallState};
use crate::candidates::Candidates;
use crate::peer::Peer;
use crate::K;

/// Outcome of polling an unanswered call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCheck {
    /// Still waiting for a reply
    Pending,
    /// Answered with an error or abandoned
    Failed,
    /// No reply within the response timeout; the call is now stalled
    TimedOut,
}

pub struct ClosestSet {
    local_id: NodeId,
    closest: Vec<Arc<Peer>>,
    candidates: Candidates,
    insert_attempts_since_tail_modification: usize,
}

impl ClosestSet {
    /// Start a set for `target`, seeded with peers from the routing table
    pub fn new(target: NodeId, local_id: NodeId, seeds: Vec<Arc<Peer>>) -> Self {
        Self::with_candidates(local_id, Candidates::new(target), seeds)
    }

    pub fn with_candidates(
        local_id: NodeId,
        mut candidates: Candidates,
        seeds: Vec<Arc<Peer>>,
    ) -> Self {
        candidates.add_candidates(
            None,
            seeds.into_iter().filter(|peer| *peer.id() != local_id),
        );
        ClosestSet {
            local_id,
            closest: Vec::with_capacity(K + 1),
            candidates,
            insert_attempts_since_tail_modification: 0,
        }
    }

    pub fn target(&self) -> &NodeId {
        self.candidates.target()
    }

    pub fn candidates(&self) -> &Candidates {
        &self.candidates
    }

    /// Members ordered from closest to farthest
    pub fn entries(&self) -> &[Arc<Peer>] {
        &self.closest
    }

    pub fn len(&self) -> usize {
        self.closest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closest.is_empty()
    }

    /// The next peer worth a request, given the calls still in flight
    pub fn next_candidate(&self, in_flight: &[Arc<Call>]) -> Option<Arc<Peer>> {
        let active = in_flight
            .iter()
            .filter(|call| !call.state().is_terminal())
            .count();
        let converged = self.in_stabilization() || self.tail_frozen();

        self.candidates
            .next(|peer| self.good_for_request(peer, active, converged))
    }

    pub fn register_call(&mut self, call: Arc<Call>, peer: &Arc<Peer>) {
        self.candidates.add_call(call, peer);
    }

    /// Poll a call that has not responded; failures are accounted against
    /// the candidate it was sent to
    pub fn check_timeout_or_failure(&mut self, call: &Call, timeout: Duration) -> CallCheck {
        match call.state() {
            CallState::Error | CallState::Stalled => {
                self.candidates.failure(call);
                CallCheck::Failed
            }
            CallState::Unsent | CallState::Sent => {
                let expired = call.elapsed().is_some_and(|elapsed| elapsed > timeout);
                if expired && call.inject_stall() {
                    self.candidates.failure(call);
                    CallCheck::TimedOut
                } else {
                    CallCheck::Pending
                }
            }
            CallState::Responded => CallCheck::Pending,
        }
    }

    /// Validate a responded call and fold the nodes it reported into the
    /// candidates, attributed to the responder
    pub fn accept_response(&mut self, call: &Call) -> Option<Arc<Peer>> {
        let matched = self.candidates.accept_response(call)?;

        if let Some(nodes) = call.reply().and_then(|reply| reply.response.nodes()) {
            let reported: Vec<Arc<Peer>> = nodes
                .iter()
                .filter(|entry| entry.id != self.local_id)
                .map(|entry| Arc::new(Peer::new(entry.id, entry.addr)))
                .collect();
            self.candidates.add_candidates(Some(&matched), reported);
        }
        Some(matched)
    }

    /// Insert a verified peer, evicting the farthest member beyond K
    pub fn insert(&mut self, peer: Arc<Peer>) {
        if self.closest.iter().any(|member| member.id() == peer.id()) {
            return;
        }

        let target = *self.target();
        let position = self.closest.partition_point(|member| {
            three_way_distance(&target, member.id(), peer.id()) == Ordering::Less
        });
        self.closest.insert(position, peer.clone());

        if self.closest.len() > K {
            if let Some(evicted) = self.closest.pop() {
                if evicted.id() == peer.id() {
                    self.insert_attempts_since_tail_modification += 1;
                } else {
                    self.insert_attempts_since_tail_modification = 0;
                }
            }
        }
    }

    /// Enough members are vouched for by several independent sources
    pub fn in_stabilization(&self) -> bool {
        let counts: Vec<usize> = self
            .closest
            .iter()
            .map(|member| self.candidates.source_count(member))
            .collect();

        counts.iter().any(|count| *count >= 5) || counts.iter().filter(|c| **c >= 4).count() >= 2
    }

    /// The tail survived more than K insert attempts in a row
    pub fn tail_frozen(&self) -> bool {
        self.insert_attempts_since_tail_modification > K
    }

    fn reached_capacity(&self) -> bool {
        self.closest.len() >= K
    }

    fn candidate_ahead_of_tail(&self, candidate: &Peer) -> bool {
        match self.closest.last() {
            Some(tail) if self.reached_capacity() => {
                three_way_distance(self.target(), tail.id(), candidate.id()) == Ordering::Greater
            }
            _ => true,
        }
    }

    fn good_for_request(&self, candidate: &Peer, active_in_flight: usize, converged: bool) -> bool {
        if self.candidate_ahead_of_tail(candidate) {
            return true;
        }
        // behind the tail: probe one at a time until the set has converged
        !converged && active_in_flight == 0
    }
}
