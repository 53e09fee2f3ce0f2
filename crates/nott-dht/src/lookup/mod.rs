//! Iterative lookups
//!
//! Every lookup runs the same driver on its own task: issue requests to
//! admissible candidates, drain whatever calls reached a terminal state,
//! hand accepted replies to the flow and repeat until nothing is in flight
//! and no candidate is worth asking. Results reach the caller through a
//! bounded channel; cancelling stops the driver without waiting on calls
//! still in flight.

mod announce;
mod find_node;
mod get;
mod get_peers;
mod put;

pub(crate) use announce::Announce;
pub(crate) use find_node::FindNode;
pub(crate) use get::Get;
pub(crate) use get_peers::GetPeers;
pub use put::PutItem;
pub(crate) use put::Put;

use nott_protocol::{NodeId, Reply, Request, TransactionId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::call::{Call, CallState};
use crate::closest_set::{CallCheck, ClosestSet};
use crate::dht::DhtInner;
use crate::peer::Peer;
use crate::SEED_CANDIDATES;

/// Whether a lookup restarts after it converged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Once,
    /// Wait this long, then rerun from a freshly seeded closest set
    Every(Duration),
}

/// What a flow decided about one reply
pub(crate) struct Outcome<T> {
    items: Vec<T>,
    insert: bool,
    follow_up: Option<Request>,
}

impl<T> Outcome<T> {
    fn new() -> Self {
        Outcome {
            items: Vec::new(),
            insert: false,
            follow_up: None,
        }
    }

    pub(crate) fn emit(&mut self, item: T) {
        self.items.push(item);
    }

    /// Put the responder into the closest set
    pub(crate) fn insert(&mut self) {
        self.insert = true;
    }

    /// Send `request` to the responder once the current drain is done
    pub(crate) fn follow_up(&mut self, request: Request) {
        self.follow_up = Some(request);
    }
}

/// The part of a lookup that differs between RPC kinds
pub(crate) trait LookupFlow: Send + 'static {
    type Item: Send + 'static;

    fn target(&self) -> NodeId;

    /// Request sent to each candidate
    fn request(&self) -> Request;

    /// A reply from a peer whose identity checked out
    fn on_match(&mut self, peer: &Arc<Peer>, reply: &Reply, out: &mut Outcome<Self::Item>);

    /// A reply to a request queued with [`Outcome::follow_up`]
    fn on_follow_up(&mut self, _call: &Call, _out: &mut Outcome<Self::Item>) {}
}

/// A running lookup. Dropping it cancels the lookup.
pub struct Lookup<T> {
    results: mpsc::Receiver<T>,
    cancel: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

/// Cancels a lookup from elsewhere
#[derive(Clone)]
pub struct LookupCanceller {
    cancel: Arc<watch::Sender<bool>>,
}

impl LookupCanceller {
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

impl<T: Send + 'static> Lookup<T> {
    pub(crate) fn spawn<F>(dht: Arc<DhtInner>, flow: F, refresh: Refresh) -> Self
    where
        F: LookupFlow<Item = T>,
    {
        let (tx, results) = mpsc::channel(dht.config.result_capacity);
        let (cancel, cancelled) = watch::channel(false);
        let task = tokio::spawn(drive(dht, flow, refresh, tx, cancelled));

        Lookup {
            results,
            cancel: Arc::new(cancel),
            task,
        }
    }

    /// The next result, or `None` once the lookup finished or was cancelled
    pub async fn next(&mut self) -> Option<T> {
        self.results.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn canceller(&self) -> LookupCanceller {
        LookupCanceller {
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Gather results until the lookup ends or `timeout` passes, then cancel
    pub async fn collect_until(mut self, timeout: Duration) -> Vec<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut items = Vec::new();
        while let Ok(Some(item)) = tokio::time::timeout_at(deadline, self.next()).await {
            items.push(item);
        }
        items
    }
}

impl<T> Drop for Lookup<T> {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

async fn drive<F: LookupFlow>(
    dht: Arc<DhtInner>,
    mut flow: F,
    refresh: Refresh,
    tx: mpsc::Sender<F::Item>,
    mut cancel: watch::Receiver<bool>,
) {
    let target = flow.target();
    loop {
        if !run_iteration(&dht, &mut flow, &tx, &mut cancel).await {
            debug!("Lookup for {} stopped", target);
            return;
        }
        trace!("Lookup iteration for {} converged", target);

        match refresh {
            Refresh::Once => return,
            Refresh::Every(interval) => {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancelled(&mut cancel) => return,
                    _ = tx.closed() => return,
                }
            }
        }
    }
}

/// One pass from fresh seeds to convergence. Returns false when the lookup
/// must stop altogether.
async fn run_iteration<F: LookupFlow>(
    dht: &Arc<DhtInner>,
    flow: &mut F,
    tx: &mpsc::Sender<F::Item>,
    cancel: &mut watch::Receiver<bool>,
) -> bool {
    let target = flow.target();
    let owner = Arc::new(Notify::new());
    let seeds = dht.routing_table.closest_peers(&target, SEED_CANDIDATES);
    let mut closest = ClosestSet::new(target, dht.node_id, seeds);
    let mut in_flight: Vec<Arc<Call>> = Vec::new();
    let mut follow_ups: HashSet<TransactionId> = HashSet::new();
    let mut queued: Vec<(Arc<Peer>, Request)> = Vec::new();
    let timeout = dht.config.response_timeout();

    loop {
        if *cancel.borrow() || dht.is_shut_down() {
            return false;
        }

        while let Some(peer) = closest.next_candidate(&in_flight) {
            let call = match dht
                .issue(flow.request(), peer.address(), Some(*peer.id()), &owner)
                .await
            {
                Ok(call) => call,
                Err(e) => {
                    debug!("Lookup for {} cannot issue requests: {}", target, e);
                    return false;
                }
            };
            closest.register_call(call.clone(), &peer);
            in_flight.push(call);
        }

        for (peer, request) in queued.drain(..) {
            match dht
                .issue(request, peer.address(), Some(*peer.id()), &owner)
                .await
            {
                Ok(call) => {
                    follow_ups.insert(*call.tid());
                    in_flight.push(call);
                }
                Err(e) => {
                    debug!("Lookup for {} cannot issue requests: {}", target, e);
                    return false;
                }
            }
        }

        if in_flight.is_empty() {
            return true;
        }

        let mut items = Vec::new();
        for call in std::mem::take(&mut in_flight) {
            if call.state() == CallState::Responded {
                dht.forget(call.tid());
                let mut out = Outcome::new();
                if follow_ups.remove(call.tid()) {
                    flow.on_follow_up(&call, &mut out);
                    items.append(&mut out.items);
                    continue;
                }
                let Some(peer) = closest.accept_response(&call) else {
                    continue;
                };
                if let Some(reply) = call.reply() {
                    flow.on_match(&peer, reply, &mut out);
                }
                items.append(&mut out.items);
                if out.insert {
                    closest.insert(peer.clone());
                }
                if let Some(request) = out.follow_up {
                    queued.push((peer, request));
                }
                continue;
            }

            match closest.check_timeout_or_failure(&call, timeout) {
                CallCheck::Pending => in_flight.push(call),
                CallCheck::Failed => {
                    follow_ups.remove(call.tid());
                    dht.forget(call.tid());
                }
                CallCheck::TimedOut => {
                    follow_ups.remove(call.tid());
                    dht.timeout(&call);
                }
            }
        }

        for item in items {
            if !emit(tx, cancel, item).await {
                return false;
            }
        }

        let idle = queued.is_empty() && closest.next_candidate(&in_flight).is_none();
        if !in_flight.is_empty() && idle {
            tokio::select! {
                _ = owner.notified() => {}
                _ = tokio::time::sleep(dht.config.poll_interval()) => {}
                _ = cancelled(cancel) => return false,
            }
        }
    }
}

async fn emit<T>(tx: &mpsc::Sender<T>, cancel: &mut watch::Receiver<bool>, item: T) -> bool {
    tokio::select! {
        sent = tx.send(item) => sent.is_ok(),
        _ = cancelled(cancel) => false,
    }
}

/// Resolves once the lookup is cancelled or every handle to it is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
