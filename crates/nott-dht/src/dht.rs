//! DHT node
//!
//! Owns the transport, the routing table, the announce database and the
//! registry of outstanding calls. A single receive loop decodes incoming
//! datagrams, resolves calls by transaction ID and answers queries from
//! other nodes. Lookups run as independent tasks on top of it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nott_network::{NetworkError, Transport, UdpConfig, UdpTransport};
use nott_protocol::codec;
use nott_protocol::{
    ErrorCode, ErrorMessage, Message, NodeId, Nodes, ProtocolError, PutArgs, Query, Reply,
    Request, Response, StoredItem, TransactionId,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

use crate::call::{Call, CallState};
use crate::config::DhtConfig;
use crate::database::Database;
use crate::error::{DhtError, Result};
use crate::lookup::{Announce, FindNode, Get, GetPeers, Lookup, Put, PutItem, Refresh};
use crate::peer::Peer;
use crate::routing_table::RoutingTable;
use crate::throttle::Throttle;
use crate::{K, MIN_DATAGRAM_LEN};

/// Handle to a running node. Clones share the node.
#[derive(Clone)]
pub struct Dht {
    inner: Arc<DhtInner>,
}

pub(crate) struct DhtInner {
    pub(crate) config: DhtConfig,
    pub(crate) node_id: NodeId,
    pub(crate) routing_table: RoutingTable,
    transport: Arc<dyn Transport>,
    database: Database,
    calls: DashMap<TransactionId, Arc<Call>>,
    throttle: Throttle,
    shut_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dht {
    /// Bind a UDP socket as configured and start the node
    pub async fn bind(config: DhtConfig) -> Result<Self> {
        let udp = UdpTransport::bind(&UdpConfig {
            bind_addr: config.bind_addr.clone(),
            port: config.port,
        })
        .await?;
        Self::with_transport(config, Arc::new(udp))
    }

    /// Start a node on an already bound transport. Must be called within a
    /// tokio runtime.
    pub fn with_transport(config: DhtConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let node_id = config.resolve_node_id()?;
        let sweep_every = config.response_timeout();
        let prune_every = config.maintenance_interval();

        let inner = Arc::new(DhtInner {
            routing_table: RoutingTable::new(node_id),
            database: Database::new(config.token_rotation()),
            calls: DashMap::new(),
            throttle: Throttle::new(),
            shut_down: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            transport: transport.clone(),
            node_id,
            config,
        });

        let receiver = tokio::spawn(receive_loop(Arc::downgrade(&inner), transport));
        let maintenance = tokio::spawn(maintenance_loop(
            Arc::downgrade(&inner),
            sweep_every,
            prune_every,
        ));
        inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([receiver, maintenance]);

        info!(
            "✓ DHT node {} listening on {}",
            node_id,
            inner
                .transport
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "?".to_string())
        );
        Ok(Dht { inner })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.transport.local_addr()?)
    }

    pub fn config(&self) -> &DhtConfig {
        &self.inner.config
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.inner.routing_table
    }

    /// Number of requests awaiting a reply
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Ping `addr` without waiting. A reply enters the routing table through
    /// the receive path.
    pub async fn probe(&self, addr: SocketAddr, expected_id: Option<NodeId>) -> Result<()> {
        let owner = Arc::new(Notify::new());
        self.inner
            .issue(Request::Ping, addr, expected_id, &owner)
            .await
            .map(|_| ())
    }

    /// Ping `addr` and wait for the outcome. True if it answered, with
    /// `expected_id` when one is given.
    pub async fn ping(&self, addr: SocketAddr, expected_id: Option<NodeId>) -> Result<bool> {
        let owner = Arc::new(Notify::new());
        let call = self
            .inner
            .issue(Request::Ping, addr, expected_id, &owner)
            .await?;
        let deadline = tokio::time::Instant::now() + self.inner.config.response_timeout();

        while !call.state().is_terminal() {
            if tokio::time::timeout_at(deadline, owner.notified())
                .await
                .is_err()
            {
                if call.inject_stall() {
                    self.inner.timeout(&call);
                }
                break;
            }
        }
        self.inner.forget(call.tid());
        Ok(call.state() == CallState::Responded && call.matches_expected_id())
    }

    /// Resolve the configured bootstrap nodes, ping them and look up our
    /// own ID to fill the routing table. Returns the routing table size.
    pub async fn bootstrap(&self) -> Result<usize> {
        let mut addrs = Vec::new();
        for host in &self.inner.config.bootstrap_nodes {
            match tokio::net::lookup_host(host.as_str()).await {
                Ok(resolved) => addrs.extend(resolved),
                Err(e) => warn!("Failed to resolve bootstrap node {}: {}", host, e),
            }
        }
        let local = self.local_addr().ok();
        addrs.retain(|addr| Some(*addr) != local);

        let mut probes = JoinSet::new();
        for addr in addrs {
            let dht = self.clone();
            probes.spawn(async move { (addr, dht.ping(addr, None).await) });
        }
        let mut reached = 0;
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((_, Ok(true))) => reached += 1,
                Ok((addr, Ok(false))) => debug!("Bootstrap node {} did not answer", addr),
                Ok((addr, Err(e))) => debug!("Bootstrap ping to {} failed: {}", addr, e),
                Err(e) => debug!("Bootstrap probe task failed: {}", e),
            }
        }
        if reached == 0 {
            warn!("No bootstrap node answered");
        }

        let mut own = self.find_node(self.inner.node_id);
        while own.next().await.is_some() {}

        let size = self.inner.routing_table.len();
        info!("✓ Bootstrapped with {} routing table entries", size);
        Ok(size)
    }

    /// Look up the nodes closest to `target`; yields the address of the
    /// node owning `target` if it is found
    pub fn find_node(&self, target: NodeId) -> Lookup<SocketAddr> {
        Lookup::spawn(self.inner.clone(), FindNode::new(target), Refresh::Once)
    }

    /// Look up peers announced for `info_hash`
    pub fn get_peers(&self, info_hash: NodeId) -> Lookup<SocketAddr> {
        Lookup::spawn(self.inner.clone(), GetPeers::new(info_hash), Refresh::Once)
    }

    /// Look up items stored under `target`
    pub fn get(&self, target: NodeId, seq: Option<i64>) -> Lookup<StoredItem> {
        Lookup::spawn(self.inner.clone(), Get::new(target, seq), Refresh::Once)
    }

    /// Store `item` on the nodes closest to its target; yields every node
    /// that acknowledged the put
    pub fn put(&self, item: PutItem, refresh: Refresh) -> Result<Lookup<SocketAddr>> {
        let flow = Put::new(item)?;
        Ok(Lookup::spawn(self.inner.clone(), flow, refresh))
    }

    /// Announce ourselves as a peer for `info_hash`; yields every node that
    /// acknowledged. With `port` unset, nodes record our source port.
    pub fn announce(
        &self,
        info_hash: NodeId,
        port: Option<u16>,
        refresh: Refresh,
    ) -> Lookup<SocketAddr> {
        Lookup::spawn(
            self.inner.clone(),
            Announce::new(info_hash, port),
            refresh,
        )
    }

    /// Stop the receive loop and release the transport. Running lookups
    /// stop at their next step.
    pub fn shutdown(&self) {
        self.inner.shutdown();
        info!("DHT node {} shut down", self.inner.node_id);
    }
}

impl DhtInner {
    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Register a call under a fresh transaction ID and send it. A failed
    /// send leaves the call stalled rather than returning an error.
    pub(crate) async fn issue(
        &self,
        request: Request,
        destination: SocketAddr,
        expected_id: Option<NodeId>,
        owner: &Arc<Notify>,
    ) -> Result<Arc<Call>> {
        if self.is_shut_down() {
            return Err(DhtError::ShutDown);
        }

        let call = loop {
            let tid = TransactionId::random();
            if let Entry::Vacant(slot) = self.calls.entry(tid) {
                let query = Query {
                    tid,
                    id: self.node_id,
                    read_only: self.config.read_only,
                    request,
                };
                let call = Arc::new(Call::new(query, destination, expected_id, owner.clone()));
                slot.insert(call.clone());
                break call;
            }
        };

        let payload = match codec::encode(&Message::Query(call.query().clone())) {
            Ok(payload) => payload,
            Err(e) => {
                self.forget(call.tid());
                return Err(e.into());
            }
        };

        // mark sent first so a fast reply is not dropped as early
        call.has_send();
        if let Err(e) = self.transport.send(destination, &payload).await {
            debug!("Sending {} to {} failed: {}", call.kind(), destination, e);
            call.inject_stall();
            self.timeout(&call);
        } else {
            trace!("Sent {} to {}", call.kind(), destination);
        }
        Ok(call)
    }

    /// Drop a resolved call from the registry
    pub(crate) fn forget(&self, tid: &TransactionId) {
        self.calls.remove(tid);
    }

    /// Account a call that went unanswered
    pub(crate) fn timeout(&self, call: &Call) {
        if let Some(id) = call.expected_id() {
            self.routing_table.on_timeout(id);
        }
        self.forget(call.tid());
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            handle.abort();
        }
        for entry in self.calls.iter() {
            entry.value().inject_stall();
        }
        self.calls.clear();
        self.transport.close();
    }

    /// Remove calls nobody will resolve anymore, e.g. those of cancelled
    /// lookups
    fn sweep_calls(&self, timeout: Duration) {
        let before = self.calls.len();
        self.calls.retain(|_, call| match call.elapsed() {
            Some(elapsed) => elapsed <= timeout * 2,
            None => true,
        });
        let swept = before.saturating_sub(self.calls.len());
        if swept > 0 {
            trace!("Swept {} abandoned calls", swept);
        }
    }

    async fn handle_datagram(&self, source: SocketAddr, payload: &[u8]) {
        if payload.len() < MIN_DATAGRAM_LEN || source.port() == 0 {
            trace!("Dropping datagram from {} ({} bytes)", source, payload.len());
            return;
        }

        let decoded = codec::decode(payload, |tid| self.calls.get(tid).map(|call| call.kind()));
        match decoded {
            Ok(Message::Query(query)) => self.handle_query(source, query).await,
            Ok(msg) => self.handle_response(source, msg).await,
            Err(ProtocolError::UnknownTransaction(tid)) => {
                trace!("Reply from {} for unknown transaction {:?}", source, tid);
                self.send_error(source, tid, ErrorCode::Server, "Unknown transaction")
                    .await;
            }
            Err(ProtocolError::MalformedQuery {
                tid,
                unknown_method,
                reason,
            }) => {
                debug!("Malformed query from {}: {}", source, reason);
                if self.config.read_only {
                    return;
                }
                if unknown_method {
                    self.send_error(source, tid, ErrorCode::MethodUnknown, "Method Unknown")
                        .await;
                } else {
                    self.send_error(source, tid, ErrorCode::Protocol, &reason)
                        .await;
                }
            }
            Err(ProtocolError::MalformedReply { tid, reason }) => {
                debug!("Malformed reply from {}: {}", source, reason);
                let call = self.calls.get(&tid).map(|entry| entry.value().clone());
                if let Some(call) = call {
                    if call.destination() == source {
                        call.inject_error();
                    }
                }
            }
            Err(e) => trace!("Undecodable datagram from {}: {}", source, e),
        }
    }

    async fn handle_response(&self, source: SocketAddr, msg: Message) {
        let tid = *msg.tid();
        let Some(call) = self.calls.get(&tid).map(|entry| entry.value().clone()) else {
            trace!("Dropping error from {} for unknown transaction", source);
            return;
        };

        if call.destination() != source {
            debug!(
                "Reply for {} came from {} instead of {}",
                call.kind(),
                source,
                call.destination()
            );
            call.set_socket_mismatch();
            call.inject_stall();
            self.forget(&tid);
            if matches!(msg, Message::Error(_)) {
                return;
            }
            self.send_error(
                source,
                tid,
                ErrorCode::Generic,
                "A Generic Error Occured: socket mismatch",
            )
            .await;
            return;
        }

        let sender = msg.sender_id();
        if !call.deliver(msg) {
            trace!("Discarding late reply from {}", source);
            return;
        }
        if let Some(id) = sender {
            self.received(source, id, Some(&call));
        }
    }

    /// Routing table bookkeeping for a message from `id` at `source`.
    /// `call` is set for replies to our own requests.
    fn received(&self, source: SocketAddr, id: NodeId, call: Option<&Call>) {
        if id == self.node_id {
            return;
        }
        match self.routing_table.find_peer_by_id(&id) {
            Some(existing) if existing.address() != source => {
                trace!(
                    "{} claims {} which is known at {}",
                    source,
                    id,
                    existing.address()
                );
                return;
            }
            Some(_) => {}
            None => {
                if let Some(expected) = call.and_then(|call| call.expected_id()) {
                    if *expected != id {
                        return;
                    }
                }
            }
        }

        let peer = Arc::new(Peer::new(id, source));
        match call {
            Some(_) => {
                self.routing_table.insert_or_refresh(peer);
                self.routing_table.notify_of_response(&id);
            }
            None if self.throttle.register(source.ip()) => self.routing_table.refresh(&peer),
            None => self.routing_table.insert_or_refresh(peer),
        }
    }

    async fn handle_query(&self, source: SocketAddr, query: Query) {
        if self.config.read_only || query.id == self.node_id {
            return;
        }
        if !query.read_only {
            self.received(source, query.id, None);
        }
        trace!("{} from {}", query.request.kind(), source);

        match self.respond(source, &query) {
            Ok(response) => {
                let reply = Message::Response(Reply {
                    tid: query.tid,
                    id: self.node_id,
                    ip: Some(source),
                    response,
                });
                self.send(source, &reply).await;
            }
            Err((code, message)) => self.send_error(source, query.tid, code, message).await,
        }
    }

    fn respond(
        &self,
        source: SocketAddr,
        query: &Query,
    ) -> std::result::Result<Response, (ErrorCode, &'static str)> {
        let response = match &query.request {
            Request::Ping => Response::Ping,
            Request::FindNode { target } => Response::FindNode {
                nodes: self.closest_nodes(target),
            },
            Request::GetPeers { info_hash } => Response::GetPeers {
                nodes: self.closest_nodes(info_hash),
                token: self.offer_token(source, &query.id, info_hash),
                values: self.database.sample(info_hash),
            },
            Request::Get { target, .. } => Response::Get {
                nodes: self.closest_nodes(target),
                token: self.offer_token(source, &query.id, target),
                item: None,
            },
            Request::Put(args) => {
                let target = put_target(args).ok_or((ErrorCode::Protocol, "Invalid Value"))?;
                if !self
                    .database
                    .check_token(&args.token, &query.id, &source, &target)
                {
                    return Err((ErrorCode::Protocol, "Invalid Token"));
                }
                Response::Put
            }
            Request::AnnouncePeer(args) => {
                if !self
                    .database
                    .check_token(&args.token, &query.id, &source, &args.info_hash)
                {
                    return Err((ErrorCode::Protocol, "Invalid Token"));
                }
                let port = if args.implied_port {
                    source.port()
                } else {
                    args.port
                };
                if port == 0 {
                    return Err((ErrorCode::Protocol, "Invalid Port"));
                }
                if self
                    .database
                    .store(args.info_hash, SocketAddr::new(source.ip(), port))
                {
                    debug!("Stored peer {}:{} for {}", source.ip(), port, args.info_hash);
                }
                Response::AnnouncePeer
            }
        };
        Ok(response)
    }

    fn closest_nodes(&self, target: &NodeId) -> Nodes {
        Nodes::from_entries(
            self.routing_table
                .closest_peers(target, K)
                .iter()
                .map(|peer| peer.entry()),
        )
    }

    fn offer_token(&self, source: SocketAddr, id: &NodeId, key: &NodeId) -> Option<Vec<u8>> {
        self.database
            .insert_for_key_allowed(key)
            .then(|| self.database.generate_token(id, &source, key))
    }

    async fn send(&self, destination: SocketAddr, msg: &Message) {
        let payload = match codec::encode(msg) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode message for {}: {}", destination, e);
                return;
            }
        };
        if let Err(e) = self.transport.send(destination, &payload).await {
            debug!("Sending to {} failed: {}", destination, e);
        }
    }

    async fn send_error(
        &self,
        destination: SocketAddr,
        tid: TransactionId,
        code: ErrorCode,
        message: &str,
    ) {
        let error = Message::Error(ErrorMessage {
            tid,
            code,
            message: message.to_string(),
        });
        self.send(destination, &error).await;
    }
}

impl Drop for DhtInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn put_target(args: &PutArgs) -> Option<NodeId> {
    match &args.k {
        Some(k) => Some(nott_protocol::item::mutable_target(k, args.salt.as_deref())),
        None => nott_protocol::item::immutable_target(&args.v).ok(),
    }
}

async fn receive_loop(dht: Weak<DhtInner>, transport: Arc<dyn Transport>) {
    loop {
        let received = transport.receive().await;
        let Some(inner) = dht.upgrade() else {
            break;
        };
        match received {
            Ok((source, payload)) => inner.handle_datagram(source, &payload).await,
            Err(NetworkError::Closed) => break,
            Err(e) => debug!("Receive failed: {}", e),
        }
    }
    trace!("Receive loop stopped");
}

async fn maintenance_loop(dht: Weak<DhtInner>, sweep_every: Duration, prune_every: Duration) {
    let mut sweep = tokio::time::interval(sweep_every);
    let mut prune = tokio::time::interval(prune_every);
    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let Some(inner) = dht.upgrade() else { break };
                inner.sweep_calls(sweep_every);
            }
            _ = prune.tick() => {
                let Some(inner) = dht.upgrade() else { break };
                let removed = inner.routing_table.prune();
                if removed > 0 {
                    debug!("Pruned {} routing table entries", removed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nott_network::MemoryNetwork;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 6881))
    }

    fn start(network: &MemoryNetwork, last: u8) -> Dht {
        let transport = network.bind(addr(last)).unwrap();
        Dht::with_transport(DhtConfig::default(), Arc::new(transport)).unwrap()
    }

    #[tokio::test]
    async fn test_ping_between_nodes() {
        let network = MemoryNetwork::new();
        let a = start(&network, 1);
        let b = start(&network, 2);

        assert!(a.ping(addr(2), Some(*b.node_id())).await.unwrap());
        assert!(!a.ping(addr(2), Some(NodeId::random())).await.unwrap());
        assert_eq!(a.pending_calls(), 0);

        // both sides learned about each other
        assert!(a.routing_table().find_peer_by_id(b.node_id()).is_some());
        assert!(b.routing_table().find_peer_by_id(a.node_id()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_unreachable_times_out() {
        let network = MemoryNetwork::new();
        let a = start(&network, 1);
        assert!(!a.ping(addr(9), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_reply_from_wrong_address_rejected() {
        let network = MemoryNetwork::new();
        let a = start(&network, 1);
        let spoofer = network.bind(addr(3)).unwrap();

        let owner = Arc::new(Notify::new());
        let call = a
            .inner
            .issue(Request::Ping, addr(2), None, &owner)
            .await
            .unwrap();
        let reply = Message::Response(Reply {
            tid: *call.tid(),
            id: NodeId::random(),
            ip: None,
            response: Response::Ping,
        });
        spoofer
            .send(addr(1), &codec::encode(&reply).unwrap())
            .await
            .unwrap();

        let (from, payload) = spoofer.receive().await.unwrap();
        assert_eq!(from, addr(1));
        match codec::decode(&payload, |_| None).unwrap() {
            Message::Error(error) => assert_eq!(error.code, ErrorCode::Generic),
            other => panic!("expected an error, got {:?}", other),
        }
        assert_eq!(call.state(), CallState::Stalled);
        assert!(call.has_socket_mismatch());
    }

    #[tokio::test]
    async fn test_error_from_wrong_address_not_answered() {
        let network = MemoryNetwork::new();
        let a = start(&network, 1);
        let spoofer = network.bind(addr(3)).unwrap();

        let owner = Arc::new(Notify::new());
        let call = a
            .inner
            .issue(Request::Ping, addr(2), None, &owner)
            .await
            .unwrap();
        let error = Message::Error(ErrorMessage {
            tid: *call.tid(),
            code: ErrorCode::Generic,
            message: "A Generic Error Occured: socket mismatch".to_string(),
        });
        spoofer
            .send(addr(1), &codec::encode(&error).unwrap())
            .await
            .unwrap();

        let answer = tokio::time::timeout(Duration::from_millis(200), spoofer.receive()).await;
        assert!(answer.is_err());
        assert_eq!(call.state(), CallState::Stalled);
        assert!(call.has_socket_mismatch());
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_call() {
        let network = MemoryNetwork::new();
        let a = start(&network, 1);
        let remote = network.bind(addr(2)).unwrap();

        let owner = Arc::new(Notify::new());
        let call = a
            .inner
            .issue(Request::Ping, addr(2), None, &owner)
            .await
            .unwrap();
        let (_, request) = remote.receive().await.unwrap();
        let tid = match codec::decode(&request, |_| None).unwrap() {
            Message::Query(query) => query.tid,
            other => panic!("expected a query, got {:?}", other),
        };

        // 19 byte node ID
        let mut reply = b"d1:rd2:id19:abcdefghij012345678e1:t".to_vec();
        reply.extend_from_slice(tid.as_bytes().len().to_string().as_bytes());
        reply.push(b':');
        reply.extend_from_slice(tid.as_bytes());
        reply.extend_from_slice(b"1:y1:re");
        remote.send(addr(1), &reply).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !call.state().is_terminal() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(call.state(), CallState::Error);
    }

    #[tokio::test]
    async fn test_unknown_method_answered() {
        let network = MemoryNetwork::new();
        let _a = start(&network, 1);
        let client = network.bind(addr(5)).unwrap();

        let raw = b"d1:ad2:id20:abcdefghij0123456789e1:q4:vote1:t2:aa1:y1:qe";
        client.send(addr(1), raw).await.unwrap();
        let (_, payload) = client.receive().await.unwrap();
        match codec::decode(&payload, |_| None).unwrap() {
            Message::Error(error) => assert_eq!(error.code, ErrorCode::MethodUnknown),
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let network = MemoryNetwork::new();
        let a = start(&network, 1);
        let b = start(&network, 2);

        let owner = Arc::new(Notify::new());
        let call = b
            .inner
            .issue(
                Request::AnnouncePeer(nott_protocol::AnnounceArgs {
                    info_hash: NodeId::random(),
                    port: 6881,
                    token: vec![0, 0, 0, 0],
                    name: None,
                    implied_port: false,
                }),
                addr(1),
                Some(*a.node_id()),
                &owner,
            )
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), owner.notified())
            .await
            .unwrap();

        assert_eq!(call.state(), CallState::Error);
        match call.response() {
            Some(Message::Error(error)) => {
                assert_eq!(error.code, ErrorCode::Protocol);
                assert_eq!(error.message, "Invalid Token");
            }
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_only_node_stays_silent() {
        let network = MemoryNetwork::new();
        let a = start(&network, 1);
        let transport = network.bind(addr(2)).unwrap();
        let config = DhtConfig {
            read_only: true,
            ..Default::default()
        };
        let quiet = Dht::with_transport(config, Arc::new(transport)).unwrap();

        // the read-only node can ask but is neither answered-to nor recorded
        assert!(quiet.ping(addr(1), Some(*a.node_id())).await.unwrap());
        assert!(a.routing_table().find_peer_by_id(quiet.node_id()).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_issuing() {
        let network = MemoryNetwork::new();
        let a = start(&network, 1);
        a.shutdown();
        assert!(a.is_shut_down());
        assert!(matches!(
            a.ping(addr(2), None).await,
            Err(DhtError::ShutDown)
        ));
        // address released
        assert!(network.bind(addr(1)).is_ok());
    }
}
