//! Announce: find the storing nodes of an info-hash, then register with them

use nott_protocol::{AnnounceArgs, NodeId, Reply, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use super::{LookupFlow, Outcome};
use crate::call::Call;
use crate::peer::Peer;

pub(crate) struct Announce {
    info_hash: NodeId,
    /// `None` asks nodes to use the port our datagrams come from
    port: Option<u16>,
}

impl Announce {
    pub(crate) fn new(info_hash: NodeId, port: Option<u16>) -> Self {
        Announce { info_hash, port }
    }
}

impl LookupFlow for Announce {
    type Item = SocketAddr;

    fn target(&self) -> NodeId {
        self.info_hash
    }

    fn request(&self) -> Request {
        Request::GetPeers {
            info_hash: self.info_hash,
        }
    }

    fn on_match(&mut self, _peer: &Arc<Peer>, reply: &Reply, out: &mut Outcome<SocketAddr>) {
        let Some(token) = reply.response.token() else {
            return;
        };
        out.insert();
        out.follow_up(Request::AnnouncePeer(AnnounceArgs {
            info_hash: self.info_hash,
            port: self.port.unwrap_or(0),
            token: token.to_vec(),
            name: None,
            implied_port: self.port.is_none(),
        }));
    }

    fn on_follow_up(&mut self, call: &Call, out: &mut Outcome<SocketAddr>) {
        if let Some(Response::AnnouncePeer) = call.reply().map(|reply| &reply.response) {
            out.emit(call.destination());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nott_protocol::{Message, Nodes, Query, TransactionId};
    use tokio::sync::Notify;

    fn get_peers_reply(token: Option<Vec<u8>>) -> Reply {
        Reply {
            tid: TransactionId::random(),
            id: NodeId::random(),
            ip: None,
            response: Response::GetPeers {
                nodes: Nodes::default(),
                token,
                values: Vec::new(),
            },
        }
    }

    #[test]
    fn test_implied_port_when_unset() {
        let info_hash = NodeId::random();
        let mut flow = Announce::new(info_hash, None);
        let peer = Arc::new(Peer::new(NodeId::random(), "10.0.0.2:6881".parse().unwrap()));

        let mut out = Outcome::new();
        flow.on_match(&peer, &get_peers_reply(Some(vec![9; 4])), &mut out);
        assert!(out.insert);
        match out.follow_up {
            Some(Request::AnnouncePeer(args)) => {
                assert_eq!(args.info_hash, info_hash);
                assert!(args.implied_port);
                assert_eq!(args.token, vec![9; 4]);
            }
            other => panic!("unexpected follow-up: {:?}", other),
        }
    }

    #[test]
    fn test_tokenless_reply_skipped() {
        let mut flow = Announce::new(NodeId::random(), Some(51413));
        let peer = Arc::new(Peer::new(NodeId::random(), "10.0.0.2:6881".parse().unwrap()));
        let mut out = Outcome::new();
        flow.on_match(&peer, &get_peers_reply(None), &mut out);
        assert!(!out.insert);
        assert!(out.follow_up.is_none());
    }

    #[test]
    fn test_acknowledged_announce_emits_responder() {
        let mut flow = Announce::new(NodeId::random(), Some(51413));
        let destination: SocketAddr = "10.0.0.3:6881".parse().unwrap();
        let query = Query {
            tid: TransactionId::random(),
            id: NodeId::random(),
            read_only: false,
            request: flow.request(),
        };
        let call = Call::new(query, destination, None, Arc::new(Notify::new()));
        call.has_send();
        call.deliver(Message::Response(Reply {
            tid: *call.tid(),
            id: NodeId::random(),
            ip: None,
            response: Response::AnnouncePeer,
        }));

        let mut out = Outcome::new();
        flow.on_follow_up(&call, &mut out);
        assert_eq!(out.items, vec![destination]);
    }
}
