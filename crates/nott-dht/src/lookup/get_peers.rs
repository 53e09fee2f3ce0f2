//! Content peer lookup

use nott_protocol::{NodeId, Reply, Request, Response};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use super::{LookupFlow, Outcome};
use crate::peer::Peer;

pub(crate) struct GetPeers {
    info_hash: NodeId,
    seen: HashSet<SocketAddr>,
}

impl GetPeers {
    pub(crate) fn new(info_hash: NodeId) -> Self {
        GetPeers {
            info_hash,
            seen: HashSet::new(),
        }
    }
}

impl LookupFlow for GetPeers {
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
        let Response::GetPeers { token, values, .. } = &reply.response else {
            return;
        };
        for value in values {
            if self.seen.insert(*value) {
                out.emit(*value);
            }
        }
        // only nodes handing out tokens are storing nodes for the key
        if token.is_some() {
            out.insert();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nott_protocol::{Nodes, TransactionId};

    #[test]
    fn test_values_emitted_once() {
        let mut flow = GetPeers::new(NodeId::random());
        let peer = Arc::new(Peer::new(NodeId::random(), "10.0.0.2:6881".parse().unwrap()));
        let value: SocketAddr = "192.0.2.7:51413".parse().unwrap();
        let reply = Reply {
            tid: TransactionId::random(),
            id: *peer.id(),
            ip: None,
            response: Response::GetPeers {
                nodes: Nodes::default(),
                token: Some(vec![1; 4]),
                values: vec![value, value],
            },
        };

        let mut out = Outcome::new();
        flow.on_match(&peer, &reply, &mut out);
        assert_eq!(out.items, vec![value]);
        assert!(out.insert);

        let mut again = Outcome::new();
        flow.on_match(&peer, &reply, &mut again);
        assert!(again.items.is_empty());
    }
}
