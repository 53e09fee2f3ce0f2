//! Node lookup: find the closest nodes to a target and the node owning it

use nott_protocol::{NodeId, Reply, Request};
use std::net::SocketAddr;
use std::sync::Arc;

use super::{LookupFlow, Outcome};
use crate::peer::Peer;

pub(crate) struct FindNode {
    target: NodeId,
}

impl FindNode {
    pub(crate) fn new(target: NodeId) -> Self {
        FindNode { target }
    }
}

impl LookupFlow for FindNode {
    type Item = SocketAddr;

    fn target(&self) -> NodeId {
        self.target
    }

    fn request(&self) -> Request {
        Request::FindNode {
            target: self.target,
        }
    }

    fn on_match(&mut self, peer: &Arc<Peer>, _reply: &Reply, out: &mut Outcome<SocketAddr>) {
        if *peer.id() == self.target {
            out.emit(peer.address());
        }
        out.insert();
    }
}
