//! Stored item lookup

use nott_protocol::{NodeId, Reply, Request, Response, StoredItem};
use std::sync::Arc;

use super::{LookupFlow, Outcome};
use crate::peer::Peer;

pub(crate) struct Get {
    target: NodeId,
    seq: Option<i64>,
}

impl Get {
    /// With `seq` set, nodes may omit items not newer than it
    pub(crate) fn new(target: NodeId, seq: Option<i64>) -> Self {
        Get { target, seq }
    }
}

impl LookupFlow for Get {
    type Item = StoredItem;

    fn target(&self) -> NodeId {
        self.target
    }

    fn request(&self) -> Request {
        Request::Get {
            target: self.target,
            seq: self.seq,
        }
    }

    fn on_match(&mut self, _peer: &Arc<Peer>, reply: &Reply, out: &mut Outcome<StoredItem>) {
        let Response::Get { token, item, .. } = &reply.response else {
            return;
        };
        if let Some(item) = item {
            out.emit(item.clone());
        }
        if token.is_some() {
            out.insert();
        }
    }
}
