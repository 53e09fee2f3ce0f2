//! Storing items: look up the storing nodes, then put to each of them once

use nott_protocol::item::{encode_value, immutable_target, mutable_target, MAX_SALT_SIZE, MAX_VALUE_SIZE};
use nott_protocol::{NodeId, PutArgs, Reply, Request, Response, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use super::{LookupFlow, Outcome};
use crate::call::Call;
use crate::error::{DhtError, Result};
use crate::peer::Peer;

/// An item to store. Signatures are produced by the caller and passed
/// through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct PutItem {
    pub v: Value,
    /// ed25519 public key of a mutable item
    pub k: Option<Vec<u8>>,
    pub salt: Option<Vec<u8>>,
    pub seq: Option<i64>,
    pub sig: Option<Vec<u8>>,
    /// Only overwrite if the stored sequence number equals this
    pub cas: Option<i64>,
}

impl PutItem {
    pub fn immutable(v: Value) -> Self {
        PutItem {
            v,
            k: None,
            salt: None,
            seq: None,
            sig: None,
            cas: None,
        }
    }

    pub fn mutable(v: Value, k: Vec<u8>, salt: Option<Vec<u8>>, seq: i64, sig: Vec<u8>) -> Self {
        PutItem {
            v,
            k: Some(k),
            salt,
            seq: Some(seq),
            sig: Some(sig),
            cas: None,
        }
    }

    /// The key the item is stored under
    pub fn target(&self) -> Result<NodeId> {
        match &self.k {
            Some(k) => Ok(mutable_target(k, self.salt.as_deref())),
            None => Ok(immutable_target(&self.v)?),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let size = encode_value(&self.v)?.len();
        if size > MAX_VALUE_SIZE {
            return Err(DhtError::ValueTooLarge {
                size,
                max: MAX_VALUE_SIZE,
            });
        }
        if let Some(salt) = &self.salt {
            if salt.len() > MAX_SALT_SIZE {
                return Err(DhtError::ValueTooLarge {
                    size: salt.len(),
                    max: MAX_SALT_SIZE,
                });
            }
        }
        Ok(())
    }

    fn args(&self, token: Vec<u8>) -> PutArgs {
        PutArgs {
            token,
            v: self.v.clone(),
            cas: self.cas,
            k: self.k.clone(),
            salt: self.salt.clone(),
            seq: self.seq,
            sig: self.sig.clone(),
        }
    }
}

pub(crate) struct Put {
    target: NodeId,
    item: PutItem,
    /// nodes already sent the item, kept across refreshes
    stored_at: HashSet<NodeId>,
}

impl Put {
    pub(crate) fn new(item: PutItem) -> Result<Self> {
        item.validate()?;
        Ok(Put {
            target: item.target()?,
            item,
            stored_at: HashSet::new(),
        })
    }
}

impl LookupFlow for Put {
    type Item = SocketAddr;

    fn target(&self) -> NodeId {
        self.target
    }

    fn request(&self) -> Request {
        Request::Get {
            target: self.target,
            seq: None,
        }
    }

    fn on_match(&mut self, peer: &Arc<Peer>, reply: &Reply, out: &mut Outcome<SocketAddr>) {
        let Some(token) = reply.response.token() else {
            return;
        };
        if !self.stored_at.insert(*peer.id()) {
            return;
        }
        out.insert();
        out.follow_up(Request::Put(self.item.args(token.to_vec())));
    }

    fn on_follow_up(&mut self, call: &Call, out: &mut Outcome<SocketAddr>) {
        if let Some(Response::Put) = call.reply().map(|reply| &reply.response) {
            out.emit(call.destination());
        }
    }
}
