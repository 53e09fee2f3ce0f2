//! Core protocol types

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{ProtocolError, Result};

/// Size of a node ID in bytes (20 bytes / 160 bits)
pub const NODE_ID_SIZE: usize = 20;

/// Maximum length of a transaction ID
pub const TID_LENGTH: usize = 6;

/// Client marker placed in front of generated node IDs
pub const CLIENT_PREFIX: &[u8; 8] = b"-NO0815-";

/// A 160-bit identifier of a node, an info-hash or a storage target
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_SIZE]);

impl NodeId {
    /// The all-ones ID, farthest from zero
    pub const MAX: NodeId = NodeId([0xff; NODE_ID_SIZE]);

    /// Create a NodeId from a byte array
    pub fn from_bytes(bytes: [u8; NODE_ID_SIZE]) -> Self {
        NodeId(bytes)
    }

    /// Create a NodeId from a slice, which must be exactly 20 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; NODE_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| ProtocolError::InvalidNodeId(bytes.len()))?;
        Ok(NodeId(arr))
    }

    /// A uniformly random ID
    pub fn random() -> Self {
        let mut bytes = [0u8; NODE_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// A fresh local node ID carrying the client marker
    pub fn generate() -> Self {
        let mut bytes = [0u8; NODE_ID_SIZE];
        bytes[..CLIENT_PREFIX.len()].copy_from_slice(CLIENT_PREFIX);
        rand::thread_rng().fill_bytes(&mut bytes[CLIENT_PREFIX.len()..]);
        NodeId(bytes)
    }

    /// Get the bytes of this NodeId
    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| ProtocolError::DeserializationFailed(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Calculate XOR distance between two IDs
    pub fn distance(&self, other: &NodeId) -> [u8; NODE_ID_SIZE] {
        let mut result = [0u8; NODE_ID_SIZE];
        for (i, item) in result.iter_mut().enumerate() {
            *item = self.0[i] ^ other.0[i];
        }
        result
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Orders `a` and `b` by their XOR distance to `target`.
///
/// Only the first byte where `a` and `b` differ decides, since every
/// earlier byte contributes the same distance to both. `Equal` is returned
/// only for `a == b`.
pub fn three_way_distance(target: &NodeId, a: &NodeId, b: &NodeId) -> Ordering {
    for i in 0..NODE_ID_SIZE {
        if a.0[i] != b.0[i] {
            return (a.0[i] ^ target.0[i]).cmp(&(b.0[i] ^ target.0[i]));
        }
    }
    Ordering::Equal
}

/// Short opaque correlator between a query and its reply
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    len: u8,
    bytes: [u8; TID_LENGTH],
}

impl TransactionId {
    /// A random full-length transaction ID
    pub fn random() -> Self {
        let mut bytes = [0u8; TID_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        TransactionId {
            len: TID_LENGTH as u8,
            bytes,
        }
    }

    /// Transaction IDs received from remote nodes must be 1..=6 bytes
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() || raw.len() > TID_LENGTH {
            return Err(ProtocolError::InvalidTransactionId(raw.len()));
        }
        let mut bytes = [0u8; TID_LENGTH];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(TransactionId {
            len: raw.len() as u8,
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", hex::encode(self.as_bytes()))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.as_bytes()))
    }
}
