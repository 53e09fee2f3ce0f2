//! Nott Protocol Module
//!
//! Identifiers, compact address encoding and the typed KRPC messages spoken
//! on the Mainline DHT, together with the bencode wire codec and the helpers
//! for the signed value storage extension.

pub mod address;
pub mod codec;
pub mod error;
pub mod item;
pub mod message;
pub mod types;

pub use address::NodeEntry;
pub use error::{ProtocolError, Result};
pub use message::{
    AnnounceArgs, ErrorCode, ErrorMessage, Message, Nodes, PutArgs, Query, Reply, Request,
    RequestKind, Response, StoredItem,
};
pub use serde_bencode::value::Value;
pub use types::{three_way_distance, NodeId, TransactionId, NODE_ID_SIZE};
