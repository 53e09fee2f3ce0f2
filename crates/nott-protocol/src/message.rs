//! Typed KRPC messages
//!
//! Every datagram is one of a query, a reply or an error. Queries and
//! replies carry one variant per RPC kind; a reply is only meaningful
//! together with the kind of the query it answers, which the codec learns
//! from the pending transaction.

use serde_bencode::value::Value;
use std::fmt;
use std::net::SocketAddr;

use crate::address::NodeEntry;
use crate::types::{NodeId, TransactionId};

/// The RPC methods understood by the DHT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Ping,
    FindNode,
    GetPeers,
    Get,
    Put,
    AnnouncePeer,
}

impl RequestKind {
    pub fn method(&self) -> &'static str {
        match self {
            RequestKind::Ping => "ping",
            RequestKind::FindNode => "find_node",
            RequestKind::GetPeers => "get_peers",
            RequestKind::Get => "get",
            RequestKind::Put => "put",
            RequestKind::AnnouncePeer => "announce_peer",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "ping" => Some(RequestKind::Ping),
            "find_node" => Some(RequestKind::FindNode),
            "get_peers" => Some(RequestKind::GetPeers),
            "get" => Some(RequestKind::Get),
            "put" => Some(RequestKind::Put),
            "announce_peer" => Some(RequestKind::AnnouncePeer),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// Arguments of a signed or immutable value store
#[derive(Debug, Clone, PartialEq)]
pub struct PutArgs {
    pub token: Vec<u8>,
    pub v: Value,
    pub cas: Option<i64>,
    pub k: Option<Vec<u8>>,
    pub salt: Option<Vec<u8>>,
    pub seq: Option<i64>,
    pub sig: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnounceArgs {
    pub info_hash: NodeId,
    pub port: u16,
    pub token: Vec<u8>,
    pub name: Option<Vec<u8>>,
    /// Use the datagram source port instead of `port`
    pub implied_port: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    FindNode { target: NodeId },
    GetPeers { info_hash: NodeId },
    Get { target: NodeId, seq: Option<i64> },
    Put(PutArgs),
    AnnouncePeer(AnnounceArgs),
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Ping => RequestKind::Ping,
            Request::FindNode { .. } => RequestKind::FindNode,
            Request::GetPeers { .. } => RequestKind::GetPeers,
            Request::Get { .. } => RequestKind::Get,
            Request::Put(_) => RequestKind::Put,
            Request::AnnouncePeer(_) => RequestKind::AnnouncePeer,
        }
    }
}

/// Routing hints, split by address family as on the wire
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Nodes {
    pub v4: Vec<NodeEntry>,
    pub v6: Vec<NodeEntry>,
}

impl Nodes {
    /// Split a mixed list into the two families
    pub fn from_entries(entries: impl IntoIterator<Item = NodeEntry>) -> Self {
        let (v6, v4) = entries.into_iter().partition(|e| e.addr.is_ipv6());
        Nodes { v4, v6 }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeEntry> {
        self.v6.iter().chain(self.v4.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }
}

/// A value returned by `get`, with the signature fields passed through as-is
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub v: Value,
    pub k: Option<Vec<u8>>,
    pub seq: Option<i64>,
    pub sig: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ping,
    FindNode {
        nodes: Nodes,
    },
    GetPeers {
        nodes: Nodes,
        token: Option<Vec<u8>>,
        values: Vec<SocketAddr>,
    },
    Get {
        nodes: Nodes,
        token: Option<Vec<u8>>,
        item: Option<StoredItem>,
    },
    Put,
    AnnouncePeer,
}

impl Response {
    pub fn kind(&self) -> RequestKind {
        match self {
            Response::Ping => RequestKind::Ping,
            Response::FindNode { .. } => RequestKind::FindNode,
            Response::GetPeers { .. } => RequestKind::GetPeers,
            Response::Get { .. } => RequestKind::Get,
            Response::Put => RequestKind::Put,
            Response::AnnouncePeer => RequestKind::AnnouncePeer,
        }
    }

    pub fn nodes(&self) -> Option<&Nodes> {
        match self {
            Response::FindNode { nodes }
            | Response::GetPeers { nodes, .. }
            | Response::Get { nodes, .. } => Some(nodes),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&[u8]> {
        match self {
            Response::GetPeers { token, .. } | Response::Get { token, .. } => token.as_deref(),
            _ => None,
        }
    }
}

/// KRPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Generic,
    Server,
    Protocol,
    MethodUnknown,
    Other(i64),
}

impl ErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::Generic => 201,
            ErrorCode::Server => 202,
            ErrorCode::Protocol => 203,
            ErrorCode::MethodUnknown => 204,
            ErrorCode::Other(code) => *code,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            201 => ErrorCode::Generic,
            202 => ErrorCode::Server,
            203 => ErrorCode::Protocol,
            204 => ErrorCode::MethodUnknown,
            other => ErrorCode::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub tid: TransactionId,
    pub id: NodeId,
    /// Sender does not answer queries and must not be added to routing tables
    pub read_only: bool,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub tid: TransactionId,
    pub id: NodeId,
    /// Our address as seen by the responder
    pub ip: Option<SocketAddr>,
    pub response: Response,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub tid: TransactionId,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Query(Query),
    Response(Reply),
    Error(ErrorMessage),
}

impl Message {
    pub fn tid(&self) -> &TransactionId {
        match self {
            Message::Query(q) => &q.tid,
            Message::Response(r) => &r.tid,
            Message::Error(e) => &e.tid,
        }
    }

    /// The node ID claimed by the sender; errors carry none
    pub fn sender_id(&self) -> Option<NodeId> {
        match self {
            Message::Query(q) => Some(q.id),
            Message::Response(r) => Some(r.id),
            Message::Error(_) => None,
        }
    }
}
