//! Compact peer and node encodings
//!
//! A compact address is the raw IP followed by the big-endian port: 6 bytes
//! for IPv4, 18 bytes for IPv6. Node lists concatenate `id || address`
//! tuples, IPv4 and IPv6 entries travelling in separate fields.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{ProtocolError, Result};
use crate::types::{NodeId, NODE_ID_SIZE};

pub const COMPACT_V4_LEN: usize = 6;
pub const COMPACT_V6_LEN: usize = 18;
pub const NODE_V4_LEN: usize = NODE_ID_SIZE + COMPACT_V4_LEN;
pub const NODE_V6_LEN: usize = NODE_ID_SIZE + COMPACT_V6_LEN;

/// A node ID bound to the address it was reported at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeEntry {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl NodeEntry {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        NodeEntry { id, addr }
    }
}

pub fn encode_compact_addr(addr: &SocketAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(COMPACT_V6_LEN);
    match addr.ip() {
        IpAddr::V4(ip) => out.extend_from_slice(&ip.octets()),
        IpAddr::V6(ip) => out.extend_from_slice(&ip.octets()),
    }
    out.extend_from_slice(&addr.port().to_be_bytes());
    out
}

/// Returns `None` for port 0, which is reserved and never a reachable peer.
pub fn decode_compact_addr(bytes: &[u8]) -> Result<Option<SocketAddr>> {
    let (ip, port_bytes) = match bytes.len() {
        COMPACT_V4_LEN => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&bytes[..4]);
            (IpAddr::V4(Ipv4Addr::from(octets)), &bytes[4..])
        }
        COMPACT_V6_LEN => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            (IpAddr::V6(Ipv6Addr::from(octets)), &bytes[16..])
        }
        len => return Err(ProtocolError::InvalidAddress(len)),
    };
    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    if port == 0 {
        return Ok(None);
    }
    Ok(Some(SocketAddr::new(ip, port)))
}

/// Encode the IPv4 entries of `entries`, skipping everything else
pub fn encode_nodes_v4(entries: &[NodeEntry]) -> Vec<u8> {
    encode_nodes(entries, false)
}

/// Encode the IPv6 entries of `entries`, skipping everything else
pub fn encode_nodes_v6(entries: &[NodeEntry]) -> Vec<u8> {
    encode_nodes(entries, true)
}

fn encode_nodes(entries: &[NodeEntry], v6: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries.iter().filter(|e| e.addr.is_ipv6() == v6) {
        out.extend_from_slice(entry.id.as_bytes());
        out.extend_from_slice(&encode_compact_addr(&entry.addr));
    }
    out
}

pub fn decode_nodes_v4(bytes: &[u8]) -> Result<Vec<NodeEntry>> {
    decode_nodes(bytes, NODE_V4_LEN)
}

pub fn decode_nodes_v6(bytes: &[u8]) -> Result<Vec<NodeEntry>> {
    decode_nodes(bytes, NODE_V6_LEN)
}

fn decode_nodes(bytes: &[u8], stride: usize) -> Result<Vec<NodeEntry>> {
    if bytes.len() % stride != 0 {
        return Err(ProtocolError::InvalidAddress(bytes.len()));
    }
    let mut entries = Vec::with_capacity(bytes.len() / stride);
    for chunk in bytes.chunks_exact(stride) {
        let id = NodeId::from_slice(&chunk[..NODE_ID_SIZE])?;
        // entries with port 0 are junk, drop them silently
        if let Some(addr) = decode_compact_addr(&chunk[NODE_ID_SIZE..])? {
            entries.push(NodeEntry { id, addr });
        }
    }
    Ok(entries)
}
