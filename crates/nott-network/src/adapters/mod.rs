//! Transport implementations

pub mod memory;
pub mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::{UdpConfig, UdpTransport};
