//! Nott Network Layer
//!
//! Datagram transports the DHT runs on:
//! - UDP over tokio sockets
//! - An in-process network for tests and simulations

pub mod adapters;
pub mod error;
pub mod transport;

pub use adapters::{MemoryNetwork, MemoryTransport, UdpConfig, UdpTransport};
pub use error::{NetworkError, Result};
pub use transport::{Transport, MAX_DATAGRAM_SIZE};
