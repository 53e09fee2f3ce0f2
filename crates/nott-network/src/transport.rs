//! Datagram transport trait

use std::net::SocketAddr;

use crate::error::Result;

/// Largest datagram a transport accepts for sending
pub const MAX_DATAGRAM_SIZE: usize = 1472;

/// Unreliable, unordered datagram delivery.
///
/// A failed `send` must surface as an error so the caller can abandon the
/// exchange it belongs to. `receive` is called in a loop by a single reader.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `destination`
    async fn send(&self, destination: SocketAddr, datagram: &[u8]) -> Result<()>;

    /// Wait for the next datagram and its source address
    async fn receive(&self) -> Result<(SocketAddr, Vec<u8>)>;

    /// The address this transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Release the underlying resources; later calls fail with `Closed`
    fn close(&self);
}
