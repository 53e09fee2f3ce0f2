//! In-process datagram network
//!
//! Every bound transport owns an address on a shared switchboard. Datagrams
//! to unbound or black-holed addresses are silently lost, like UDP.

use dashmap::{DashMap, DashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use crate::error::{NetworkError, Result};
use crate::transport::{Transport, MAX_DATAGRAM_SIZE};

type Datagram = (SocketAddr, Vec<u8>);

#[derive(Default)]
struct Switchboard {
    endpoints: DashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    blackholed: DashSet<SocketAddr>,
}

/// A shared in-memory network that transports can bind to
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Switchboard>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new transport at `addr`
    pub fn bind(&self, addr: SocketAddr) -> Result<MemoryTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.inner.endpoints.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(NetworkError::AddressInUse(addr)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(MemoryTransport {
                    addr,
                    network: self.clone(),
                    rx: Mutex::new(rx),
                    closed: AtomicBool::new(false),
                })
            }
        }
    }

    /// Drop all traffic to and from `addr` until restored
    pub fn blackhole(&self, addr: SocketAddr) {
        self.inner.blackholed.insert(addr);
    }

    pub fn restore(&self, addr: SocketAddr) {
        self.inner.blackholed.remove(&addr);
    }

    /// Number of bound transports
    pub fn len(&self) -> usize {
        self.inner.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.endpoints.is_empty()
    }

    fn deliver(&self, source: SocketAddr, destination: SocketAddr, datagram: &[u8]) {
        if self.inner.blackholed.contains(&source) || self.inner.blackholed.contains(&destination)
        {
            trace!("Dropping datagram {} -> {} (black-holed)", source, destination);
            return;
        }
        match self.inner.endpoints.get(&destination) {
            Some(endpoint) => {
                let _ = endpoint.send((source, datagram.to_vec()));
            }
            None => trace!("Dropping datagram {} -> {} (unbound)", source, destination),
        }
    }
}

pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
    rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, destination: SocketAddr, datagram: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::Closed);
        }
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(NetworkError::MessageTooLarge {
                size: datagram.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        self.network.deliver(self.addr, destination, datagram);
        Ok(())
    }

    async fn receive(&self) -> Result<(SocketAddr, Vec<u8>)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::Closed);
        }
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(NetworkError::Closed)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.addr)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // dropping the only sender wakes a pending receive
            self.network.inner.endpoints.remove(&self.addr);
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_delivery_between_endpoints() {
        let network = MemoryNetwork::new();
        let a = network.bind(addr("10.0.0.1:6881")).unwrap();
        let b = network.bind(addr("10.0.0.2:6881")).unwrap();

        a.send(addr("10.0.0.2:6881"), b"hello").await.unwrap();
        let (source, data) = b.receive().await.unwrap();

        assert_eq!(source, addr("10.0.0.1:6881"));
        assert_eq!(data, b"hello");
    }

    #[test]
    fn test_address_in_use() {
        let network = MemoryNetwork::new();
        let _a = network.bind(addr("10.0.0.1:6881")).unwrap();
        assert!(matches!(
            network.bind(addr("10.0.0.1:6881")),
            Err(NetworkError::AddressInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_unbound_destination_is_lost() {
        let network = MemoryNetwork::new();
        let a = network.bind(addr("10.0.0.1:6881")).unwrap();
        assert!(a.send(addr("10.0.0.99:6881"), b"void").await.is_ok());
    }

    #[tokio::test]
    async fn test_blackhole_drops_traffic() {
        let network = MemoryNetwork::new();
        let a = network.bind(addr("10.0.0.1:6881")).unwrap();
        let b = network.bind(addr("10.0.0.2:6881")).unwrap();

        network.blackhole(addr("10.0.0.2:6881"));
        a.send(addr("10.0.0.2:6881"), b"lost").await.unwrap();
        network.restore(addr("10.0.0.2:6881"));
        a.send(addr("10.0.0.2:6881"), b"found").await.unwrap();

        let (_, data) = b.receive().await.unwrap();
        assert_eq!(data, b"found");
    }

    #[tokio::test]
    async fn test_drop_releases_address() {
        let network = MemoryNetwork::new();
        {
            let _a = network.bind(addr("10.0.0.1:6881")).unwrap();
            assert_eq!(network.len(), 1);
        }
        assert!(network.is_empty());
        assert!(network.bind(addr("10.0.0.1:6881")).is_ok());
    }

    #[tokio::test]
    async fn test_close_fails_later_calls() {
        let network = MemoryNetwork::new();
        let a = network.bind(addr("10.0.0.1:6881")).unwrap();
        a.close();

        assert!(matches!(
            a.send(addr("10.0.0.2:6881"), b"x").await,
            Err(NetworkError::Closed)
        ));
        assert!(matches!(a.receive().await, Err(NetworkError::Closed)));
    }
}
