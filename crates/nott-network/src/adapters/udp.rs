//! UDP transport
//!
//! Binds a tokio UDP socket; the DHT sends KRPC datagrams through it and a
//! single receive loop reads from it.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{NetworkError, Result};
use crate::transport::{Transport, MAX_DATAGRAM_SIZE};

/// Receive buffer size, generous enough for any datagram a peer may send
const RECV_BUFFER_SIZE: usize = 65535;

/// UDP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UdpConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Port to bind to, 0 picks a free port
    pub port: u16,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 6881,
        }
    }
}

pub struct UdpTransport {
    socket: RwLock<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind a socket according to `config`
    pub async fn bind(config: &UdpConfig) -> Result<Self> {
        let bind_addr = format!("{}:{}", config.bind_addr, config.port);
        let socket = UdpSocket::bind(&bind_addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;
        let local_addr = socket.local_addr()?;
        debug!("UDP transport bound to {}", local_addr);

        Ok(Self {
            socket: RwLock::new(Some(Arc::new(socket))),
            local_addr,
        })
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        let guard = self.socket.read().unwrap_or_else(|e| e.into_inner());
        guard.clone().ok_or(NetworkError::Closed)
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&self, destination: SocketAddr, datagram: &[u8]) -> Result<()> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(NetworkError::MessageTooLarge {
                size: datagram.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let socket = self.socket()?;
        socket
            .send_to(datagram, destination)
            .await
            .map_err(|e| NetworkError::SendFailed(format!("UDP send to {}: {}", destination, e)))?;
        Ok(())
    }

    async fn receive(&self) -> Result<(SocketAddr, Vec<u8>)> {
        let socket = self.socket()?;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let (size, source) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
        buf.truncate(size);
        Ok((source, buf))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn close(&self) {
        let mut guard = self.socket.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}
