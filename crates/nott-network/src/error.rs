//! Network error types

use std::net::SocketAddr;
use thiserror::Error;

/// Transport-level errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Address already in use: {0}")]
    AddressInUse(SocketAddr),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Transport closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;
