//! DHT error types

use thiserror::Error;

/// DHT-specific errors
#[derive(Error, Debug)]
pub enum DhtError {
    #[error("Node is shut down")]
    ShutDown,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Value too large: {size} bytes (max {max})")]
    ValueTooLarge { size: usize, max: usize },

    #[error("Protocol error: {0}")]
    Protocol(#[from] nott_protocol::ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] nott_network::NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for DHT operations
pub type Result<T> = std::result::Result<T, DhtError>;
