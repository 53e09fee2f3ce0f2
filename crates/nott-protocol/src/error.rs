//! Error types for protocol operations

use thiserror::Error;

use crate::types::TransactionId;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Invalid message type: {0}")]
    InvalidMessageType(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid node ID length: {0}")]
    InvalidNodeId(usize),

    #[error("Invalid transaction ID length: {0}")]
    InvalidTransactionId(usize),

    #[error("Invalid compact address length: {0}")]
    InvalidAddress(usize),

    #[error("Malformed query {tid}: {reason}")]
    MalformedQuery {
        tid: TransactionId,
        unknown_method: bool,
        reason: String,
    },

    #[error("Malformed reply {tid}: {reason}")]
    MalformedReply { tid: TransactionId, reason: String },

    #[error("No pending request for transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
