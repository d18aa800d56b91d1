//! Error types for the DHT boundary.

use thiserror::Error;

/// Result type alias for DHT operations.
pub type DhtResult<T> = Result<T, DhtError>;

/// Errors surfaced by a [`Dht`](crate::Dht) implementation.
#[derive(Debug, Error)]
pub enum DhtError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// The overlay could not be reached at all.
    #[error("dht unavailable: {0}")]
    Unavailable(String),
}
