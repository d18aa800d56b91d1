//! Error types for the ad3 core model.

use thiserror::Error;

/// Result type alias for core model operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while encoding, decoding or validating core types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid config: {0}")]
    Config(String),
}
