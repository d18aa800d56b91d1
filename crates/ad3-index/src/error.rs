//! Error types for the catalogue.

use ad3_core::CoreError;
use ad3_dht::DhtError;
use thiserror::Error;

/// Result type alias for catalogue operations.
pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Store or tuple-space failure.
    #[error("dht error: {0}")]
    Dht(#[from] DhtError),

    /// A row could not be encoded or decoded.
    #[error(transparent)]
    Core(#[from] CoreError),
}
