//! Error types for the transfer channel.

use thiserror::Error;

/// Result type alias for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(String),

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// The server refused the request (no grant, expired, wrong path).
    #[error("transfer rejected: {0}")]
    Rejected(String),

    /// The server accepted the grant but could not serve the file.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    #[error("timed out")]
    Timeout,
}
