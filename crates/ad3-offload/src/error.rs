//! Error types for compute offload.

use ad3_index::IndexError;
use ad3_transfer::TransferError;
use thiserror::Error;

use crate::executor::StateKind;

/// Result type alias for offload operations.
pub type OffloadResult<T> = Result<T, OffloadError>;

#[derive(Debug, Error)]
pub enum OffloadError {
    /// Connection, framing or timeout failure talking to a peer.
    #[error("transport error: {0}")]
    Transport(#[from] TransferError),

    /// The peer answered with something that does not fit the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// The local plugin failed, so no vector could be produced at all.
    #[error("local computation failed: {0}")]
    LocalCompute(String),

    #[error("worker pool error: {0}")]
    Worker(String),

    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: StateKind, to: StateKind },
}
