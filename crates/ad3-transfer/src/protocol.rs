//! Transfer wire messages.
//!
//! ```text
//! client → server   frame  FetchRequest { key, path }
//! server → client   frame  FetchHeader { status, length, message }
//! server → client   raw    `length` bytes (status = ok only)
//! ```

use ad3_core::Key;
use serde::{Deserialize, Serialize};

/// Default size of each raw chunk written by the server (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub key: Key,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Rejected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchHeader {
    pub status: FetchStatus,
    #[serde(default)]
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FetchHeader {
    pub fn ok(length: u64) -> Self {
        Self {
            status: FetchStatus::Ok,
            length,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: FetchStatus::Rejected,
            length: 0,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: FetchStatus::Error,
            length: 0,
            message: Some(message.into()),
        }
    }
}
