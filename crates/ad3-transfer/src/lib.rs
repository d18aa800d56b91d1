//! ad3-transfer — out-of-band file channel between peers.
//!
//! The owner of a file registers a single-use grant with its
//! [`TransferServer`]; the peer holding the grant key pulls the bytes with
//! [`TransferClient`]. Bodies are streamed in fixed-size chunks, so memory
//! use does not depend on file size.
//!
//! The [`frame`] codec is also used for peer RPCs.

pub mod client;
pub mod error;
pub mod frame;
pub mod grant;
pub mod protocol;
pub mod server;

pub use client::{ByteStream, Download, TransferClient};
pub use error::{TransferError, TransferResult};
pub use grant::{GrantRejection, GrantTable};
pub use server::{TransferServer, TransferServerConfig};
