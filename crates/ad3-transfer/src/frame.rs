//! Length-prefixed JSON frames.
//!
//! A frame is a big-endian `u32` byte count followed by that many bytes of
//! JSON. Shared by the transfer channel and the peer RPCs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{TransferError, TransferResult};

/// Largest frame either side will read.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> TransferResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value).map_err(|e| TransferError::Frame(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransferError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> TransferResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransferError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(|e| TransferError::Frame(e.to_string()))
}
