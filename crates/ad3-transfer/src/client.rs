//! Transfer client: fetches a granted file as a byte stream.

use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use ad3_core::Key;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{TransferError, TransferResult};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{FetchHeader, FetchRequest, FetchStatus, DEFAULT_CHUNK_SIZE};

/// A type-erased, fallible async stream of file chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = TransferResult<Bytes>> + Send>>;

/// An opened download: the announced length plus the body stream.
pub struct Download {
    pub length: u64,
    pub stream: ByteStream,
}

#[derive(Clone, Debug)]
pub struct TransferClient {
    /// Bound on connecting and receiving the header, and on each body read.
    timeout: Duration,
    read_size: usize,
}

impl Default for TransferClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl TransferClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            read_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Request `path` under grant `key` and return the body as it arrives.
    pub async fn fetch(&self, addr: SocketAddr, key: Key, path: &str) -> TransferResult<ByteStream> {
        Ok(self.open(addr, key, path).await?.stream)
    }

    pub async fn open(&self, addr: SocketAddr, key: Key, path: &str) -> TransferResult<Download> {
        let request = FetchRequest {
            key,
            path: path.to_string(),
        };
        let handshake = async {
            let mut stream = TcpStream::connect(addr).await?;
            write_frame(&mut stream, &request).await?;
            let header: FetchHeader = read_frame(&mut stream).await?;
            Ok::<_, TransferError>((stream, header))
        };
        let (stream, header) = tokio::time::timeout(self.timeout, handshake)
            .await
            .map_err(|_| TransferError::Timeout)??;

        let message = header.message.unwrap_or_default();
        match header.status {
            FetchStatus::Ok => {}
            FetchStatus::Rejected => return Err(TransferError::Rejected(message)),
            FetchStatus::Error => return Err(TransferError::Remote(message)),
        }
        debug!(%addr, key = %key.short(), length = header.length, "download opened");

        Ok(Download {
            length: header.length,
            stream: body_stream(stream, header.length, self.read_size, self.timeout),
        })
    }

    /// Stream `path` into `dest`, checking the byte count against the
    /// announced length. Returns the number of bytes written.
    pub async fn fetch_to_file(
        &self,
        addr: SocketAddr,
        key: Key,
        path: &str,
        dest: &Path,
    ) -> TransferResult<u64> {
        let Download { length, mut stream } = self.open(addr, key, path).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        if written != length {
            return Err(TransferError::Truncated {
                expected: length,
                received: written,
            });
        }
        debug!(?dest, bytes = written, "download complete");
        Ok(written)
    }
}

/// Yield exactly `length` bytes from `stream`, or an error if it ends early
/// or stalls for longer than `idle` between reads.
fn body_stream(stream: TcpStream, length: u64, read_size: usize, idle: Duration) -> ByteStream {
    let state = (stream, 0u64, vec![0u8; read_size.max(1)]);
    Box::pin(futures_util::stream::unfold(
        Some(state),
        move |state| async move {
            let Some((mut stream, received, mut buf)) = state else {
                return None;
            };
            if received >= length {
                return None;
            }
            let want = (length - received).min(buf.len() as u64) as usize;
            let read = match tokio::time::timeout(idle, stream.read(&mut buf[..want])).await {
                Ok(read) => read,
                Err(_) => return Some((Err(TransferError::Timeout), None)),
            };
            match read {
                Ok(0) => Some((
                    Err(TransferError::Truncated {
                        expected: length,
                        received,
                    }),
                    None,
                )),
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    Some((Ok(chunk), Some((stream, received + n as u64, buf))))
                }
                Err(e) => Some((Err(e.into()), None)),
            }
        },
    ))
}
