//! Transfer server: serves granted files to peers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ad3_core::Key;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::TransferResult;
use crate::frame::{read_frame, write_frame};
use crate::grant::GrantTable;
use crate::protocol::{FetchHeader, FetchRequest, DEFAULT_CHUNK_SIZE};

#[derive(Clone, Debug)]
pub struct TransferServerConfig {
    pub chunk_size: usize,
    pub grant_ttl: Duration,
    /// How long a client may take to send its request frame.
    pub request_timeout: Duration,
}

impl Default for TransferServerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            grant_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Listens for fetch requests and streams granted files.
///
/// Grants are issued through [`TransferServer::grants`], which stays usable
/// after [`TransferServer::serve`] has taken ownership of the server.
pub struct TransferServer {
    listener: TcpListener,
    grants: Arc<GrantTable>,
    config: TransferServerConfig,
}

impl TransferServer {
    pub async fn bind(addr: SocketAddr, config: TransferServerConfig) -> TransferResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            grants: Arc::new(GrantTable::new(config.grant_ttl)),
            config,
        })
    }

    pub fn local_addr(&self) -> TransferResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn grants(&self) -> Arc<GrantTable> {
        self.grants.clone()
    }

    pub fn grant(&self, key: Key, path: impl Into<PathBuf>) {
        self.grants.grant(key, path);
    }

    pub fn revoke(&self, key: &Key) -> bool {
        self.grants.revoke(key)
    }

    /// Accept connections until `shutdown` flips. One request per connection.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> TransferResult<()> {
        let addr = self.local_addr()?;
        info!(%addr, "transfer server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "transfer accept failed");
                            continue;
                        }
                    };
                    let grants = self.grants.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &grants, &config).await {
                            warn!(%peer, error = %e, "transfer connection failed");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("transfer server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    grants: &GrantTable,
    config: &TransferServerConfig,
) -> TransferResult<()> {
    let request: FetchRequest =
        match tokio::time::timeout(config.request_timeout, read_frame(&mut stream)).await {
            Ok(request) => request?,
            Err(_) => {
                debug!("client sent no request in time");
                return Ok(());
            }
        };

    let path = match grants.take(&request.key, Path::new(&request.path)) {
        Ok(path) => path,
        Err(rejection) => {
            warn!(key = %request.key.short(), path = %request.path, %rejection, "fetch rejected");
            write_frame(&mut stream, &FetchHeader::rejected(rejection.to_string())).await?;
            return Ok(());
        }
    };

    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(?path, error = %e, "granted file unreadable");
            write_frame(&mut stream, &FetchHeader::error(e.to_string())).await?;
            return Ok(());
        }
    };
    let length = file.metadata().await?.len();

    write_frame(&mut stream, &FetchHeader::ok(length)).await?;
    let sent = stream_file(file, &mut stream, length, config.chunk_size).await?;
    stream.shutdown().await?;
    debug!(key = %request.key.short(), ?path, bytes = sent, "file served");
    Ok(())
}

/// Copy at most `length` bytes in `chunk_size` pieces.
async fn stream_file(
    mut file: File,
    stream: &mut TcpStream,
    length: u64,
    chunk_size: usize,
) -> TransferResult<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut sent = 0u64;
    while sent < length {
        let want = (length - sent).min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            // File shrank since the header went out; the client sees a short stream.
            break;
        }
        stream.write_all(&buf[..n]).await?;
        sent += n as u64;
    }
    Ok(sent)
}
