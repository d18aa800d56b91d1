//! Peer RPCs: `Offload`, `Poll`, `Ping`.
//!
//! One JSON request frame and one JSON response frame per TCP connection,
//! using the transfer channel's frame codec.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use ad3_core::{Key, PeerContact};
use ad3_transfer::frame::{read_frame, write_frame};
use ad3_transfer::TransferError;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{OffloadError, OffloadResult};
use crate::executor::Executor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffloadRequest {
    pub file_key: Key,
    /// Path the file is granted under on the requester's transfer server.
    pub file_uri: String,
    pub plugin: String,
    pub requester: PeerContact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum OffloadReply {
    Accept,
    Reject { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollReply {
    pub complete: bool,
    pub failed: bool,
    pub vector: Option<Vec<f64>>,
}

impl PollReply {
    pub fn pending() -> Self {
        Self {
            complete: false,
            failed: false,
            vector: None,
        }
    }

    pub fn done(vector: Vec<f64>) -> Self {
        Self {
            complete: true,
            failed: false,
            vector: Some(vector),
        }
    }

    pub fn failed() -> Self {
        Self {
            complete: true,
            failed: true,
            vector: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PeerRequest {
    Offload(OffloadRequest),
    Poll { file_key: Key },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PeerResponse {
    Offload(OffloadReply),
    Poll(PollReply),
    Pong,
}

/// Boxed future returned by [`PeerRpc`] calls.
pub type RpcFuture<'a, T> = Pin<Box<dyn Future<Output = OffloadResult<T>> + Send + 'a>>;

/// Outbound calls to other peers. Injected so the requester can be driven
/// without a network.
pub trait PeerRpc: Send + Sync {
    fn offload<'a>(&'a self, peer: &'a PeerContact, request: OffloadRequest)
    -> RpcFuture<'a, OffloadReply>;

    fn poll<'a>(&'a self, peer: &'a PeerContact, file_key: Key) -> RpcFuture<'a, PollReply>;

    fn ping<'a>(&'a self, peer: &'a PeerContact) -> RpcFuture<'a, ()>;
}

/// [`PeerRpc`] over TCP with a per-call timeout.
#[derive(Clone, Debug)]
pub struct TcpRpcClient {
    timeout: Duration,
}

impl Default for TcpRpcClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl TcpRpcClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn call(&self, addr: SocketAddr, request: &PeerRequest) -> OffloadResult<PeerResponse> {
        let exchange = async {
            let mut stream = TcpStream::connect(addr).await?;
            write_frame(&mut stream, request).await?;
            let response: PeerResponse = read_frame(&mut stream).await?;
            Ok::<_, TransferError>(response)
        };
        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransferError::Timeout)??;
        Ok(response)
    }
}

impl PeerRpc for TcpRpcClient {
    fn offload<'a>(
        &'a self,
        peer: &'a PeerContact,
        request: OffloadRequest,
    ) -> RpcFuture<'a, OffloadReply> {
        Box::pin(async move {
            match self.call(peer.rpc_addr, &PeerRequest::Offload(request)).await? {
                PeerResponse::Offload(reply) => Ok(reply),
                other => Err(unexpected("offload", &other)),
            }
        })
    }

    fn poll<'a>(&'a self, peer: &'a PeerContact, file_key: Key) -> RpcFuture<'a, PollReply> {
        Box::pin(async move {
            match self.call(peer.rpc_addr, &PeerRequest::Poll { file_key }).await? {
                PeerResponse::Poll(reply) => Ok(reply),
                other => Err(unexpected("poll", &other)),
            }
        })
    }

    fn ping<'a>(&'a self, peer: &'a PeerContact) -> RpcFuture<'a, ()> {
        Box::pin(async move {
            match self.call(peer.rpc_addr, &PeerRequest::Ping).await? {
                PeerResponse::Pong => Ok(()),
                other => Err(unexpected("ping", &other)),
            }
        })
    }
}

fn unexpected(call: &str, response: &PeerResponse) -> OffloadError {
    OffloadError::Protocol(format!("unexpected response to {call}: {response:?}"))
}

/// Serves inbound peer RPCs against the local [`Executor`].
pub struct RpcServer {
    listener: TcpListener,
    timeout: Duration,
}

impl RpcServer {
    pub async fn bind(addr: SocketAddr, timeout: Duration) -> OffloadResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransferError::from)?;
        Ok(Self { listener, timeout })
    }

    pub fn local_addr(&self) -> OffloadResult<SocketAddr> {
        Ok(self.listener.local_addr().map_err(TransferError::from)?)
    }

    pub async fn serve(
        self,
        executor: Arc<Executor>,
        mut shutdown: watch::Receiver<bool>,
    ) -> OffloadResult<()> {
        let addr = self.local_addr()?;
        info!(%addr, "rpc server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "rpc accept failed");
                            continue;
                        }
                    };
                    let executor = executor.clone();
                    let timeout = self.timeout;
                    tokio::spawn(async move {
                        match tokio::time::timeout(timeout, handle_connection(stream, &executor)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!(%peer, error = %e, "rpc connection failed"),
                            Err(_) => debug!(%peer, "rpc connection timed out"),
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("rpc server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn handle_connection(mut stream: TcpStream, executor: &Arc<Executor>) -> OffloadResult<()> {
    let request: PeerRequest = read_frame(&mut stream).await?;
    let response = match request {
        PeerRequest::Offload(request) => PeerResponse::Offload(executor.handle_offload(request).await),
        PeerRequest::Poll { file_key } => PeerResponse::Poll(executor.handle_poll(&file_key).await),
        PeerRequest::Ping => PeerResponse::Pong,
    };
    write_frame(&mut stream, &response).await?;
    Ok(())
}
