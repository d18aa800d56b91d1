//! ad3-offload — moving feature-vector computation to idle peers.
//!
//! - **`requester`** — [`Requester`]: solicit candidates, grant the file,
//!   poll until done, fall back to local computation
//! - **`executor`** — [`Executor`]: accept one offload at a time, download,
//!   compute, answer polls
//! - **`rpc`** — `Offload` / `Poll` / `Ping` over framed TCP
//! - **`plugin`** — the [`VectorPlugin`] boundary and built-ins
//! - **`worker`** — bounded pool for CPU-bound plugin calls

pub mod error;
pub mod executor;
pub mod plugin;
pub mod requester;
pub mod rpc;
pub mod worker;

pub use error::{OffloadError, OffloadResult};
pub use executor::{ComputationState, Executor, ExecutorConfig, StateKind};
pub use plugin::{ByteHistogramPlugin, PluginRegistry, VectorPlugin};
pub use requester::{FallbackReason, OffloadOutcome, Requester, RequesterConfig, VectorSource};
pub use rpc::{OffloadReply, OffloadRequest, PeerRpc, PollReply, RpcServer, TcpRpcClient};
pub use worker::WorkerPool;
