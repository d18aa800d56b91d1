//! Executor side of compute offload.
//!
//! ```text
//! Accepted → Downloading → Computing → Complete
//!     └───────────┴────────────┴─────→ Failed
//! ```
//!
//! One computation runs at a time. Terminal records stay in the table so the
//! requester can poll them, then expire: `delivered_retention` after the
//! first poll that returned them, or `result_retention` after finishing if
//! nobody ever polls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ad3_core::Key;
use ad3_transfer::TransferClient;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{OffloadError, OffloadResult};
use crate::plugin::PluginRegistry;
use crate::rpc::{OffloadReply, OffloadRequest, PollReply};
use crate::worker::WorkerPool;

/// Computation state without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Accepted,
    Downloading,
    Computing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComputationState {
    Accepted,
    Downloading,
    Computing,
    Complete(Vec<f64>),
    Failed(String),
}

impl ComputationState {
    pub fn kind(&self) -> StateKind {
        match self {
            ComputationState::Accepted => StateKind::Accepted,
            ComputationState::Downloading => StateKind::Downloading,
            ComputationState::Computing => StateKind::Computing,
            ComputationState::Complete(_) => StateKind::Complete,
            ComputationState::Failed(_) => StateKind::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ComputationState::Complete(_) | ComputationState::Failed(_)
        )
    }

    fn allows(&self, next: &ComputationState) -> bool {
        use ComputationState::*;
        matches!(
            (self, next),
            (Accepted, Downloading)
                | (Downloading, Computing)
                | (Computing, Complete(_))
                | (Accepted | Downloading | Computing, Failed(_))
        )
    }
}

#[derive(Debug)]
struct Record {
    state: ComputationState,
    plugin: String,
    finished_at: Option<Instant>,
    delivered_at: Option<Instant>,
}

impl Record {
    fn new(plugin: String) -> Self {
        Self {
            state: ComputationState::Accepted,
            plugin,
            finished_at: None,
            delivered_at: None,
        }
    }

    fn transition(&mut self, next: ComputationState) -> OffloadResult<()> {
        if !self.state.allows(&next) {
            return Err(OffloadError::IllegalTransition {
                from: self.state.kind(),
                to: next.kind(),
            });
        }
        if next.is_terminal() {
            self.finished_at = Some(Instant::now());
        }
        self.state = next;
        Ok(())
    }

    fn expired(&self, now: Instant, config: &ExecutorConfig) -> bool {
        if let Some(delivered) = self.delivered_at {
            return now >= delivered + config.delivered_retention;
        }
        match self.finished_at {
            Some(finished) => now >= finished + config.result_retention,
            None => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub delivered_retention: Duration,
    pub result_retention: Duration,
    /// Upper bound on download plus computation. Exceeding it fails the
    /// record and frees the slot.
    pub compute_deadline: Duration,
    /// Where downloaded files are written while being processed.
    pub download_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            delivered_retention: Duration::from_secs(30),
            result_retention: Duration::from_secs(300),
            compute_deadline: Duration::from_secs(300),
            download_dir: std::env::temp_dir(),
        }
    }
}

/// Accepts offloaded computations from peers and answers their polls.
pub struct Executor {
    table: Mutex<HashMap<Key, Record>>,
    plugins: PluginRegistry,
    workers: WorkerPool,
    transfer: TransferClient,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        plugins: PluginRegistry,
        workers: WorkerPool,
        transfer: TransferClient,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            plugins,
            workers,
            transfer,
            config,
        }
    }

    /// Admit or refuse a computation. Accepted work runs in the background.
    pub async fn handle_offload(self: &Arc<Self>, request: OffloadRequest) -> OffloadReply {
        let key = request.file_key;
        {
            let mut table = self.table.lock().await;
            purge_expired(&mut table, &self.config);

            if let Some((busy, _)) = table.iter().find(|(_, r)| !r.state.is_terminal()) {
                debug!(file = %key.short(), busy = %busy.short(), "offload rejected, slot taken");
                return OffloadReply::Reject {
                    reason: "busy".to_string(),
                };
            }
            if !self.plugins.contains(&request.plugin) {
                debug!(file = %key.short(), plugin = %request.plugin, "offload rejected, unknown plugin");
                return OffloadReply::Reject {
                    reason: format!("unknown plugin {}", request.plugin),
                };
            }
            table.insert(key, Record::new(request.plugin.clone()));
        }

        info!(
            file = %key.short(),
            plugin = %request.plugin,
            requester = %request.requester,
            "offload accepted"
        );
        let executor = self.clone();
        tokio::spawn(async move {
            executor.run(request).await;
        });
        OffloadReply::Accept
    }

    /// Current result for `file_key`. Unknown keys read as failed.
    pub async fn handle_poll(&self, file_key: &Key) -> PollReply {
        let mut table = self.table.lock().await;
        purge_expired(&mut table, &self.config);

        let Some(record) = table.get_mut(file_key) else {
            return PollReply::failed();
        };
        match &record.state {
            ComputationState::Complete(vector) => {
                let reply = PollReply::done(vector.clone());
                record.delivered_at.get_or_insert_with(Instant::now);
                reply
            }
            ComputationState::Failed(_) => {
                record.delivered_at.get_or_insert_with(Instant::now);
                PollReply::failed()
            }
            _ => PollReply::pending(),
        }
    }

    pub async fn state_of(&self, file_key: &Key) -> Option<ComputationState> {
        let table = self.table.lock().await;
        table.get(file_key).map(|r| r.state.clone())
    }

    /// Whether a computation currently holds the slot.
    pub async fn is_busy(&self) -> bool {
        let table = self.table.lock().await;
        table.values().any(|r| !r.state.is_terminal())
    }

    async fn run(&self, request: OffloadRequest) {
        let key = request.file_key;
        let local = self.config.download_dir.join(format!("ad3-{}", key.to_hex()));
        let outcome = tokio::time::timeout(
            self.config.compute_deadline,
            self.download_and_compute(&request, &local),
        )
        .await
        .unwrap_or_else(|_| Err("compute deadline exceeded".to_string()));
        if let Err(e) = tokio::fs::remove_file(&local).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?local, error = %e, "could not remove downloaded file");
            }
        }

        match outcome {
            Ok(vector) => {
                info!(file = %key.short(), len = vector.len(), "computation complete");
                self.transition(&key, ComputationState::Complete(vector)).await;
            }
            Err(reason) => {
                warn!(file = %key.short(), %reason, "computation failed");
                self.transition(&key, ComputationState::Failed(reason)).await;
            }
        }
    }

    async fn download_and_compute(
        &self,
        request: &OffloadRequest,
        local: &Path,
    ) -> Result<Vec<f64>, String> {
        let key = request.file_key;

        self.transition(&key, ComputationState::Downloading).await;
        let bytes = self
            .transfer
            .fetch_to_file(
                request.requester.transfer_addr,
                key,
                &request.file_uri,
                local,
            )
            .await
            .map_err(|e| format!("download: {e}"))?;
        debug!(file = %key.short(), bytes, "file downloaded");

        self.transition(&key, ComputationState::Computing).await;
        let plugin = self
            .plugins
            .get(&request.plugin)
            .ok_or_else(|| format!("unknown plugin {}", request.plugin))?;
        let path = local.to_path_buf();
        let vector = self
            .workers
            .run(move || plugin.compute_vector(&path))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| format!("plugin: {e:#}"))?;

        if is_degenerate(&vector) {
            return Err("degenerate vector".to_string());
        }
        Ok(vector)
    }

    /// Apply a transition, logging and discarding it if illegal.
    async fn transition(&self, key: &Key, next: ComputationState) {
        let mut table = self.table.lock().await;
        let Some(record) = table.get_mut(key) else {
            error!(file = %key.short(), to = ?next.kind(), "transition for unknown computation");
            return;
        };
        if let Err(e) = record.transition(next) {
            error!(file = %key.short(), plugin = %record.plugin, error = %e, "transition refused");
        }
    }
}

fn purge_expired(table: &mut HashMap<Key, Record>, config: &ExecutorConfig) {
    let now = Instant::now();
    table.retain(|key, record| {
        let keep = !record.expired(now, config);
        if !keep {
            debug!(file = %key.short(), "computation record expired");
        }
        keep
    });
}

/// Vectors that carry no information: empty, non-finite, or one value
/// repeated across two or more elements.
pub fn is_degenerate(vector: &[f64]) -> bool {
    let Some(first) = vector.first() else {
        return true;
    };
    if vector.iter().any(|v| !v.is_finite()) {
        return true;
    }
    vector.len() >= 2 && vector.iter().all(|v| v == first)
}
