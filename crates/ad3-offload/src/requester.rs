//! Requester side of compute offload.
//!
//! ```text
//! Idle → Soliciting → Granted → Polling → Done
//!            │                     │
//!            └──────→ FellBack ←───┘   (compute locally)
//! ```
//!
//! Candidates come from `find_node` on the file key and are tried in order,
//! each at most once. A grant for the file is registered before every
//! `Offload` call so an accepting executor can start downloading at once.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ad3_core::{AudioFile, Key, PeerContact, Plugin, PluginOutput};
use ad3_index::Catalog;
use ad3_transfer::GrantTable;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{OffloadError, OffloadResult};
use crate::plugin::PluginRegistry;
use crate::rpc::{OffloadReply, OffloadRequest, PeerRpc};
use crate::worker::WorkerPool;

#[derive(Clone, Debug)]
pub struct RequesterConfig {
    /// When false every computation runs locally.
    pub enabled: bool,
    pub poll_interval: Duration,
    /// Measured from the start of solicitation.
    pub deadline: Duration,
    pub max_candidates: usize,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(10),
            deadline: Duration::from_secs(300),
            max_candidates: 8,
        }
    }
}

/// Why a computation ended up running locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    NoCandidates,
    AllRejected,
    RemoteFailed,
    PollError,
    DeadlineExceeded,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackReason::NoCandidates => "no candidates",
            FallbackReason::AllRejected => "all candidates rejected",
            FallbackReason::RemoteFailed => "remote computation failed",
            FallbackReason::PollError => "poll error",
            FallbackReason::DeadlineExceeded => "deadline exceeded",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VectorSource {
    Remote(PeerContact),
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffloadOutcome {
    pub vector: Vec<f64>,
    pub source: VectorSource,
    /// Set when remote computation was attempted and abandoned.
    pub fallback: Option<FallbackReason>,
}

/// Obtains feature vectors, preferring idle peers over local CPU.
pub struct Requester {
    catalog: Arc<Catalog>,
    rpc: Arc<dyn PeerRpc>,
    grants: Arc<GrantTable>,
    local: PeerContact,
    plugins: PluginRegistry,
    workers: WorkerPool,
    config: RequesterConfig,
}

impl Requester {
    pub fn new(
        catalog: Arc<Catalog>,
        rpc: Arc<dyn PeerRpc>,
        grants: Arc<GrantTable>,
        local: PeerContact,
        plugins: PluginRegistry,
        workers: WorkerPool,
        config: RequesterConfig,
    ) -> Self {
        Self {
            catalog,
            rpc,
            grants,
            local,
            plugins,
            workers,
            config,
        }
    }

    /// Compute `plugin` over the file at `path`, remotely if a peer takes
    /// it, otherwise here.
    ///
    /// Fails only when the local plugin is missing or fails itself.
    pub async fn compute(
        &self,
        file_key: Key,
        plugin: &str,
        path: &Path,
    ) -> OffloadResult<OffloadOutcome> {
        if !self.config.enabled {
            let vector = self.compute_locally(plugin, path).await?;
            return Ok(OffloadOutcome {
                vector,
                source: VectorSource::Local,
                fallback: None,
            });
        }

        let reason = match self.try_remote(file_key, plugin, path).await {
            Ok((peer, vector)) => {
                info!(file = %file_key.short(), %peer, "vector computed remotely");
                return Ok(OffloadOutcome {
                    vector,
                    source: VectorSource::Remote(peer),
                    fallback: None,
                });
            }
            Err(reason) => reason,
        };

        info!(file = %file_key.short(), %reason, "computing locally");
        let vector = self.compute_locally(plugin, path).await?;
        Ok(OffloadOutcome {
            vector,
            source: VectorSource::Local,
            fallback: Some(reason),
        })
    }

    /// Compute a vector and persist it: the `PluginOutput` for the pair is
    /// written (replacing any previous one) and the file row is refreshed.
    pub async fn update_vector(
        &self,
        plugin: &Plugin,
        file: &AudioFile,
        path: &Path,
    ) -> OffloadResult<(OffloadOutcome, PluginOutput)> {
        let outcome = self.compute(file.key(), &plugin.name, path).await?;

        let plugin = self.catalog.save(plugin).await?;
        let output = PluginOutput::new(outcome.vector.clone(), plugin.key(), file.key());
        let output = self.catalog.save(&output).await?;

        let mut refreshed = file.clone();
        refreshed.vector = Some(outcome.vector.clone());
        self.catalog.save(&refreshed).await?;

        debug!(file = %file.key().short(), plugin = %plugin.name, "vector stored");
        Ok((outcome, output))
    }

    /// Everything from `find_node` to the last poll runs under one
    /// deadline measured from the start of solicitation.
    async fn try_remote(
        &self,
        file_key: Key,
        plugin: &str,
        path: &Path,
    ) -> Result<(PeerContact, Vec<f64>), FallbackReason> {
        let until = Instant::now() + self.config.deadline;

        let attempt = async {
            let candidates = match self.catalog.dht().find_node(file_key).await {
                Ok(peers) => peers,
                Err(e) => {
                    warn!(error = %e, "find_node failed");
                    Vec::new()
                }
            };
            let candidates: Vec<PeerContact> = candidates
                .into_iter()
                .filter(|p| p.id != self.local.id)
                .take(self.config.max_candidates)
                .collect();
            if candidates.is_empty() {
                return Err(FallbackReason::NoCandidates);
            }

            let Some(peer) = self.solicit(file_key, plugin, path, &candidates).await else {
                return Err(FallbackReason::AllRejected);
            };
            let vector = self.poll_until_done(file_key, &peer, until).await?;
            Ok::<_, FallbackReason>((peer, vector))
        };

        let result = match tokio::time::timeout_at(until, attempt).await {
            Ok(result) => result,
            Err(_) => Err(FallbackReason::DeadlineExceeded),
        };
        if matches!(result, Err(FallbackReason::DeadlineExceeded)) {
            warn!(file = %file_key.short(), "offload deadline exceeded");
        }
        // Unused if the executor never fetched; harmless otherwise.
        self.grants.revoke(&file_key);
        result
    }

    /// First candidate that accepts, or `None`.
    async fn solicit(
        &self,
        file_key: Key,
        plugin: &str,
        path: &Path,
        candidates: &[PeerContact],
    ) -> Option<PeerContact> {
        let file_uri = path.to_string_lossy().into_owned();
        for peer in candidates {
            self.grants.grant(file_key, PathBuf::from(&file_uri));
            let request = OffloadRequest {
                file_key,
                file_uri: file_uri.clone(),
                plugin: plugin.to_string(),
                requester: self.local.clone(),
            };
            match self.rpc.offload(peer, request).await {
                Ok(OffloadReply::Accept) => {
                    debug!(file = %file_key.short(), %peer, "offload accepted");
                    return Some(peer.clone());
                }
                Ok(OffloadReply::Reject { reason }) => {
                    debug!(file = %file_key.short(), %peer, %reason, "offload rejected");
                }
                Err(e) => {
                    debug!(file = %file_key.short(), %peer, error = %e, "offload call failed");
                }
            }
        }
        None
    }

    async fn poll_until_done(
        &self,
        file_key: Key,
        peer: &PeerContact,
        until: Instant,
    ) -> Result<Vec<f64>, FallbackReason> {
        loop {
            tokio::time::sleep_until((Instant::now() + self.config.poll_interval).min(until)).await;
            if Instant::now() >= until {
                return Err(FallbackReason::DeadlineExceeded);
            }

            let reply = match self.rpc.poll(peer, file_key).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(file = %file_key.short(), %peer, error = %e, "poll failed");
                    return Err(FallbackReason::PollError);
                }
            };
            if reply.failed {
                return Err(FallbackReason::RemoteFailed);
            }
            if reply.complete {
                return reply.vector.ok_or(FallbackReason::RemoteFailed);
            }
        }
    }

    async fn compute_locally(&self, plugin: &str, path: &Path) -> OffloadResult<Vec<f64>> {
        let implementation = self
            .plugins
            .get(plugin)
            .ok_or_else(|| OffloadError::UnknownPlugin(plugin.to_string()))?;
        let path = path.to_path_buf();
        self.workers
            .run(move || implementation.compute_vector(&path))
            .await?
            .map_err(|e| OffloadError::LocalCompute(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    use ad3_dht::LocalDht;
    use ad3_index::CacheConfig;

    use crate::error::OffloadError;
    use crate::rpc::{PollReply, RpcFuture};

    use ad3_transfer::TransferError;

    fn contact(port: u16) -> PeerContact {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        PeerContact::new(PeerContact::id_for_addr(addr), addr, addr)
    }

    #[derive(Clone)]
    enum Offload {
        Accept,
        Reject,
        Down,
    }

    #[derive(Clone)]
    enum Poll {
        Pending,
        Done(Vec<f64>),
        Failed,
        Down,
    }

    /// Scripted peers: a fixed offload answer per port and a queue of poll
    /// answers (the last one repeats).
    #[derive(Default)]
    struct ScriptedRpc {
        offload: Mutex<Vec<(u16, Offload)>>,
        polls: Mutex<VecDeque<Poll>>,
        offload_calls: Mutex<Vec<u16>>,
        poll_calls: Mutex<u32>,
        /// How long each `offload` call takes to answer.
        offload_delay: Duration,
    }

    impl ScriptedRpc {
        fn offered(&self) -> Vec<u16> {
            self.offload_calls.lock().unwrap().clone()
        }
    }

    fn down() -> OffloadError {
        OffloadError::Transport(TransferError::Timeout)
    }

    impl PeerRpc for ScriptedRpc {
        fn offload<'a>(
            &'a self,
            peer: &'a PeerContact,
            _request: OffloadRequest,
        ) -> RpcFuture<'a, OffloadReply> {
            let port = peer.rpc_addr.port();
            self.offload_calls.lock().unwrap().push(port);
            let answer = self
                .offload
                .lock()
                .unwrap()
                .iter()
                .find(|(p, _)| *p == port)
                .map(|(_, a)| a.clone())
                .unwrap_or(Offload::Down);
            let delay = self.offload_delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                match answer {
                    Offload::Accept => Ok(OffloadReply::Accept),
                    Offload::Reject => Ok(OffloadReply::Reject {
                        reason: "busy".into(),
                    }),
                    Offload::Down => Err(down()),
                }
            })
        }

        fn poll<'a>(&'a self, _peer: &'a PeerContact, _file_key: Key) -> RpcFuture<'a, PollReply> {
            *self.poll_calls.lock().unwrap() += 1;
            let answer = {
                let mut polls = self.polls.lock().unwrap();
                if polls.len() > 1 {
                    polls.pop_front()
                } else {
                    polls.front().cloned()
                }
            }
            .unwrap_or(Poll::Down);
            Box::pin(async move {
                match answer {
                    Poll::Pending => Ok(PollReply::pending()),
                    Poll::Done(v) => Ok(PollReply::done(v)),
                    Poll::Failed => Ok(PollReply::failed()),
                    Poll::Down => Err(down()),
                }
            })
        }

        fn ping<'a>(&'a self, _peer: &'a PeerContact) -> RpcFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    struct Fixture {
        requester: Requester,
        rpc: Arc<ScriptedRpc>,
        grants: Arc<GrantTable>,
        _dir: tempfile::TempDir,
        path: PathBuf,
    }

    fn fixture(peers: &[u16], rpc: ScriptedRpc) -> Fixture {
        fixture_with(peers, rpc, RequesterConfig::default())
    }

    fn fixture_with(peers: &[u16], rpc: ScriptedRpc, config: RequesterConfig) -> Fixture {
        let local = contact(5000);
        let dht = LocalDht::open_in_memory(local.clone()).unwrap();
        for &port in peers {
            dht.add_peer(contact(port));
        }
        let catalog = Arc::new(Catalog::new(Arc::new(dht), CacheConfig::default()));
        let rpc = Arc::new(rpc);
        let grants = Arc::new(GrantTable::new(Duration::from_secs(300)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, (0..=255u8).collect::<Vec<_>>()).unwrap();

        let requester = Requester::new(
            catalog,
            rpc.clone(),
            grants.clone(),
            local,
            PluginRegistry::with_builtins(),
            WorkerPool::new(1),
            config,
        );
        Fixture {
            requester,
            rpc,
            grants,
            _dir: dir,
            path,
        }
    }

    fn file_key() -> Key {
        AudioFile::new("a.wav", "alice").key()
    }

    #[tokio::test(start_paused = true)]
    async fn no_peers_falls_back_immediately() {
        let f = fixture(&[], ScriptedRpc::default());
        let outcome = f
            .requester
            .compute(file_key(), "byte_histogram", &f.path)
            .await
            .unwrap();
        assert_eq!(outcome.source, VectorSource::Local);
        assert_eq!(outcome.fallback, Some(FallbackReason::NoCandidates));
        assert_eq!(outcome.vector.len(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_peers_fall_back() {
        let f = fixture(&[5001, 5002, 5003], ScriptedRpc::default());
        let outcome = f
            .requester
            .compute(file_key(), "byte_histogram", &f.path)
            .await
            .unwrap();
        assert_eq!(outcome.fallback, Some(FallbackReason::AllRejected));
        assert_eq!(f.rpc.offered().len(), 3);
        assert!(f.grants.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_accepting_peer_wins() {
        let rpc = ScriptedRpc::default();
        *rpc.offload.lock().unwrap() = vec![(5001, Offload::Reject), (5002, Offload::Accept)];
        rpc.polls
            .lock()
            .unwrap()
            .extend([Poll::Pending, Poll::Done(vec![0.1, 0.9])]);
        let f = fixture(&[5001, 5002], rpc);

        let outcome = f
            .requester
            .compute(file_key(), "byte_histogram", &f.path)
            .await
            .unwrap();
        assert_eq!(outcome.vector, vec![0.1, 0.9]);
        assert_eq!(outcome.source, VectorSource::Remote(contact(5002)));
        assert_eq!(*f.rpc.poll_calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_falls_back() {
        let rpc = ScriptedRpc::default();
        *rpc.offload.lock().unwrap() = vec![(5001, Offload::Accept)];
        rpc.polls.lock().unwrap().push_back(Poll::Failed);
        let f = fixture(&[5001], rpc);
        let outcome = f
            .requester
            .compute(file_key(), "byte_histogram", &f.path)
            .await
            .unwrap();
        assert_eq!(outcome.fallback, Some(FallbackReason::RemoteFailed));
        assert_eq!(outcome.source, VectorSource::Local);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_transport_error_falls_back() {
        let rpc = ScriptedRpc::default();
        *rpc.offload.lock().unwrap() = vec![(5001, Offload::Accept)];
        rpc.polls.lock().unwrap().push_back(Poll::Down);
        let f = fixture(&[5001], rpc);
        let outcome = f
            .requester
            .compute(file_key(), "byte_histogram", &f.path)
            .await
            .unwrap();
        assert_eq!(outcome.fallback, Some(FallbackReason::PollError));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_polling() {
        let rpc = ScriptedRpc::default();
        *rpc.offload.lock().unwrap() = vec![(5001, Offload::Accept)];
        rpc.polls.lock().unwrap().push_back(Poll::Pending);
        let f = fixture(&[5001], rpc);

        let outcome = f
            .requester
            .compute(file_key(), "byte_histogram", &f.path)
            .await
            .unwrap();
        assert_eq!(outcome.fallback, Some(FallbackReason::DeadlineExceeded));
        // Polls at 10s..=290s; the one due at 300s is suppressed.
        assert_eq!(*f.rpc.poll_calls.lock().unwrap(), 29);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_candidates_cannot_outlast_the_deadline() {
        let rpc = ScriptedRpc {
            offload_delay: Duration::from_secs(5),
            ..ScriptedRpc::default()
        };
        let peers: Vec<u16> = (5001..=5008).collect();
        let f = fixture_with(
            &peers,
            rpc,
            RequesterConfig {
                deadline: Duration::from_secs(10),
                ..RequesterConfig::default()
            },
        );

        let started = Instant::now();
        let outcome = f
            .requester
            .compute(file_key(), "byte_histogram", &f.path)
            .await
            .unwrap();
        assert_eq!(outcome.fallback, Some(FallbackReason::DeadlineExceeded));
        assert_eq!(outcome.source, VectorSource::Local);
        assert!(started.elapsed() <= Duration::from_secs(11));
        // Only the candidates reached before the deadline were asked.
        assert!(f.rpc.offered().len() <= 3);
        assert!(f.grants.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_a_long_poll_interval_short() {
        let rpc = ScriptedRpc::default();
        *rpc.offload.lock().unwrap() = vec![(5001, Offload::Accept)];
        rpc.polls.lock().unwrap().push_back(Poll::Pending);
        let f = fixture_with(
            &[5001],
            rpc,
            RequesterConfig {
                poll_interval: Duration::from_secs(60),
                deadline: Duration::from_secs(90),
                ..RequesterConfig::default()
            },
        );

        let started = Instant::now();
        let outcome = f
            .requester
            .compute(file_key(), "byte_histogram", &f.path)
            .await
            .unwrap();
        assert_eq!(outcome.fallback, Some(FallbackReason::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(100));
        assert_eq!(*f.rpc.poll_calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_local_plugin_is_an_error() {
        let f = fixture(&[], ScriptedRpc::default());
        let err = f
            .requester
            .compute(file_key(), "mfcc", &f.path)
            .await
            .unwrap_err();
        assert!(matches!(err, OffloadError::UnknownPlugin(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn update_vector_persists_output_and_file() {
        let f = fixture(&[], ScriptedRpc::default());
        let plugin = Plugin::new("byte_histogram", "builtin:byte_histogram");
        let file = AudioFile::new("a.wav", "alice");

        let (outcome, output) = f
            .requester
            .update_vector(&plugin, &file, &f.path)
            .await
            .unwrap();
        assert_eq!(output.vector, outcome.vector);

        let catalog = &f.requester.catalog;
        let stored = catalog
            .plugin_output(file.key(), plugin.key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.vector, outcome.vector);
        let refreshed = catalog
            .audio_file(&ad3_index::AudioFileFilter::default().path("a.wav"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.vector, Some(outcome.vector));
    }
}
