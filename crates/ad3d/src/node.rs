//! Assembly of one ad3 node from its config.

use std::sync::Arc;
use std::time::Duration;

use ad3_core::config::duration_or;
use ad3_core::{NodeConfig, PeerContact};
use ad3_dht::LocalDht;
use ad3_index::{CacheConfig, Catalog};
use ad3_offload::{
    Executor, ExecutorConfig, PluginRegistry, Requester, RequesterConfig, RpcServer, TcpRpcClient,
    WorkerPool,
};
use ad3_transfer::{TransferClient, TransferServer, TransferServerConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running node: servers spawned, catalogue and requester ready.
pub struct Node {
    pub contact: PeerContact,
    pub catalog: Arc<Catalog>,
    pub requester: Requester,
    pub plugins: PluginRegistry,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Open the store, bind both listeners and start serving until
    /// `shutdown` flips.
    pub async fn start(config: &NodeConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<Self> {
        let rpc_timeout = duration_or(&config.offload.rpc_timeout, Duration::from_secs(5));

        // Listeners first so port 0 resolves before the contact is built.
        let transfer = TransferServer::bind(
            config.node.transfer_addr,
            TransferServerConfig {
                chunk_size: config.transfer.chunk_size,
                grant_ttl: duration_or(&config.transfer.grant_ttl, Duration::from_secs(300)),
                request_timeout: rpc_timeout,
            },
        )
        .await?;
        let rpc = RpcServer::bind(config.node.rpc_addr, rpc_timeout).await?;
        let contact = config.advertised_contact(
            rpc.local_addr()?.port(),
            transfer.local_addr()?.port(),
        )?;

        let dht = match &config.node.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join("ad3.redb");
                let dht = LocalDht::open(&path, contact.clone())?;
                info!(path = ?path, "store opened");
                dht
            }
            None => {
                info!("using in-memory store");
                LocalDht::open_in_memory(contact.clone())?
            }
        };
        for peer in config.peer_contacts()? {
            info!(%peer, "static peer");
            dht.add_peer(peer);
        }

        let catalog = Arc::new(Catalog::new(
            Arc::new(dht),
            CacheConfig {
                object_ttl: duration_or(&config.cache.object_ttl, Duration::from_secs(300)),
                query_ttl: duration_or(&config.cache.query_ttl, Duration::from_secs(10)),
            },
        ));

        let plugins = PluginRegistry::with_builtins();
        for plugin in plugins.entities() {
            catalog.save(&plugin).await?;
        }

        let workers = WorkerPool::new(config.workers.threads);
        let executor = Arc::new(Executor::new(
            plugins.clone(),
            workers.clone(),
            TransferClient::new(rpc_timeout),
            ExecutorConfig {
                delivered_retention: duration_or(
                    &config.offload.delivered_retention,
                    Duration::from_secs(30),
                ),
                result_retention: duration_or(
                    &config.offload.result_retention,
                    Duration::from_secs(300),
                ),
                compute_deadline: duration_or(
                    &config.offload.compute_deadline,
                    Duration::from_secs(300),
                ),
                download_dir: config
                    .transfer
                    .download_dir
                    .clone()
                    .unwrap_or_else(std::env::temp_dir),
            },
        ));

        let requester = Requester::new(
            catalog.clone(),
            Arc::new(TcpRpcClient::new(rpc_timeout)),
            transfer.grants(),
            contact.clone(),
            plugins.clone(),
            workers,
            RequesterConfig {
                enabled: config.offload.enabled,
                poll_interval: duration_or(&config.offload.poll_interval, Duration::from_secs(10)),
                deadline: duration_or(&config.offload.deadline, Duration::from_secs(300)),
                max_candidates: config.offload.max_candidates,
            },
        );

        let transfer_shutdown = shutdown.clone();
        let transfer_task = tokio::spawn(async move {
            if let Err(e) = transfer.serve(transfer_shutdown).await {
                warn!(error = %e, "transfer server stopped");
            }
        });
        let rpc_task = tokio::spawn(async move {
            if let Err(e) = rpc.serve(executor, shutdown).await {
                warn!(error = %e, "rpc server stopped");
            }
        });

        info!(node = %contact, plugins = ?plugins.names().collect::<Vec<_>>(), "node started");
        Ok(Self {
            contact,
            catalog,
            requester,
            plugins,
            tasks: vec![transfer_task, rpc_task],
        })
    }

    /// Wait for the servers to finish after shutdown was signalled.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
