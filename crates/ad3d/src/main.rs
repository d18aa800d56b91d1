//! ad3d — the ad3 node daemon.
//!
//! One binary per peer:
//! - redb-backed tuple space and catalogue
//! - transfer server for granted files
//! - peer RPC server and offload executor
//!
//! # Usage
//!
//! ```text
//! ad3d init --path ad3.toml --advertise-ip 192.168.1.20
//! ad3d serve --config ad3.toml
//! ad3d compute --config ad3.toml track.wav
//! ```

mod node;

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use ad3_core::{AudioFile, NodeConfig};
use ad3_index::{AudioFileFilter, PluginFilter};
use ad3_offload::VectorSource;
use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::node::Node;

#[derive(Parser)]
#[command(name = "ad3d", about = "ad3 audio cataloguing node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a node until Ctrl-C.
    Serve {
        #[arg(long, default_value = "ad3.toml")]
        config: PathBuf,
    },

    /// Compute and store a feature vector for one file, offloading to a
    /// peer when one is idle. Runs a transient node on the configured ports.
    Compute {
        #[arg(long, default_value = "ad3.toml")]
        config: PathBuf,

        /// Plugin to run.
        #[arg(long, default_value = "byte_histogram")]
        plugin: String,

        file: PathBuf,
    },

    /// Write a starter config.
    Init {
        #[arg(long, default_value = "ad3.toml")]
        path: PathBuf,

        #[arg(long, default_value = "4000")]
        rpc_port: u16,

        #[arg(long, default_value = "4001")]
        transfer_port: u16,

        /// IP other peers use to reach this node.
        #[arg(long)]
        advertise_ip: IpAddr,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ad3=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => serve(&config).await,
        Command::Compute {
            config,
            plugin,
            file,
        } => compute(&config, &plugin, &file).await,
        Command::Init {
            path,
            rpc_port,
            transfer_port,
            advertise_ip,
            force,
        } => init(&path, rpc_port, transfer_port, advertise_ip, force),
    }
}

fn load(path: &Path) -> anyhow::Result<NodeConfig> {
    NodeConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

async fn serve(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let node = Node::start(&config, shutdown_rx).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for Ctrl-C, shutting down");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    node.join().await;
    info!("ad3 node stopped");
    Ok(())
}

async fn compute(config_path: &Path, plugin_name: &str, file: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let file = file
        .canonicalize()
        .with_context(|| format!("resolving {}", file.display()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let node = Node::start(&config, shutdown_rx).await?;
    anyhow::ensure!(
        node.plugins.contains(plugin_name),
        "unknown plugin {plugin_name}"
    );

    let plugin = node
        .catalog
        .plugin(&PluginFilter::default().name(plugin_name))
        .await?
        .with_context(|| format!("plugin {plugin_name} not in catalogue"))?;

    let path = file.to_string_lossy().into_owned();
    let owner = config.node.owner.clone();
    let audio = match node
        .catalog
        .audio_file(&AudioFileFilter::default().path(path.as_str()).owner(owner.as_str()))
        .await?
    {
        Some(existing) => existing,
        None => node.catalog.save(&AudioFile::new(path, owner)).await?,
    };

    let result = node.requester.update_vector(&plugin, &audio, &file).await;
    let _ = shutdown_tx.send(true);
    node.join().await;
    let (outcome, output) = result?;

    let source = match &outcome.source {
        VectorSource::Remote(peer) => peer.to_string(),
        VectorSource::Local => "local".to_string(),
    };
    let report = serde_json::json!({
        "file": audio.key().to_hex(),
        "plugin_output": output.key().to_hex(),
        "source": source,
        "fallback": outcome.fallback.map(|r| r.to_string()),
        "vector": outcome.vector,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init(
    path: &Path,
    rpc_port: u16,
    transfer_port: u16,
    advertise_ip: IpAddr,
    force: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        force || !path.exists(),
        "{} already exists (use --force to overwrite)",
        path.display()
    );
    let config = NodeConfig::scaffold(rpc_port, transfer_port, advertise_ip);
    std::fs::write(path, config.to_toml_string()?)?;
    info!(path = %path.display(), "config written");
    Ok(())
}
