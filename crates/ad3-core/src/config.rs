//! Node configuration (`ad3.toml`).
//!
//! Every section is optional and falls back to the protocol defaults.
//! Durations are written as strings: `"10s"`, `"5m"`, `"500ms"`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::peer::PeerContact;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub offload: OffloadSection,
    #[serde(default)]
    pub transfer: TransferSection,
    #[serde(default)]
    pub workers: WorkersSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Hex node id. Derived from `rpc_addr` when absent.
    pub id: Option<String>,
    pub rpc_addr: SocketAddr,
    pub transfer_addr: SocketAddr,
    /// IP peers use to reach this node. Defaults to the bind IP, which then
    /// must not be unspecified (`0.0.0.0`, `::`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_ip: Option<IpAddr>,
    /// Directory for the redb store. In-memory when absent.
    pub data_dir: Option<PathBuf>,
    /// Owner name recorded on audio files added by this node.
    #[serde(default)]
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: Option<String>,
    pub rpc_addr: SocketAddr,
    pub transfer_addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_object_ttl")]
    pub object_ttl: String,
    #[serde(default = "default_query_ttl")]
    pub query_ttl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    #[serde(default = "default_deadline")]
    pub deadline: String,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: String,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_delivered_retention")]
    pub delivered_retention: String,
    #[serde(default = "default_result_retention")]
    pub result_retention: String,
    /// Executor bound on download plus computation of one offload.
    #[serde(default = "default_compute_deadline")]
    pub compute_deadline: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_grant_ttl")]
    pub grant_ttl: String,
    /// Where executors place downloaded files. System temp dir when absent.
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersSection {
    #[serde(default = "default_worker_threads")]
    pub threads: usize,
}

fn default_object_ttl() -> String {
    "300s".to_string()
}
fn default_query_ttl() -> String {
    "10s".to_string()
}
fn default_true() -> bool {
    true
}
fn default_poll_interval() -> String {
    "10s".to_string()
}
fn default_deadline() -> String {
    "300s".to_string()
}
fn default_rpc_timeout() -> String {
    "5s".to_string()
}
fn default_max_candidates() -> usize {
    8
}
fn default_delivered_retention() -> String {
    "30s".to_string()
}
fn default_result_retention() -> String {
    "300s".to_string()
}
fn default_compute_deadline() -> String {
    "300s".to_string()
}
fn default_chunk_size() -> usize {
    64 * 1024
}
fn default_grant_ttl() -> String {
    "300s".to_string()
}
fn default_worker_threads() -> usize {
    2
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            object_ttl: default_object_ttl(),
            query_ttl: default_query_ttl(),
        }
    }
}

impl Default for OffloadSection {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: default_poll_interval(),
            deadline: default_deadline(),
            rpc_timeout: default_rpc_timeout(),
            max_candidates: default_max_candidates(),
            delivered_retention: default_delivered_retention(),
            result_retention: default_result_retention(),
            compute_deadline: default_compute_deadline(),
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            grant_ttl: default_grant_ttl(),
            download_dir: None,
        }
    }
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            threads: default_worker_threads(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Minimal config for a node listening on all interfaces at the given
    /// ports and advertising `advertise_ip` to peers.
    pub fn scaffold(rpc_port: u16, transfer_port: u16, advertise_ip: IpAddr) -> Self {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        NodeConfig {
            node: NodeSection {
                id: None,
                rpc_addr: SocketAddr::new(any, rpc_port),
                transfer_addr: SocketAddr::new(any, transfer_port),
                advertise_ip: Some(advertise_ip),
                data_dir: Some(PathBuf::from("./ad3-data")),
                owner: String::new(),
            },
            peers: Vec::new(),
            cache: CacheSection::default(),
            offload: OffloadSection::default(),
            transfer: TransferSection::default(),
            workers: WorkersSection::default(),
        }
    }

    /// Check every duration and id parses and that numeric limits are sane.
    pub fn validate(&self) -> CoreResult<()> {
        for (name, value) in [
            ("cache.object_ttl", &self.cache.object_ttl),
            ("cache.query_ttl", &self.cache.query_ttl),
            ("offload.poll_interval", &self.offload.poll_interval),
            ("offload.deadline", &self.offload.deadline),
            ("offload.rpc_timeout", &self.offload.rpc_timeout),
            ("offload.delivered_retention", &self.offload.delivered_retention),
            ("offload.result_retention", &self.offload.result_retention),
            ("offload.compute_deadline", &self.offload.compute_deadline),
            ("transfer.grant_ttl", &self.transfer.grant_ttl),
        ] {
            require_duration(name, value)?;
        }
        if self.transfer.chunk_size == 0 {
            return Err(CoreError::Config("transfer.chunk_size must be > 0".into()));
        }
        if self.workers.threads == 0 {
            return Err(CoreError::Config("workers.threads must be > 0".into()));
        }
        self.self_contact()?;
        self.peer_contacts()?;
        Ok(())
    }

    /// This node's contact as advertised to peers, on the configured ports.
    pub fn self_contact(&self) -> CoreResult<PeerContact> {
        self.advertised_contact(self.node.rpc_addr.port(), self.node.transfer_addr.port())
    }

    /// This node's contact on the ports the listeners actually bound.
    ///
    /// The id, when not configured, is derived from the advertised RPC
    /// address, the same address peers list under `[[peers]]`.
    pub fn advertised_contact(&self, rpc_port: u16, transfer_port: u16) -> CoreResult<PeerContact> {
        let rpc_ip = self.node.advertise_ip.unwrap_or(self.node.rpc_addr.ip());
        let transfer_ip = self.node.advertise_ip.unwrap_or(self.node.transfer_addr.ip());
        if rpc_ip.is_unspecified() || transfer_ip.is_unspecified() {
            return Err(CoreError::Config(
                "node.advertise_ip is required when binding an unspecified address".into(),
            ));
        }
        let rpc_addr = SocketAddr::new(rpc_ip, rpc_port);
        let id = resolve_id(self.node.id.as_deref(), rpc_addr)?;
        Ok(PeerContact::new(
            id,
            rpc_addr,
            SocketAddr::new(transfer_ip, transfer_port),
        ))
    }

    pub fn peer_contacts(&self) -> CoreResult<Vec<PeerContact>> {
        self.peers
            .iter()
            .map(|p| {
                let id = resolve_id(p.id.as_deref(), p.rpc_addr)?;
                Ok(PeerContact::new(id, p.rpc_addr, p.transfer_addr))
            })
            .collect()
    }
}

fn resolve_id(id: Option<&str>, rpc_addr: SocketAddr) -> CoreResult<Key> {
    match id {
        Some(hex) => hex.parse(),
        None => Ok(PeerContact::id_for_addr(rpc_addr)),
    }
}

fn require_duration(name: &str, value: &str) -> CoreResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| CoreError::Config(format!("{name}: invalid duration {value:?}")))
}

/// Parse `"500ms"`, `"10s"`, `"5m"` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse a duration that [`NodeConfig::validate`] already accepted.
pub fn duration_or(s: &str, fallback: Duration) -> Duration {
    parse_duration(s).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lan() -> IpAddr {
        "10.0.0.1".parse().unwrap()
    }

    #[test]
    fn scaffold_roundtrips_through_toml() {
        let config = NodeConfig::scaffold(4000, 4001, lan());
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("rpc_addr"));
        let back: NodeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.node.rpc_addr.port(), 4000);
        back.validate().unwrap();
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let toml_str = r#"
[node]
rpc_addr = "127.0.0.1:4000"
transfer_addr = "127.0.0.1:4001"
"#;
        let config: NodeConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cache.query_ttl, "10s");
        assert_eq!(config.offload.deadline, "300s");
        assert_eq!(config.offload.max_candidates, 8);
        assert_eq!(config.transfer.chunk_size, 64 * 1024);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn peers_get_derived_ids() {
        let toml_str = r#"
[node]
rpc_addr = "127.0.0.1:4000"
transfer_addr = "127.0.0.1:4001"

[[peers]]
rpc_addr = "10.0.0.2:4000"
transfer_addr = "10.0.0.2:4001"
"#;
        let config: NodeConfig = toml::from_str(toml_str).unwrap();
        let peers = config.peer_contacts().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, PeerContact::id_for_addr(peers[0].rpc_addr));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let mut config = NodeConfig::scaffold(4000, 4001, lan());
        config.offload.deadline = "soon".to_string();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn bad_node_id_is_rejected() {
        let mut config = NodeConfig::scaffold(4000, 4001, lan());
        config.node.id = Some("not-hex".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("x"), None);
    }

    #[test]
    fn scaffold_advertises_a_reachable_address() {
        let config = NodeConfig::scaffold(4000, 4001, lan());
        assert!(config.node.rpc_addr.ip().is_unspecified());

        let me = config.self_contact().unwrap();
        assert_eq!(me.rpc_addr, "10.0.0.1:4000".parse().unwrap());
        assert_eq!(me.transfer_addr, "10.0.0.1:4001".parse().unwrap());
        // A peer listing this node under [[peers]] derives the same id.
        assert_eq!(me.id, PeerContact::id_for_addr(me.rpc_addr));
    }

    #[test]
    fn unspecified_bind_without_advertise_ip_is_rejected() {
        let mut config = NodeConfig::scaffold(4000, 4001, lan());
        config.node.advertise_ip = None;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
        assert!(config.advertised_contact(5000, 5001).is_err());
    }

    #[test]
    fn advertised_contact_uses_bound_ports() {
        let config = NodeConfig::scaffold(0, 0, lan());
        let me = config.advertised_contact(41000, 41001).unwrap();
        assert_eq!(me.rpc_addr.port(), 41000);
        assert_eq!(me.transfer_addr.port(), 41001);
        assert_eq!(me.id, PeerContact::id_for_addr("10.0.0.1:41000".parse().unwrap()));
    }
}
