//! Peer contact information.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::key::Key;

/// How to reach a peer: its node id plus the RPC and transfer endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerContact {
    pub id: Key,
    pub rpc_addr: SocketAddr,
    pub transfer_addr: SocketAddr,
}

impl PeerContact {
    pub fn new(id: Key, rpc_addr: SocketAddr, transfer_addr: SocketAddr) -> Self {
        Self {
            id,
            rpc_addr,
            transfer_addr,
        }
    }

    /// Node id derived from the RPC address, used when none is configured.
    pub fn id_for_addr(rpc_addr: SocketAddr) -> Key {
        Key::derive("node", &[rpc_addr.to_string().as_bytes()])
    }
}

impl fmt::Display for PeerContact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id.short(), self.rpc_addr)
    }
}
