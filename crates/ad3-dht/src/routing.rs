//! Static routing view: known peers ordered by XOR distance.

use ad3_core::{Key, PeerContact};

/// Default bucket width returned by `find_node`.
pub const DEFAULT_K: usize = 20;

#[derive(Debug, Clone)]
pub struct RoutingTable {
    local: PeerContact,
    peers: Vec<PeerContact>,
    k: usize,
}

impl RoutingTable {
    pub fn new(local: PeerContact, k: usize) -> Self {
        Self {
            local,
            peers: Vec::new(),
            k: k.max(1),
        }
    }

    pub fn local(&self) -> &PeerContact {
        &self.local
    }

    /// Add or replace a peer. Returns `false` for our own id.
    pub fn insert(&mut self, peer: PeerContact) -> bool {
        if peer.id == self.local.id {
            return false;
        }
        match self.peers.iter_mut().find(|p| p.id == peer.id) {
            Some(existing) => *existing = peer,
            None => self.peers.push(peer),
        }
        true
    }

    pub fn remove(&mut self, id: &Key) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p.id != *id);
        self.peers.len() != before
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Up to `k` peers closest to `target`, nearest first. Never includes
    /// the local node.
    pub fn closest(&self, target: &Key) -> Vec<PeerContact> {
        let mut peers = self.peers.clone();
        peers.sort_by_key(|p| p.id.distance(target));
        peers.truncate(self.k);
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn contact(port: u16) -> PeerContact {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        PeerContact::new(
            PeerContact::id_for_addr(addr),
            addr,
            ([127, 0, 0, 1], port + 1000).into(),
        )
    }

    #[test]
    fn closest_orders_by_distance() {
        let mut table = RoutingTable::new(contact(1), DEFAULT_K);
        for port in 2..10 {
            table.insert(contact(port));
        }
        let target = Key::derive("tag", &[b"jazz"]);
        let found = table.closest(&target);
        assert_eq!(found.len(), 8);
        for pair in found.windows(2) {
            assert!(pair[0].id.distance(&target) <= pair[1].id.distance(&target));
        }
    }

    #[test]
    fn local_node_is_never_returned() {
        let local = contact(1);
        let mut table = RoutingTable::new(local.clone(), DEFAULT_K);
        assert!(!table.insert(local.clone()));
        table.insert(contact(2));
        assert!(table.closest(&local.id).iter().all(|p| p.id != local.id));
    }

    #[test]
    fn truncates_to_k() {
        let mut table = RoutingTable::new(contact(1), 3);
        for port in 2..10 {
            table.insert(contact(port));
        }
        assert_eq!(table.closest(&Key::from_bytes([0; 32])).len(), 3);
    }

    #[test]
    fn insert_replaces_same_id() {
        let mut table = RoutingTable::new(contact(1), DEFAULT_K);
        let mut peer = contact(2);
        table.insert(peer.clone());
        peer.transfer_addr = ([10, 0, 0, 1], 9000).into();
        table.insert(peer.clone());
        assert_eq!(table.len(), 1);
        assert_eq!(table.closest(&peer.id)[0].transfer_addr, peer.transfer_addr);
        assert!(table.remove(&peer.id));
        assert!(table.is_empty());
    }
}
