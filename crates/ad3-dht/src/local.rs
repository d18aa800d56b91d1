//! LocalDht — redb-backed single-node tuple space.
//!
//! Holds every value row and index tuple this node knows about, and answers
//! `find_node` from a static routing view seeded with the configured peers.
//! Routing and replication across the overlay live behind the [`Dht`] trait
//! and are not performed here.

use std::path::Path;
use std::sync::{Arc, RwLock};

use ad3_core::{IndexTuple, Key, PeerContact, TuplePattern};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{DhtError, DhtResult};
use crate::routing::{RoutingTable, DEFAULT_K};
use crate::tables::{tuple_range, tuple_row_key, TUPLES, VALUES};
use crate::{Dht, DhtFuture};

/// Convert any `Display` error into a `DhtError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| DhtError::$variant(e.to_string())
    };
}

#[derive(Clone)]
pub struct LocalDht {
    db: Arc<Database>,
    routing: Arc<RwLock<RoutingTable>>,
}

impl LocalDht {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path, local: PeerContact) -> DhtResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let dht = Self::with_db(db, local)?;
        debug!(?path, "local dht opened");
        Ok(dht)
    }

    /// Ephemeral in-memory store.
    pub fn open_in_memory(local: PeerContact) -> DhtResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let dht = Self::with_db(db, local)?;
        debug!("in-memory local dht opened");
        Ok(dht)
    }

    fn with_db(db: Database, local: PeerContact) -> DhtResult<Self> {
        let dht = Self {
            db: Arc::new(db),
            routing: Arc::new(RwLock::new(RoutingTable::new(local, DEFAULT_K))),
        };
        dht.ensure_tables()?;
        Ok(dht)
    }

    fn ensure_tables(&self) -> DhtResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(VALUES).map_err(map_err!(Table))?;
        txn.open_table(TUPLES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Register a peer in the routing view.
    pub fn add_peer(&self, peer: PeerContact) {
        let mut routing = self.routing.write().unwrap_or_else(|e| e.into_inner());
        if routing.insert(peer.clone()) {
            debug!(%peer, "peer added");
        }
    }

    pub fn remove_peer(&self, id: &Key) -> bool {
        let mut routing = self.routing.write().unwrap_or_else(|e| e.into_inner());
        routing.remove(id)
    }

    pub fn local_contact(&self) -> PeerContact {
        let routing = self.routing.read().unwrap_or_else(|e| e.into_inner());
        routing.local().clone()
    }

    // ── Value rows ─────────────────────────────────────────────────

    fn store_sync(&self, key: &Key, row: &[u8]) -> DhtResult<()> {
        let hex = key.to_hex();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VALUES).map_err(map_err!(Table))?;
            table
                .insert(hex.as_str(), row)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %key.short(), bytes = row.len(), "value stored");
        Ok(())
    }

    fn find_value_sync(&self, key: &Key) -> DhtResult<Option<Vec<u8>>> {
        let hex = key.to_hex();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VALUES).map_err(map_err!(Table))?;
        let row = table
            .get(hex.as_str())
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(row)
    }

    // ── Tuples ─────────────────────────────────────────────────────

    fn put_tuple_sync(&self, tuple: &IndexTuple) -> DhtResult<()> {
        let json = serde_json::to_string(tuple).map_err(map_err!(Serialize))?;
        let row_key = tuple_row_key(tuple, &json);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TUPLES).map_err(map_err!(Table))?;
            let empty: &[u8] = &[];
            table
                .insert(row_key.as_str(), empty)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%tuple, "tuple stored");
        Ok(())
    }

    fn query_tuples_sync(&self, pattern: &TuplePattern) -> DhtResult<Vec<IndexTuple>> {
        let (start, end) = tuple_range(pattern.kind, pattern.key.as_ref());
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TUPLES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (row_key, _) = entry.map_err(map_err!(Read))?;
            let tuple = decode_row_key(row_key.value())?;
            if pattern.matches(&tuple) {
                results.push(tuple);
            }
        }
        debug!(%pattern, matches = results.len(), "tuple query");
        Ok(results)
    }

    fn remove_tuples_sync(&self, pattern: &TuplePattern) -> DhtResult<u64> {
        let (start, end) = tuple_range(pattern.kind, pattern.key.as_ref());
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(TUPLES).map_err(map_err!(Table))?;
            let mut doomed = Vec::new();
            for entry in table
                .range(start.as_str()..end.as_str())
                .map_err(map_err!(Read))?
            {
                let (row_key, _) = entry.map_err(map_err!(Read))?;
                let row_key = row_key.value().to_string();
                if pattern.matches(&decode_row_key(&row_key)?) {
                    doomed.push(row_key);
                }
            }
            for row_key in &doomed {
                table.remove(row_key.as_str()).map_err(map_err!(Write))?;
            }
            removed = doomed.len() as u64;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%pattern, removed, "tuples removed");
        Ok(removed)
    }
}

/// Recover the tuple from `{kind}/{key_hex}/{json}`.
fn decode_row_key(row_key: &str) -> DhtResult<IndexTuple> {
    let json = row_key
        .splitn(3, '/')
        .nth(2)
        .ok_or_else(|| DhtError::Deserialize(format!("malformed tuple row {row_key:?}")))?;
    serde_json::from_str(json).map_err(map_err!(Deserialize))
}

impl LocalDht {
    /// Run a store operation on the blocking pool. Commits may hit disk.
    fn blocking<T, F>(&self, op: F) -> DhtFuture<'static, T>
    where
        F: FnOnce(&LocalDht) -> DhtResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let dht = self.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || op(&dht))
                .await
                .map_err(|e| DhtError::Unavailable(format!("store task: {e}")))?
        })
    }
}

impl Dht for LocalDht {
    fn node_id(&self) -> Key {
        self.local_contact().id
    }

    fn store(&self, key: Key, row: Vec<u8>) -> DhtFuture<'_, ()> {
        self.blocking(move |dht| dht.store_sync(&key, &row))
    }

    fn find_value(&self, key: Key) -> DhtFuture<'_, Option<Vec<u8>>> {
        self.blocking(move |dht| dht.find_value_sync(&key))
    }

    fn find_node(&self, key: Key) -> DhtFuture<'_, Vec<PeerContact>> {
        Box::pin(async move {
            let routing = self.routing.read().unwrap_or_else(|e| e.into_inner());
            Ok(routing.closest(&key))
        })
    }

    fn put_tuple(&self, tuple: IndexTuple) -> DhtFuture<'_, ()> {
        self.blocking(move |dht| dht.put_tuple_sync(&tuple))
    }

    fn query_tuples<'a>(&'a self, pattern: &'a TuplePattern) -> DhtFuture<'a, Vec<IndexTuple>> {
        let pattern = pattern.clone();
        self.blocking(move |dht| dht.query_tuples_sync(&pattern))
    }

    fn remove_tuples<'a>(&'a self, pattern: &'a TuplePattern) -> DhtFuture<'a, u64> {
        let pattern = pattern.clone();
        self.blocking(move |dht| dht.remove_tuples_sync(&pattern))
    }
}
