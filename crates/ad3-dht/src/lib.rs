//! ad3-dht — the DHT primitive as seen by the rest of the node.
//!
//! [`Dht`] is the boundary every higher layer talks to: value rows by key,
//! index tuples by partial-match pattern, and `find_node` for peers near a
//! key. [`LocalDht`] implements it on top of redb for a single node with a
//! static peer list.

pub mod error;
pub mod local;
pub mod routing;
pub mod tables;

use std::future::Future;
use std::pin::Pin;

use ad3_core::{IndexTuple, Key, PeerContact, TuplePattern};

pub use error::{DhtError, DhtResult};
pub use local::LocalDht;
pub use routing::RoutingTable;

/// Boxed future returned by every [`Dht`] operation.
pub type DhtFuture<'a, T> = Pin<Box<dyn Future<Output = DhtResult<T>> + Send + 'a>>;

/// Distributed key/value store plus tuple space.
///
/// Implementations are shared as `Arc<dyn Dht>`; every call is independent
/// and may run concurrently with others.
pub trait Dht: Send + Sync {
    /// Id of the local node in the key space.
    fn node_id(&self) -> Key;

    /// Write a value row, replacing any previous row at `key`.
    fn store(&self, key: Key, row: Vec<u8>) -> DhtFuture<'_, ()>;

    /// Read a value row. `None` when nothing is stored.
    fn find_value(&self, key: Key) -> DhtFuture<'_, Option<Vec<u8>>>;

    /// Peers closest to `key`, nearest first, never the local node.
    fn find_node(&self, key: Key) -> DhtFuture<'_, Vec<PeerContact>>;

    /// Add a tuple. Adding an existing tuple is a no-op.
    fn put_tuple(&self, tuple: IndexTuple) -> DhtFuture<'_, ()>;

    /// Every tuple matching `pattern`.
    fn query_tuples<'a>(&'a self, pattern: &'a TuplePattern) -> DhtFuture<'a, Vec<IndexTuple>>;

    /// Remove every tuple matching `pattern`. Returns how many were removed.
    fn remove_tuples<'a>(&'a self, pattern: &'a TuplePattern) -> DhtFuture<'a, u64>;
}
