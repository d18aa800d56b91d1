//! Multi-criterion aggregation over the tuple space.
//!
//! Key aggregation runs every criterion pattern concurrently and intersects
//! the keys of the matching tuples. Object aggregation then resolves those
//! keys to decoded entities, again concurrently. Both go through the
//! [`CacheLayer`] first.

use std::collections::BTreeSet;

use ad3_core::{Entity, IndexTuple, Key, TuplePattern};
use ad3_dht::Dht;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::cache::CacheLayer;
use crate::error::IndexResult;

/// Tuples matching one pattern, from the query cache or the DHT.
pub async fn query_cached(
    dht: &dyn Dht,
    cache: &CacheLayer,
    pattern: &TuplePattern,
) -> IndexResult<Vec<IndexTuple>> {
    if let Some(tuples) = cache.get_query(pattern) {
        return Ok(tuples);
    }
    let tuples = dht.query_tuples(pattern).await?;
    cache.put_query(pattern.clone(), tuples.clone());
    Ok(tuples)
}

/// Keys present in the results of every criterion, in key order.
///
/// No criteria, or any criterion with no matches, yields an empty result.
pub async fn aggregate_keys(
    dht: &dyn Dht,
    cache: &CacheLayer,
    criteria: &[TuplePattern],
) -> IndexResult<Vec<Key>> {
    if criteria.is_empty() {
        return Ok(Vec::new());
    }

    let results = join_all(criteria.iter().map(|p| query_cached(dht, cache, p))).await;

    let mut intersection: Option<BTreeSet<Key>> = None;
    for result in results {
        let keys: BTreeSet<Key> = result?.into_iter().map(|t| t.key).collect();
        intersection = Some(match intersection {
            None => keys,
            Some(acc) => acc.intersection(&keys).copied().collect(),
        });
    }

    let keys: Vec<Key> = intersection.unwrap_or_default().into_iter().collect();
    debug!(criteria = criteria.len(), keys = keys.len(), "keys aggregated");
    Ok(keys)
}

/// One entity by key, from the object cache or the DHT.
pub async fn fetch_object(
    dht: &dyn Dht,
    cache: &CacheLayer,
    key: Key,
) -> IndexResult<Option<Entity>> {
    if let Some(entity) = cache.get_object(&key) {
        return Ok(Some(entity));
    }
    let Some(row) = dht.find_value(key).await? else {
        return Ok(None);
    };
    let entity = Entity::from_row(&row)?;
    cache.put_object(key, entity.clone());
    Ok(Some(entity))
}

/// Resolve keys to entities. Keys with no stored row are skipped.
pub async fn aggregate_objects(
    dht: &dyn Dht,
    cache: &CacheLayer,
    keys: &[Key],
) -> IndexResult<Vec<Entity>> {
    let fetched = join_all(keys.iter().map(|&k| fetch_object(dht, cache, k))).await;

    let mut entities = Vec::with_capacity(keys.len());
    for (key, result) in keys.iter().zip(fetched) {
        match result? {
            Some(entity) => entities.push(entity),
            None => warn!(key = %key.short(), "indexed key has no value row"),
        }
    }
    Ok(entities)
}
