//! Catalogue behaviour against a real local store, with a DHT wrapper that
//! counts calls or injects failures.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ad3_core::{AudioFile, EntityKind, IndexTuple, Key, PeerContact, Tag, TuplePattern};
use ad3_dht::{Dht, DhtError, DhtFuture, LocalDht};
use ad3_index::{AudioFileFilter, CacheConfig, Catalog, IndexError};

/// Delegates to a `LocalDht`, counting reads and optionally failing writes.
struct CountingDht {
    inner: LocalDht,
    queries: AtomicUsize,
    finds: AtomicUsize,
    fail_writes: AtomicBool,
}

impl CountingDht {
    fn new() -> Arc<Self> {
        let addr: SocketAddr = ([127, 0, 0, 1], 4000).into();
        let inner = LocalDht::open_in_memory(PeerContact::new(
            PeerContact::id_for_addr(addr),
            addr,
            addr,
        ))
        .unwrap();
        Arc::new(Self {
            inner,
            queries: AtomicUsize::new(0),
            finds: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        })
    }

    fn reads(&self) -> usize {
        self.queries.load(Ordering::SeqCst) + self.finds.load(Ordering::SeqCst)
    }

    fn write_guard(&self) -> Result<(), DhtError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(DhtError::Unavailable("injected".into()))
        } else {
            Ok(())
        }
    }
}

impl Dht for CountingDht {
    fn node_id(&self) -> Key {
        self.inner.node_id()
    }

    fn store(&self, key: Key, row: Vec<u8>) -> DhtFuture<'_, ()> {
        Box::pin(async move {
            self.write_guard()?;
            self.inner.store(key, row).await
        })
    }

    fn find_value(&self, key: Key) -> DhtFuture<'_, Option<Vec<u8>>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find_value(key)
    }

    fn find_node(&self, key: Key) -> DhtFuture<'_, Vec<PeerContact>> {
        self.inner.find_node(key)
    }

    fn put_tuple(&self, tuple: IndexTuple) -> DhtFuture<'_, ()> {
        Box::pin(async move {
            self.write_guard()?;
            self.inner.put_tuple(tuple).await
        })
    }

    fn query_tuples<'a>(&'a self, pattern: &'a TuplePattern) -> DhtFuture<'a, Vec<IndexTuple>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_tuples(pattern)
    }

    fn remove_tuples<'a>(&'a self, pattern: &'a TuplePattern) -> DhtFuture<'a, u64> {
        self.inner.remove_tuples(pattern)
    }
}

async fn tagged_library(catalog: &Catalog) -> (Tag, Tag) {
    let jazz = catalog.save(&Tag::new("jazz")).await.unwrap();
    let rock = catalog.save(&Tag::new("rock")).await.unwrap();
    for path in ["a.wav", "b.wav"] {
        let file = catalog.save(&AudioFile::new(path, "alice")).await.unwrap();
        catalog.apply_tag(&file, &jazz).await.unwrap();
    }
    (jazz, rock)
}

#[tokio::test]
async fn saving_twice_yields_one_key() {
    let dht = CountingDht::new();
    let catalog = Catalog::new(dht.clone(), CacheConfig::default());

    let first = catalog.save(&AudioFile::new("a.wav", "")).await.unwrap();
    let second = catalog.save(&AudioFile::new("a.wav", "")).await.unwrap();
    assert_eq!(first.key, second.key);

    let all = dht
        .query_tuples(&TuplePattern::any(EntityKind::AudioFile))
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn and_query_requires_every_tag() {
    let dht = CountingDht::new();
    let catalog = Catalog::new(dht, CacheConfig::default());
    let (jazz, rock) = tagged_library(&catalog).await;

    let jazz_only = catalog
        .audio_files(&AudioFileFilter::default().tag(jazz.key()))
        .await
        .unwrap();
    assert_eq!(jazz_only.len(), 2);

    let criteria = [
        TuplePattern::relation(EntityKind::AudioFile, None, "tag", Some(jazz.key())),
        TuplePattern::relation(EntityKind::AudioFile, None, "tag", Some(rock.key())),
    ];
    assert!(catalog.get_entities(&criteria).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_criteria_return_nothing() {
    let dht = CountingDht::new();
    let catalog = Catalog::new(dht, CacheConfig::default());
    tagged_library(&catalog).await;
    assert!(catalog.get_entities(&[]).await.unwrap().is_empty());
    assert!(catalog.get_entity(&[]).await.unwrap().is_none());
}

#[tokio::test]
async fn cache_changes_call_volume_not_results() {
    let cached_dht = CountingDht::new();
    let uncached_dht = CountingDht::new();
    let cached = Catalog::new(cached_dht.clone(), CacheConfig::default());
    let uncached = Catalog::new(uncached_dht.clone(), CacheConfig::disabled());
    let (jazz, _) = tagged_library(&cached).await;
    tagged_library(&uncached).await;

    let filter = AudioFileFilter::default().tag(jazz.key());
    let mut cached_results = Vec::new();
    let mut uncached_results = Vec::new();
    for _ in 0..3 {
        cached_results.push(cached.audio_files(&filter).await.unwrap());
        uncached_results.push(uncached.audio_files(&filter).await.unwrap());
    }

    assert_eq!(cached_results, uncached_results);
    assert!(cached_dht.reads() < uncached_dht.reads());
}

#[tokio::test(start_paused = true)]
async fn query_cache_expires() {
    let dht = CountingDht::new();
    let catalog = Catalog::new(dht.clone(), CacheConfig::default());
    tagged_library(&catalog).await;

    let filter = AudioFileFilter::default();
    catalog.audio_files(&filter).await.unwrap();
    let after_first = dht.queries.load(Ordering::SeqCst);
    catalog.audio_files(&filter).await.unwrap();
    assert_eq!(dht.queries.load(Ordering::SeqCst), after_first);

    tokio::time::advance(Duration::from_secs(11)).await;
    catalog.audio_files(&filter).await.unwrap();
    assert!(dht.queries.load(Ordering::SeqCst) > after_first);
}

#[tokio::test]
async fn own_writes_are_visible_immediately() {
    let dht = CountingDht::new();
    let catalog = Catalog::new(dht, CacheConfig::default());
    assert!(catalog.tags(&Default::default()).await.unwrap().is_empty());
    catalog.save(&Tag::new("jazz")).await.unwrap();
    assert_eq!(catalog.tags(&Default::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn store_failure_is_propagated_and_retry_succeeds() {
    let dht = CountingDht::new();
    let catalog = Catalog::new(dht.clone(), CacheConfig::default());
    let tag = Tag::new("jazz");

    dht.fail_writes.store(true, Ordering::SeqCst);
    let err = catalog.save(&tag).await.unwrap_err();
    assert!(matches!(err, IndexError::Dht(DhtError::Unavailable(_))));
    assert!(tag.key.is_none());

    dht.fail_writes.store(false, Ordering::SeqCst);
    let saved = catalog.save(&tag).await.unwrap();
    assert_eq!(catalog.tag("jazz").await.unwrap(), Some(saved));
}
