//! Catalog — entity persistence and queries over a shared [`Dht`].

use std::sync::Arc;

use ad3_core::entity::{relation, tag_link_tuples};
use ad3_core::{
    AudioFile, Entity, EntityKind, EntityVariant, Key, Plugin, PluginOutput, Tag, TuplePattern,
};
use ad3_dht::Dht;
use tracing::{debug, info};

use crate::aggregate::{aggregate_keys, aggregate_objects, fetch_object};
use crate::cache::{CacheConfig, CacheLayer};
use crate::error::IndexResult;
use crate::query::{plugin_output_criteria, AudioFileFilter, PluginFilter, TagFilter};

pub struct Catalog {
    dht: Arc<dyn Dht>,
    cache: CacheLayer,
}

impl Catalog {
    pub fn new(dht: Arc<dyn Dht>, config: CacheConfig) -> Self {
        Self {
            dht,
            cache: CacheLayer::new(config),
        }
    }

    pub fn dht(&self) -> &Arc<dyn Dht> {
        &self.dht
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Persist an entity and return a copy carrying its key.
    ///
    /// Index tuples are written only on first save (no stored key); the
    /// value row is written every time. `value` itself is left untouched so
    /// a failed save can be retried as-is.
    pub async fn save<T: EntityVariant>(&self, value: &T) -> IndexResult<T> {
        let mut entity: Entity = value.clone().into();
        let first_save = entity.assign_key();
        let key = entity.key();

        if first_save {
            for tuple in entity.index_tuples() {
                self.dht.put_tuple(tuple).await?;
            }
            self.cache.invalidate_queries();
        }

        self.dht.store(key, entity.to_row()?).await?;
        self.cache.put_object(key, entity.clone());
        debug!(kind = %entity.kind(), key = %key.short(), first_save, "entity saved");

        Ok(T::from_entity(entity).unwrap_or_else(|| value.clone()))
    }

    // ── Generic queries ────────────────────────────────────────────

    /// Every entity whose key satisfies all `criteria`, in key order.
    pub async fn get_entities(&self, criteria: &[TuplePattern]) -> IndexResult<Vec<Entity>> {
        let keys = aggregate_keys(self.dht.as_ref(), &self.cache, criteria).await?;
        aggregate_objects(self.dht.as_ref(), &self.cache, &keys).await
    }

    /// First entity satisfying all `criteria`.
    pub async fn get_entity(&self, criteria: &[TuplePattern]) -> IndexResult<Option<Entity>> {
        Ok(self.get_entities(criteria).await?.into_iter().next())
    }

    pub async fn get_by_key(&self, key: Key) -> IndexResult<Option<Entity>> {
        fetch_object(self.dht.as_ref(), &self.cache, key).await
    }

    async fn get_typed<T: EntityVariant>(&self, criteria: &[TuplePattern]) -> IndexResult<Vec<T>> {
        let entities = self.get_entities(criteria).await?;
        Ok(entities.into_iter().filter_map(T::from_entity).collect())
    }

    // ── Typed queries ──────────────────────────────────────────────

    pub async fn tags(&self, filter: &TagFilter) -> IndexResult<Vec<Tag>> {
        self.get_typed(&filter.criteria()).await
    }

    pub async fn tag(&self, name: &str) -> IndexResult<Option<Tag>> {
        let tags = self.tags(&TagFilter::default().name(name)).await?;
        Ok(tags.into_iter().next())
    }

    pub async fn audio_files(&self, filter: &AudioFileFilter) -> IndexResult<Vec<AudioFile>> {
        self.get_typed(&filter.criteria()).await
    }

    pub async fn audio_file(&self, filter: &AudioFileFilter) -> IndexResult<Option<AudioFile>> {
        Ok(self.audio_files(filter).await?.into_iter().next())
    }

    pub async fn plugins(&self, filter: &PluginFilter) -> IndexResult<Vec<Plugin>> {
        self.get_typed(&filter.criteria()).await
    }

    pub async fn plugin(&self, filter: &PluginFilter) -> IndexResult<Option<Plugin>> {
        Ok(self.plugins(filter).await?.into_iter().next())
    }

    pub async fn plugin_outputs(
        &self,
        file: Option<Key>,
        plugin: Option<Key>,
    ) -> IndexResult<Vec<PluginOutput>> {
        self.get_typed(&plugin_output_criteria(file, plugin)).await
    }

    pub async fn plugin_output(&self, file: Key, plugin: Key) -> IndexResult<Option<PluginOutput>> {
        Ok(self
            .plugin_outputs(Some(file), Some(plugin))
            .await?
            .into_iter()
            .next())
    }

    // ── Relationships ──────────────────────────────────────────────

    /// Record that a user applied `tag` to `file`.
    pub async fn apply_tag(&self, file: &AudioFile, tag: &Tag) -> IndexResult<()> {
        self.link(file.key(), tag.key(), false).await
    }

    /// Record a classifier's guess that `tag` fits `file`.
    pub async fn guess_tag(&self, file: &AudioFile, tag: &Tag) -> IndexResult<()> {
        self.link(file.key(), tag.key(), true).await
    }

    async fn link(&self, file: Key, tag: Key, guessed: bool) -> IndexResult<()> {
        for tuple in tag_link_tuples(tag, file, guessed) {
            self.dht.put_tuple(tuple).await?;
        }
        self.cache.invalidate_queries();
        debug!(file = %file.short(), tag = %tag.short(), guessed, "tag linked");
        Ok(())
    }

    /// Drop every guessed-tag link, from both sides. Returns the number of
    /// tuples removed.
    pub async fn remove_guessed_tags(&self) -> IndexResult<u64> {
        let from_tags =
            TuplePattern::relation(EntityKind::Tag, None, relation::GUESSED_FILE, None);
        let from_files =
            TuplePattern::relation(EntityKind::AudioFile, None, relation::GUESSED_TAG, None);
        let removed = self.dht.remove_tuples(&from_tags).await?
            + self.dht.remove_tuples(&from_files).await?;
        self.cache.invalidate_queries();
        info!(removed, "guessed tags removed");
        Ok(removed)
    }
}
