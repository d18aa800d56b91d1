//! Catalogue entities and their storage representation.
//!
//! Each entity serializes to exactly one value row (a JSON object tagged by
//! `type`) stored at its key, plus the index tuples that make it reachable
//! by partial match. Keys are derived from the identity fields only, so
//! re-saving the same logical entity with new attributes overwrites its row.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::tuple::{EntityKind, Field, IndexTuple};

/// Relation labels used in cross-reference tuples.
pub mod relation {
    pub const AUDIO_FILE: &str = "audio_file";
    pub const TAG: &str = "tag";
    pub const GUESSED_FILE: &str = "guessed_file";
    pub const GUESSED_TAG: &str = "guessed_tag";
    pub const PLUGIN_OUTPUT: &str = "plugin_output";
}

/// A feature-extraction plugin registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    /// Reference to the implementation that computes vectors.
    pub module_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
}

impl Plugin {
    pub fn new(name: impl Into<String>, module_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_ref: module_ref.into(),
            key: None,
        }
    }

    pub fn derive_key(&self) -> Key {
        Key::derive(
            EntityKind::Plugin.as_str(),
            &[self.name.as_bytes(), self.module_ref.as_bytes()],
        )
    }

    pub fn key(&self) -> Key {
        self.key.unwrap_or_else(|| self.derive_key())
    }
}

/// An audio file known to some peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFile {
    pub path: String,
    pub owner: String,
    #[serde(default)]
    pub vector: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
}

impl AudioFile {
    pub fn new(path: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            owner: owner.into(),
            vector: None,
            key: None,
        }
    }

    pub fn derive_key(&self) -> Key {
        Key::derive(
            EntityKind::AudioFile.as_str(),
            &[self.path.as_bytes(), self.owner.as_bytes()],
        )
    }

    pub fn key(&self) -> Key {
        self.key.unwrap_or_else(|| self.derive_key())
    }
}

/// A user-visible label for audio files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub vector: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vector: None,
            key: None,
        }
    }

    pub fn derive_key(&self) -> Key {
        Key::derive(EntityKind::Tag.as_str(), &[self.name.as_bytes()])
    }

    pub fn key(&self) -> Key {
        self.key.unwrap_or_else(|| self.derive_key())
    }
}

/// The vector a plugin produced for a file. One per plugin/file pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOutput {
    pub vector: Vec<f64>,
    pub plugin_key: Key,
    pub file_key: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
}

impl PluginOutput {
    pub fn new(vector: Vec<f64>, plugin_key: Key, file_key: Key) -> Self {
        Self {
            vector,
            plugin_key,
            file_key,
            key: None,
        }
    }

    pub fn derive_key(&self) -> Key {
        Key::derive(
            EntityKind::PluginOutput.as_str(),
            &[self.plugin_key.as_bytes(), self.file_key.as_bytes()],
        )
    }

    pub fn key(&self) -> Key {
        self.key.unwrap_or_else(|| self.derive_key())
    }
}

/// Closed set of catalogue entities.
///
/// The serde representation is the value row: `{"type": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Plugin(Plugin),
    AudioFile(AudioFile),
    Tag(Tag),
    PluginOutput(PluginOutput),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Plugin(_) => EntityKind::Plugin,
            Entity::AudioFile(_) => EntityKind::AudioFile,
            Entity::Tag(_) => EntityKind::Tag,
            Entity::PluginOutput(_) => EntityKind::PluginOutput,
        }
    }

    /// Key derived purely from the identity fields.
    pub fn derive_key(&self) -> Key {
        match self {
            Entity::Plugin(p) => p.derive_key(),
            Entity::AudioFile(f) => f.derive_key(),
            Entity::Tag(t) => t.derive_key(),
            Entity::PluginOutput(o) => o.derive_key(),
        }
    }

    /// The key this entity was saved under, if any.
    pub fn stored_key(&self) -> Option<Key> {
        match self {
            Entity::Plugin(p) => p.key,
            Entity::AudioFile(f) => f.key,
            Entity::Tag(t) => t.key,
            Entity::PluginOutput(o) => o.key,
        }
    }

    pub fn key(&self) -> Key {
        self.stored_key().unwrap_or_else(|| self.derive_key())
    }

    pub(crate) fn set_key(&mut self, key: Key) {
        match self {
            Entity::Plugin(p) => p.key = Some(key),
            Entity::AudioFile(f) => f.key = Some(key),
            Entity::Tag(t) => t.key = Some(key),
            Entity::PluginOutput(o) => o.key = Some(key),
        }
    }

    /// Assign the derived key if none is stored yet.
    ///
    /// Returns `true` when the entity had no key, i.e. this is its first
    /// save and its index tuples still have to be written.
    pub fn assign_key(&mut self) -> bool {
        if self.stored_key().is_some() {
            return false;
        }
        let key = self.derive_key();
        self.set_key(key);
        true
    }

    /// Index tuples published when the entity is first saved.
    pub fn index_tuples(&self) -> Vec<IndexTuple> {
        let key = self.key();
        match self {
            Entity::Plugin(p) => vec![IndexTuple::new(
                EntityKind::Plugin,
                key,
                vec![Field::text(&p.name), Field::text(&p.module_ref)],
            )],
            Entity::AudioFile(f) => vec![IndexTuple::new(
                EntityKind::AudioFile,
                key,
                vec![Field::text(&f.path), Field::text(&f.owner)],
            )],
            Entity::Tag(t) => vec![IndexTuple::new(
                EntityKind::Tag,
                key,
                vec![Field::text(&t.name)],
            )],
            Entity::PluginOutput(o) => vec![
                IndexTuple::new(
                    EntityKind::PluginOutput,
                    key,
                    vec![Field::Key(o.plugin_key), Field::Key(o.file_key)],
                ),
                IndexTuple::new(
                    EntityKind::Plugin,
                    o.plugin_key,
                    vec![Field::text(relation::PLUGIN_OUTPUT), Field::Key(key)],
                ),
                IndexTuple::new(
                    EntityKind::AudioFile,
                    o.file_key,
                    vec![Field::text(relation::PLUGIN_OUTPUT), Field::Key(key)],
                ),
            ],
        }
    }

    /// Serialize into a value row. The row always carries the key.
    pub fn to_row(&self) -> CoreResult<Vec<u8>> {
        let mut with_key = self.clone();
        with_key.set_key(self.key());
        serde_json::to_vec(&with_key).map_err(|e| CoreError::Serialize(e.to_string()))
    }

    /// Decode a value row, dispatching on its `type` discriminator.
    pub fn from_row(row: &[u8]) -> CoreResult<Self> {
        serde_json::from_slice(row).map_err(|e| CoreError::Deserialize(e.to_string()))
    }
}

impl From<Plugin> for Entity {
    fn from(p: Plugin) -> Self {
        Entity::Plugin(p)
    }
}

impl From<AudioFile> for Entity {
    fn from(f: AudioFile) -> Self {
        Entity::AudioFile(f)
    }
}

impl From<Tag> for Entity {
    fn from(t: Tag) -> Self {
        Entity::Tag(t)
    }
}

impl From<PluginOutput> for Entity {
    fn from(o: PluginOutput) -> Self {
        Entity::PluginOutput(o)
    }
}

/// Types that can be stored as an [`Entity`] and recovered from one.
pub trait EntityVariant: Into<Entity> + Clone + Sized {
    /// `None` when the entity is a different variant.
    fn from_entity(entity: Entity) -> Option<Self>;
}

impl EntityVariant for Entity {
    fn from_entity(entity: Entity) -> Option<Self> {
        Some(entity)
    }
}

macro_rules! entity_variant {
    ($($variant:ident),*) => {$(
        impl EntityVariant for $variant {
            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    )*};
}

entity_variant!(Plugin, AudioFile, Tag, PluginOutput);

/// Two tuples linking a tag and a file from both sides.
///
/// `guessed` selects the classifier-derived relation instead of the
/// user-applied one.
pub fn tag_link_tuples(tag: Key, file: Key, guessed: bool) -> [IndexTuple; 2] {
    let (tag_rel, file_rel) = if guessed {
        (relation::GUESSED_FILE, relation::GUESSED_TAG)
    } else {
        (relation::AUDIO_FILE, relation::TAG)
    };
    [
        IndexTuple::new(
            EntityKind::Tag,
            tag,
            vec![Field::text(tag_rel), Field::Key(file)],
        ),
        IndexTuple::new(
            EntityKind::AudioFile,
            file,
            vec![Field::text(file_rel), Field::Key(tag)],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_fields_drive_the_key() {
        let mut a = AudioFile::new("a.wav", "alice");
        let b = AudioFile::new("a.wav", "alice");
        a.vector = Some(vec![1.0, 2.0]);
        assert_eq!(Entity::from(a).derive_key(), Entity::from(b).derive_key());
    }

    #[test]
    fn owner_is_part_of_file_identity() {
        let a = AudioFile::new("a.wav", "alice");
        let b = AudioFile::new("a.wav", "bob");
        assert_ne!(a.derive_key(), b.derive_key());
    }

    #[test]
    fn tag_vector_does_not_change_key() {
        let mut t = Tag::new("jazz");
        let before = t.derive_key();
        t.vector = Some(vec![0.5]);
        assert_eq!(t.derive_key(), before);
    }

    #[test]
    fn plugin_output_identity_is_plugin_and_file() {
        let p = Plugin::new("hist", "byte_histogram").key();
        let f = AudioFile::new("a.wav", "").key();
        let a = PluginOutput::new(vec![1.0, 2.0], p, f);
        let b = PluginOutput::new(vec![3.0, 4.0], p, f);
        assert_eq!(a.derive_key(), b.derive_key());
    }

    #[test]
    fn assign_key_only_once() {
        let mut e = Entity::from(Tag::new("rock"));
        assert!(e.assign_key());
        assert!(!e.assign_key());
        assert_eq!(e.stored_key(), Some(e.derive_key()));
    }

    #[test]
    fn row_roundtrip_keeps_variant_and_key() {
        let e = Entity::from(AudioFile::new("a.wav", "alice"));
        let row = e.to_row().unwrap();
        let text = String::from_utf8(row.clone()).unwrap();
        assert!(text.contains("\"type\":\"audio_file\""));
        let back = Entity::from_row(&row).unwrap();
        assert_eq!(back.kind(), EntityKind::AudioFile);
        assert_eq!(back.stored_key(), Some(e.derive_key()));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let row = br#"{"type":"playlist","name":"x"}"#;
        assert!(matches!(
            Entity::from_row(row),
            Err(CoreError::Deserialize(_))
        ));
    }

    #[test]
    fn plugin_output_publishes_three_tuples() {
        let p = Plugin::new("hist", "byte_histogram").key();
        let f = AudioFile::new("a.wav", "").key();
        let e = Entity::from(PluginOutput::new(vec![1.0], p, f));
        let tuples = e.index_tuples();
        assert_eq!(tuples.len(), 3);
        assert!(tuples.iter().any(|t| t.kind == EntityKind::Plugin && t.key == p));
        assert!(tuples.iter().any(|t| t.kind == EntityKind::AudioFile && t.key == f));
    }

    #[test]
    fn variant_recovery() {
        let e = Entity::from(Tag::new("jazz"));
        assert_eq!(Tag::from_entity(e.clone()).map(|t| t.name), Some("jazz".into()));
        assert!(AudioFile::from_entity(e.clone()).is_none());
        assert_eq!(Entity::from_entity(e.clone()), Some(e));
    }

    #[test]
    fn tag_links_are_symmetric() {
        let t = Tag::new("jazz").key();
        let f = AudioFile::new("a.wav", "").key();
        let [from_tag, from_file] = tag_link_tuples(t, f, false);
        assert_eq!(from_tag.key, t);
        assert_eq!(from_tag.fields[1], Field::Key(f));
        assert_eq!(from_file.key, f);
        assert_eq!(from_file.fields[1], Field::Key(t));
    }
}
