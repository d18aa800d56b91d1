//! Index tuples and wildcard patterns for the tuple space.
//!
//! A tuple is `(kind, key, field₁, …)`. Patterns have the same shape with
//! every position after the kind optional; `None` is a wildcard. A pattern
//! only matches tuples of the same kind and arity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::Key;

/// Entity discriminator, shared by value rows and tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Plugin,
    AudioFile,
    Tag,
    PluginOutput,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Plugin => "plugin",
            EntityKind::AudioFile => "audio_file",
            EntityKind::Tag => "tag",
            EntityKind::PluginOutput => "plugin_output",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tuple field: free text or a reference to another entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Field {
    Text(String),
    Key(Key),
}

impl Field {
    pub fn text(s: impl Into<String>) -> Self {
        Field::Text(s.into())
    }
}

impl From<Key> for Field {
    fn from(key: Key) -> Self {
        Field::Key(key)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::Text(s.to_string())
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::Text(s)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Text(s) => write!(f, "{s:?}"),
            Field::Key(k) => write!(f, "#{}", k.short()),
        }
    }
}

/// Fixed-arity record published into the tuple space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexTuple {
    pub kind: EntityKind,
    pub key: Key,
    pub fields: Vec<Field>,
}

impl IndexTuple {
    pub fn new(kind: EntityKind, key: Key, fields: Vec<Field>) -> Self {
        Self { kind, key, fields }
    }

    /// Number of positions including kind and key.
    pub fn arity(&self) -> usize {
        self.fields.len() + 2
    }
}

impl fmt::Display for IndexTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, #{}", self.kind, self.key.short())?;
        for field in &self.fields {
            write!(f, ", {field}")?;
        }
        f.write_str(")")
    }
}

/// Partial-match template over [`IndexTuple`]s.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TuplePattern {
    pub kind: EntityKind,
    pub key: Option<Key>,
    pub fields: Vec<Option<Field>>,
}

impl TuplePattern {
    pub fn new(kind: EntityKind, key: Option<Key>, fields: Vec<Option<Field>>) -> Self {
        Self { kind, key, fields }
    }

    /// Pattern matching an entity's primary tuple with every field wildcarded.
    pub fn any(kind: EntityKind) -> Self {
        let width = match kind {
            EntityKind::Tag => 1,
            EntityKind::Plugin | EntityKind::AudioFile | EntityKind::PluginOutput => 2,
        };
        Self::new(kind, None, vec![None; width])
    }

    /// Pattern for a cross-reference `(kind, key?, relation, other?)`.
    pub fn relation(kind: EntityKind, key: Option<Key>, relation: &str, other: Option<Key>) -> Self {
        Self::new(
            kind,
            key,
            vec![Some(Field::text(relation)), other.map(Field::Key)],
        )
    }

    pub fn matches(&self, tuple: &IndexTuple) -> bool {
        if self.kind != tuple.kind || self.fields.len() != tuple.fields.len() {
            return false;
        }
        if let Some(key) = &self.key {
            if *key != tuple.key {
                return false;
            }
        }
        self.fields
            .iter()
            .zip(&tuple.fields)
            .all(|(want, have)| want.as_ref().is_none_or(|w| w == have))
    }
}

impl fmt::Display for TuplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.kind)?;
        match &self.key {
            Some(k) => write!(f, ", #{}", k.short())?,
            None => f.write_str(", *")?,
        }
        for field in &self.fields {
            match field {
                Some(v) => write!(f, ", {v}")?,
                None => f.write_str(", *")?,
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_key(name: &str) -> Key {
        Key::derive("tag", &[name.as_bytes()])
    }

    #[test]
    fn exact_pattern_matches() {
        let k = tag_key("jazz");
        let t = IndexTuple::new(EntityKind::Tag, k, vec![Field::text("jazz")]);
        let p = TuplePattern::new(EntityKind::Tag, Some(k), vec![Some(Field::text("jazz"))]);
        assert!(p.matches(&t));
    }

    #[test]
    fn wildcards_match_anything() {
        let t = IndexTuple::new(EntityKind::Tag, tag_key("jazz"), vec![Field::text("jazz")]);
        assert!(TuplePattern::any(EntityKind::Tag).matches(&t));
    }

    #[test]
    fn arity_must_agree() {
        let k = tag_key("jazz");
        let file = Key::derive("audio_file", &[b"a.wav", b""]);
        let rel = IndexTuple::new(
            EntityKind::Tag,
            k,
            vec![Field::text("audio_file"), Field::Key(file)],
        );
        assert!(!TuplePattern::any(EntityKind::Tag).matches(&rel));
        assert!(TuplePattern::relation(EntityKind::Tag, None, "audio_file", None).matches(&rel));
    }

    #[test]
    fn kind_must_agree() {
        let t = IndexTuple::new(EntityKind::Tag, tag_key("x"), vec![Field::text("x")]);
        let p = TuplePattern::new(EntityKind::Plugin, None, vec![None]);
        assert!(!p.matches(&t));
    }

    #[test]
    fn text_does_not_match_key_field() {
        let k = tag_key("x");
        let t = IndexTuple::new(EntityKind::Tag, k, vec![Field::Key(k)]);
        let p = TuplePattern::new(EntityKind::Tag, None, vec![Some(Field::text(k.to_hex()))]);
        assert!(!p.matches(&t));
    }

    #[test]
    fn key_constraint_filters() {
        let t = IndexTuple::new(EntityKind::Tag, tag_key("a"), vec![Field::text("a")]);
        let p = TuplePattern::new(EntityKind::Tag, Some(tag_key("b")), vec![None]);
        assert!(!p.matches(&t));
    }
}
