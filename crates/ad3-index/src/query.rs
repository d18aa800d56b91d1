//! Typed filters that expand into tuple-pattern criteria.
//!
//! Every filter starts from the entity's primary tuple (with whatever
//! identity fields were given) and adds one relation pattern per reference.
//! A default filter therefore matches every entity of its kind.

use ad3_core::entity::relation;
use ad3_core::{EntityKind, Field, Key, TuplePattern};

#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub name: Option<String>,
    /// Tags a user applied to this file.
    pub audio_file: Option<Key>,
    /// Tags guessed for this file.
    pub guessed_file: Option<Key>,
}

impl TagFilter {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn audio_file(mut self, file: Key) -> Self {
        self.audio_file = Some(file);
        self
    }

    pub fn guessed_file(mut self, file: Key) -> Self {
        self.guessed_file = Some(file);
        self
    }

    pub fn criteria(&self) -> Vec<TuplePattern> {
        let mut criteria = vec![TuplePattern::new(
            EntityKind::Tag,
            None,
            vec![self.name.clone().map(Field::Text)],
        )];
        if let Some(file) = self.audio_file {
            criteria.push(TuplePattern::relation(
                EntityKind::Tag,
                None,
                relation::AUDIO_FILE,
                Some(file),
            ));
        }
        if let Some(file) = self.guessed_file {
            criteria.push(TuplePattern::relation(
                EntityKind::Tag,
                None,
                relation::GUESSED_FILE,
                Some(file),
            ));
        }
        criteria
    }
}

#[derive(Debug, Clone, Default)]
pub struct AudioFileFilter {
    pub path: Option<String>,
    pub owner: Option<String>,
    pub tag: Option<Key>,
    pub guessed_tag: Option<Key>,
    pub plugin_output: Option<Key>,
}

impl AudioFileFilter {
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn tag(mut self, tag: Key) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn guessed_tag(mut self, tag: Key) -> Self {
        self.guessed_tag = Some(tag);
        self
    }

    pub fn plugin_output(mut self, output: Key) -> Self {
        self.plugin_output = Some(output);
        self
    }

    pub fn criteria(&self) -> Vec<TuplePattern> {
        let mut criteria = vec![TuplePattern::new(
            EntityKind::AudioFile,
            None,
            vec![
                self.path.clone().map(Field::Text),
                self.owner.clone().map(Field::Text),
            ],
        )];
        for (rel, other) in [
            (relation::TAG, self.tag),
            (relation::GUESSED_TAG, self.guessed_tag),
            (relation::PLUGIN_OUTPUT, self.plugin_output),
        ] {
            if let Some(other) = other {
                criteria.push(TuplePattern::relation(
                    EntityKind::AudioFile,
                    None,
                    rel,
                    Some(other),
                ));
            }
        }
        criteria
    }
}

#[derive(Debug, Clone, Default)]
pub struct PluginFilter {
    pub name: Option<String>,
    pub module_ref: Option<String>,
    pub plugin_output: Option<Key>,
}

impl PluginFilter {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn module_ref(mut self, module_ref: impl Into<String>) -> Self {
        self.module_ref = Some(module_ref.into());
        self
    }

    pub fn plugin_output(mut self, output: Key) -> Self {
        self.plugin_output = Some(output);
        self
    }

    pub fn criteria(&self) -> Vec<TuplePattern> {
        let mut criteria = vec![TuplePattern::new(
            EntityKind::Plugin,
            None,
            vec![
                self.name.clone().map(Field::Text),
                self.module_ref.clone().map(Field::Text),
            ],
        )];
        if let Some(output) = self.plugin_output {
            criteria.push(TuplePattern::relation(
                EntityKind::Plugin,
                None,
                relation::PLUGIN_OUTPUT,
                Some(output),
            ));
        }
        criteria
    }
}

/// Plugin outputs for a file and/or a plugin: a single primary-tuple pattern.
pub fn plugin_output_criteria(file: Option<Key>, plugin: Option<Key>) -> Vec<TuplePattern> {
    vec![TuplePattern::new(
        EntityKind::PluginOutput,
        None,
        vec![plugin.map(Field::Key), file.map(Field::Key)],
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_primary_wildcard() {
        assert_eq!(TagFilter::default().criteria(), vec![TuplePattern::any(EntityKind::Tag)]);
        assert_eq!(
            AudioFileFilter::default().criteria(),
            vec![TuplePattern::any(EntityKind::AudioFile)]
        );
        assert_eq!(
            PluginFilter::default().criteria(),
            vec![TuplePattern::any(EntityKind::Plugin)]
        );
    }

    #[test]
    fn references_add_relation_patterns() {
        let tag = Key::derive("tag", &[b"jazz"]);
        let out = Key::derive("plugin_output", &[b"x"]);
        let criteria = AudioFileFilter::default()
            .owner("alice")
            .tag(tag)
            .plugin_output(out)
            .criteria();
        assert_eq!(criteria.len(), 3);
        assert_eq!(criteria[0].fields[1], Some(Field::text("alice")));
        assert_eq!(
            criteria[1],
            TuplePattern::relation(EntityKind::AudioFile, None, "tag", Some(tag))
        );
    }

    #[test]
    fn plugin_output_field_order() {
        let file = Key::derive("audio_file", &[b"a.wav", b""]);
        let criteria = plugin_output_criteria(Some(file), None);
        assert_eq!(criteria[0].fields, vec![None, Some(Field::Key(file))]);
    }
}
