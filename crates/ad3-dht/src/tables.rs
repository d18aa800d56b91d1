//! redb table definitions for the local tuple space.
//!
//! Both tables use `&str` keys. Value rows are keyed by the lowercase hex
//! entity key. Tuples are keyed by `{kind}/{key_hex}/{tuple_json}` with an
//! empty value, so a pattern with a fixed key becomes a prefix range scan.

use ad3_core::{EntityKind, IndexTuple, Key};
use redb::TableDefinition;

/// Value rows keyed by `{key_hex}`.
pub const VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("values");

/// Index tuples keyed by `{kind}/{key_hex}/{tuple_json}`.
pub const TUPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("tuples");

pub(crate) fn tuple_row_key(tuple: &IndexTuple, json: &str) -> String {
    format!("{}/{}/{json}", tuple.kind, tuple.key.to_hex())
}

/// Half-open `[start, end)` range covering every tuple of `kind`, narrowed
/// to one entity when `key` is given.
pub(crate) fn tuple_range(kind: EntityKind, key: Option<&Key>) -> (String, String) {
    let prefix = match key {
        Some(k) => format!("{kind}/{}", k.to_hex()),
        None => kind.to_string(),
    };
    // '0' is the byte right after '/'.
    (format!("{prefix}/"), format!("{prefix}0"))
}
