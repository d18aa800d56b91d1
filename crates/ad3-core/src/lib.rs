//! ad3-core — shared model for the ad3 audio cataloguing network.
//!
//! - **`key`** — 256-bit keys derived from entity identity, XOR distance
//! - **`entity`** — `Plugin`, `AudioFile`, `Tag`, `PluginOutput` and their
//!   value rows / index tuples
//! - **`tuple`** — index tuples and wildcard patterns
//! - **`peer`** — peer contacts
//! - **`config`** — `ad3.toml` node configuration

pub mod config;
pub mod entity;
pub mod error;
pub mod key;
pub mod peer;
pub mod tuple;

pub use config::NodeConfig;
pub use entity::{AudioFile, Entity, EntityVariant, Plugin, PluginOutput, Tag};
pub use error::{CoreError, CoreResult};
pub use key::{Key, KEY_LEN};
pub use peer::PeerContact;
pub use tuple::{EntityKind, Field, IndexTuple, TuplePattern};
