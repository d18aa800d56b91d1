//! ad3-index — the catalogue layer over the DHT.
//!
//! - **`catalog`** — [`Catalog`]: save entities, typed queries, tag links
//! - **`aggregate`** — concurrent AND-intersection of tuple patterns and
//!   batch object resolution
//! - **`cache`** — TTL maps for decoded objects and tuple-query results
//! - **`query`** — filter builders that expand into tuple patterns

pub mod aggregate;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod query;

pub use cache::{CacheConfig, CacheLayer, CacheStats};
pub use catalog::Catalog;
pub use error::{IndexError, IndexResult};
pub use query::{AudioFileFilter, PluginFilter, TagFilter};
