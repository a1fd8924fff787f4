//! Persistent cache layer.
//!
//! Backends ([`CacheStore`]) are dumb year-keyed stores. [`YearCache`] sits on
//! top and owns the integrity contract: callers never see a corrupt entry,
//! only a missing one.

pub mod lmdb_backend;
pub mod memory;
pub mod traits;
pub mod year_cache;

pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory::InMemoryCacheStore;
pub use traits::{decode_entry, encode_entry, CacheStats, CacheStore};
pub use year_cache::{CacheLookup, YearCache};
