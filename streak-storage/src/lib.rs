//! STREAK Storage - Persistent Cache Store
//!
//! Durable year → [`streak_core::CacheEntry`] storage. Nothing here touches
//! the network.

pub mod cache;

pub use cache::{
    CacheLookup, CacheStats, CacheStore, InMemoryCacheStore, LmdbCacheError, LmdbCacheStore,
    YearCache,
};
