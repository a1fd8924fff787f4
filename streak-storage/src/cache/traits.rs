//! Cache backend trait and statistics.
//!
//! A backend is a dumb year-keyed key-value store. It performs no integrity
//! checks; those live in [`super::YearCache`].

use async_trait::async_trait;
use streak_core::{CacheEntry, StorageError, StreakResult, Year};

/// Cache backend trait for pluggable storage engines.
///
/// Implementations must be thread-safe. Writes are full replacements; there
/// are no partial updates.
///
/// # Serialization
///
/// Implementations own the encoding of entries. An entry that cannot be
/// decoded must surface as `StorageError::Serialization` so the caller can
/// treat it as corrupt.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load the raw entry stored for `year`.
    async fn load(&self, year: Year) -> StreakResult<Option<CacheEntry>>;

    /// Write `entry` under `entry.year`, replacing anything already there.
    async fn store(&self, entry: &CacheEntry) -> StreakResult<()>;

    /// Remove one year. Returns true if something was deleted.
    async fn remove(&self, year: Year) -> StreakResult<bool>;

    /// Remove every year. Returns the number of entries deleted.
    async fn clear(&self) -> StreakResult<u64>;

    /// All stored years in ascending order.
    async fn years(&self) -> StreakResult<Vec<Year>>;

    /// Encoded size of the entry for `year`, in bytes.
    async fn entry_size(&self, year: Year) -> StreakResult<Option<u64>>;

    /// Get cache statistics.
    async fn stats(&self) -> StreakResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of loads that found an entry.
    pub hits: u64,
    /// Number of loads that found nothing.
    pub misses: u64,
    /// Number of entries currently stored.
    pub entry_count: u64,
    /// Approximate bytes stored.
    pub size_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Encode an entry the way every bundled backend stores it (JSON).
pub fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(entry).map_err(|e| StorageError::Serialization {
        reason: e.to_string(),
    })
}

/// Decode bytes written by [`encode_entry`].
pub fn decode_entry(bytes: &[u8]) -> Result<CacheEntry, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization {
        reason: e.to_string(),
    })
}
