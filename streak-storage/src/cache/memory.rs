//! In-memory cache store.
//!
//! Holds encoded entries in a map so sizes and decode failures behave like
//! the LMDB backend. Used by tests and by processes that do not need the
//! cache to outlive them.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use streak_core::{CacheEntry, StorageError, StreakResult, Year};

use super::traits::{decode_entry, encode_entry, CacheStats, CacheStore};

#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<BTreeMap<Year, Vec<u8>>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write raw bytes for `year`, bypassing encoding.
    pub fn store_bytes(&self, year: Year, bytes: Vec<u8>) -> StreakResult<()> {
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(year, bytes);
        Ok(())
    }

    fn record_lookup(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn load(&self, year: Year) -> StreakResult<Option<CacheEntry>> {
        let bytes = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(&year)
            .cloned();
        self.record_lookup(bytes.is_some());
        match bytes {
            Some(bytes) => Ok(Some(decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, entry: &CacheEntry) -> StreakResult<()> {
        let bytes = encode_entry(entry)?;
        self.store_bytes(entry.year, bytes)
    }

    async fn remove(&self, year: Year) -> StreakResult<bool> {
        Ok(self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&year)
            .is_some())
    }

    async fn clear(&self) -> StreakResult<u64> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }

    async fn years(&self) -> StreakResult<Vec<Year>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .keys()
            .copied()
            .collect())
    }

    async fn entry_size(&self, year: Year) -> StreakResult<Option<u64>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(&year)
            .map(|b| b.len() as u64))
    }

    async fn stats(&self) -> StreakResult<CacheStats> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entry_count = entries.len() as u64;
        stats.size_bytes = entries.values().map(|b| b.len() as u64).sum();
        Ok(stats)
    }
}
