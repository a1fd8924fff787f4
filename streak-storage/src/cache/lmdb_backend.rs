//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! crash-safe year → entry map that survives process restarts.
//!
//! # Key Format
//!
//! Keys are the year as 4 big-endian bytes with the sign bit flipped, so the
//! natural LMDB key order is numeric year order.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `load`, `years` and `entry_size`
//! - Write transactions for `store`, `remove` and `clear`
//! - Statistics are tracked behind a lock

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use streak_core::{CacheEntry, StorageError, StreakError, StreakResult, Year};
use tracing::warn;

use super::traits::{decode_entry, encode_entry, CacheStats, CacheStore};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for StorageError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::EnvOpen(reason) | LmdbCacheError::DbOpen(reason) => {
                StorageError::Open { reason }
            }
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        }
    }
}

impl From<LmdbCacheError> for StreakError {
    fn from(e: LmdbCacheError) -> Self {
        StreakError::Storage(e.into())
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Encode a year so byte order equals numeric order.
pub fn encode_year(year: Year) -> [u8; 4] {
    ((year as u32) ^ 0x8000_0000).to_be_bytes()
}

/// Inverse of [`encode_year`]. Returns None for keys of the wrong length.
pub fn decode_year(key: &[u8]) -> Option<Year> {
    let bytes: [u8; 4] = key.try_into().ok()?;
    Some((u32::from_be_bytes(bytes) ^ 0x8000_0000) as Year)
}

/// LMDB-backed year cache.
///
/// # Example
///
/// ```ignore
/// use streak_storage::{LmdbCacheStore, YearCache};
///
/// let store = LmdbCacheStore::new("/var/cache/streak", 64)?;
/// let cache = YearCache::new(Arc::new(store));
/// cache.set(2024, calendar).await?;
/// ```
pub struct LmdbCacheStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Global statistics.
    stats: Arc<RwLock<CacheStats>>,
}

impl LmdbCacheStore {
    /// Open (or create) an LMDB cache store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        // Seed entry statistics from what survived the last run.
        let (entry_count, size_bytes) = {
            let rtxn = env.read_txn().map_err(txn_error)?;
            let mut count = 0u64;
            let mut bytes = 0u64;
            for (_, value) in db.iter(&rtxn).map_err(txn_error)?.flatten() {
                count += 1;
                bytes += value.len() as u64;
            }
            (count, bytes)
        };

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats {
                entry_count,
                size_bytes,
                ..CacheStats::default()
            })),
        })
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

    fn read_bytes(&self, year: Year) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let value = self
            .db
            .get(&rtxn, encode_year(year).as_slice())
            .map_err(txn_error)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn load(&self, year: Year) -> StreakResult<Option<CacheEntry>> {
        match self.read_bytes(year)? {
            Some(bytes) => {
                self.record_lookup(true);
                Ok(Some(decode_entry(&bytes)?))
            }
            None => {
                self.record_lookup(false);
                Ok(None)
            }
        }
    }

    async fn store(&self, entry: &CacheEntry) -> StreakResult<()> {
        let key = encode_year(entry.year);
        let bytes = encode_entry(entry)?;
        let previous = self.read_bytes(entry.year)?.map(|b| b.len() as u64);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, key.as_slice(), bytes.as_slice())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if let Ok(mut stats) = self.stats.write() {
            match previous {
                Some(old) => stats.size_bytes = stats.size_bytes.saturating_sub(old),
                None => stats.entry_count += 1,
            }
            stats.size_bytes += bytes.len() as u64;
        }
        Ok(())
    }

    async fn remove(&self, year: Year) -> StreakResult<bool> {
        let previous = self.read_bytes(year)?.map(|b| b.len() as u64);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self
            .db
            .delete(&mut wtxn, encode_year(year).as_slice())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if deleted {
            if let Ok(mut stats) = self.stats.write() {
                stats.entry_count = stats.entry_count.saturating_sub(1);
                stats.size_bytes = stats.size_bytes.saturating_sub(previous.unwrap_or(0));
            }
        }
        Ok(deleted)
    }

    async fn clear(&self) -> StreakResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.len(&wtxn).map_err(txn_error)?;
        self.db.clear(&mut wtxn).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = 0;
            stats.size_bytes = 0;
        }
        Ok(deleted)
    }

    async fn years(&self) -> StreakResult<Vec<Year>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut years = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, _) = result.map_err(txn_error)?;
            match decode_year(key) {
                Some(year) => years.push(year),
                None => warn!(key_len = key.len(), "Skipping cache key that is not a year"),
            }
        }
        Ok(years)
    }

    async fn entry_size(&self, year: Year) -> StreakResult<Option<u64>> {
        Ok(self.read_bytes(year)?.map(|b| b.len() as u64))
    }

    async fn stats(&self) -> StreakResult<CacheStats> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
