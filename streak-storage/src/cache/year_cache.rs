//! Year-keyed cache with integrity contracts.
//!
//! Wraps a [`CacheStore`] backend and enforces the read-side guarantees:
//! an entry is only handed out if its schema version, structure, checksum and
//! year all check out. Anything else is reported as missing.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use streak_core::{
    CacheEntry, ContributionCalendar, FreshnessPolicy, IntegrityViolation, StorageError,
    StreakError, StreakResult, Timestamp, Year, YearStatus,
};
use tracing::{debug, warn};

use super::traits::{CacheStats, CacheStore};

/// Outcome of a validated lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Entry passed every integrity check.
    Valid(CacheEntry),
    /// Something was stored but could not be trusted.
    Invalid(IntegrityViolation),
    /// Nothing stored for the year.
    Missing,
}

impl CacheLookup {
    /// Collapse to the `get` contract: invalid and missing look the same.
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            CacheLookup::Valid(entry) => Some(entry),
            CacheLookup::Invalid(_) | CacheLookup::Missing => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, CacheLookup::Invalid(_))
    }
}

/// Persistent cache of contribution calendars keyed by year.
///
/// # Example
///
/// ```ignore
/// let cache = YearCache::new(Arc::new(InMemoryCacheStore::new()));
/// cache.set(2024, calendar).await?;
/// let entry = cache.get(2024).await?.expect("just written");
/// assert!(cache.is_fresh(&entry));
/// ```
pub struct YearCache<S: CacheStore> {
    store: Arc<S>,
    policy: FreshnessPolicy,
}

impl<S: CacheStore> Clone for YearCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
        }
    }
}

impl<S: CacheStore> YearCache<S> {
    /// Create a cache with the default 24h / 7d windows.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_policy(store, FreshnessPolicy::default())
    }

    pub fn with_policy(store: Arc<S>, policy: FreshnessPolicy) -> Self {
        Self { store, policy }
    }

    /// Replace the freshness windows.
    pub fn with_freshness(mut self, policy: FreshnessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    /// Get a reference to the backend.
    pub fn backend(&self) -> &S {
        &self.store
    }

    /// Load and validate the entry for `year`.
    ///
    /// Undecodable bytes are reported as [`CacheLookup::Invalid`]; other
    /// backend failures propagate.
    pub async fn lookup(&self, year: Year) -> StreakResult<CacheLookup> {
        let entry = match self.store.load(year).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(CacheLookup::Missing),
            Err(StreakError::Storage(StorageError::Serialization { reason })) => {
                warn!(year, %reason, "Cached entry could not be decoded");
                return Ok(CacheLookup::Invalid(IntegrityViolation::MalformedCalendar {
                    reason,
                }));
            }
            Err(e) => return Err(e),
        };

        if entry.year != year {
            let violation = IntegrityViolation::YearMismatch {
                stored: entry.year,
                requested: year,
            };
            warn!(year, %violation, "Cached entry rejected");
            return Ok(CacheLookup::Invalid(violation));
        }

        match entry.validate() {
            Ok(()) => Ok(CacheLookup::Valid(entry)),
            Err(violation) => {
                warn!(year, %violation, "Cached entry rejected");
                Ok(CacheLookup::Invalid(violation))
            }
        }
    }

    /// Validated entry for `year`, or None if absent or untrustworthy.
    pub async fn get(&self, year: Year) -> StreakResult<Option<CacheEntry>> {
        Ok(self.lookup(year).await?.into_entry())
    }

    /// Stamp and write `data` as the entry for `year`. Full replace.
    pub async fn set(&self, year: Year, data: ContributionCalendar) -> StreakResult<CacheEntry> {
        self.set_at(year, data, Utc::now()).await
    }

    /// [`set`](Self::set) with an explicit clock.
    pub async fn set_at(
        &self,
        year: Year,
        data: ContributionCalendar,
        now: Timestamp,
    ) -> StreakResult<CacheEntry> {
        let entry = CacheEntry::new(year, data, now);
        self.store.store(&entry).await?;
        debug!(
            year,
            total = entry.data.total_contributions,
            complete = entry.is_complete,
            "Cached calendar"
        );
        Ok(entry)
    }

    pub async fn delete(&self, year: Year) -> StreakResult<bool> {
        self.store.remove(year).await
    }

    pub async fn delete_all(&self) -> StreakResult<u64> {
        self.store.clear().await
    }

    /// Stored years, ascending. Includes years whose entries are invalid.
    pub async fn list_years(&self) -> StreakResult<Vec<Year>> {
        self.store.years().await
    }

    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.policy.is_fresh(entry.last_updated)
    }

    pub fn is_stale(&self, entry: &CacheEntry) -> bool {
        self.policy.is_stale(entry.last_updated)
    }

    /// Freshness, age and size of every valid entry.
    pub async fn status(&self) -> StreakResult<BTreeMap<Year, YearStatus>> {
        let mut status = BTreeMap::new();
        for year in self.list_years().await? {
            let Some(entry) = self.get(year).await? else {
                continue;
            };
            let size_bytes = self.store.entry_size(year).await?.unwrap_or(0);
            status.insert(
                year,
                YearStatus {
                    is_fresh: self.is_fresh(&entry),
                    last_updated: entry.last_updated,
                    size_bytes,
                },
            );
        }
        Ok(status)
    }

    pub async fn stats(&self) -> StreakResult<CacheStats> {
        self.store.stats().await
    }
}
