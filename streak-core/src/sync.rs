//! Request and result types of a synchronization call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calendar::ContributionCalendar;
use crate::Timestamp;

/// Where the returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    Api,
    Cache,
    Merged,
}

/// What the cache looked like when the call was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
    Invalid,
}

/// Per-call knobs for `sync_year`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Skip the cache decision and go straight to the origin.
    pub force_refresh: bool,
    /// Serve aging data immediately and refresh in the background.
    pub allow_stale_data: bool,
    /// Override the retry profile's `max_retries`.
    pub max_retries: Option<u32>,
    /// Override the per-fetch timeout.
    pub timeout: Option<Duration>,
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn allow_stale(mut self) -> Self {
        self.allow_stale_data = true;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of one synchronization call. Built fresh per call, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub data: Option<ContributionCalendar>,
    pub source: SyncSource,
    pub is_fresh: bool,
    pub error: Option<String>,
    /// Suggested wait in seconds before trying again.
    pub retry_after: Option<u64>,
    pub cache_status: CacheStatus,
}

impl SyncResult {
    /// Data served straight from the cache.
    pub fn from_cache(data: ContributionCalendar, cache_status: CacheStatus, is_fresh: bool) -> Self {
        Self {
            success: true,
            data: Some(data),
            source: SyncSource::Cache,
            is_fresh,
            error: None,
            retry_after: None,
            cache_status,
        }
    }

    /// Data obtained by a successful fetch.
    pub fn fetched(data: ContributionCalendar, source: SyncSource, cache_status: CacheStatus) -> Self {
        Self {
            success: true,
            data: Some(data),
            source,
            is_fresh: true,
            error: None,
            retry_after: None,
            cache_status,
        }
    }

    /// Fetch failed but an older cached copy is available.
    pub fn degraded(data: ContributionCalendar, error: String, retry_after: Option<u64>) -> Self {
        Self {
            success: true,
            data: Some(data),
            source: SyncSource::Cache,
            is_fresh: false,
            error: Some(error),
            retry_after,
            cache_status: CacheStatus::Stale,
        }
    }

    /// Fetch failed and nothing usable is cached.
    pub fn failed(error: String, retry_after: Option<u64>) -> Self {
        Self {
            success: false,
            data: None,
            source: SyncSource::Api,
            is_fresh: false,
            error: Some(error),
            retry_after,
            cache_status: CacheStatus::Miss,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Degraded results are successful but not fresh.
    pub fn is_degraded(&self) -> bool {
        self.success && !self.is_fresh
    }
}

/// Observability snapshot of one cached year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearStatus {
    pub is_fresh: bool,
    pub last_updated: Timestamp,
    pub size_bytes: u64,
}
