//! STREAK Test Utilities
//!
//! Shared test infrastructure for the STREAK workspace:
//! - Scripted origin and edge collaborators
//! - Proptest generators for calendars and retry profiles
//! - Fixtures for common cache scenarios
//! - Assertions over `SyncResult`

pub use streak_core::{
    CacheEntry, CacheStatus, ContributionCalendar, ContributionDay, FetchError, MonthSummary,
    RetryConfig, SyncConfig, SyncOptions, SyncResult, SyncSource, Timestamp, Year,
};
pub use streak_storage::{InMemoryCacheStore, YearCache};
pub use streak_sync::{ContributionSource, EdgeCache, EdgeHit, SyncOrchestrator};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// Scripted origin.
///
/// Serves registered calendars (or [`fixtures::calendar_for_year`]) after an
/// optional latency, and records call counts and peak concurrency. Queued
/// failures are returned before anything else; a persistent failure is
/// returned until [`MockOrigin::recover`] is called.
#[derive(Debug, Default)]
pub struct MockOrigin {
    calendars: Mutex<HashMap<Year, ContributionCalendar>>,
    queued_failures: Mutex<VecDeque<FetchError>>,
    persistent_failure: Mutex<Option<FetchError>>,
    latency: Mutex<Duration>,
    calls: AtomicU32,
    calls_by_year: Mutex<HashMap<Year, u32>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl MockOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calendar(self, year: Year, calendar: ContributionCalendar) -> Self {
        self.set_calendar(year, calendar);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_calendar(&self, year: Year, calendar: ContributionCalendar) {
        if let Ok(mut calendars) = self.calendars.lock() {
            calendars.insert(year, calendar);
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: FetchError) {
        if let Ok(mut queue) = self.queued_failures.lock() {
            queue.push_back(error);
        }
    }

    /// Fail every call with `error` until [`recover`](Self::recover).
    pub fn fail_always(&self, error: FetchError) {
        if let Ok(mut failure) = self.persistent_failure.lock() {
            *failure = Some(error);
        }
    }

    pub fn recover(&self) {
        if let Ok(mut failure) = self.persistent_failure.lock() {
            *failure = None;
        }
        if let Ok(mut queue) = self.queued_failures.lock() {
            queue.clear();
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, year: Year) -> u32 {
        self.calls_by_year
            .lock()
            .map(|calls| calls.get(&year).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Highest number of fetches observed running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn next_response(&self, year: Year) -> Result<ContributionCalendar, FetchError> {
        if let Some(error) = self.queued_failures.lock().ok().and_then(|mut q| q.pop_front()) {
            return Err(error);
        }
        if let Some(error) = self.persistent_failure.lock().ok().and_then(|f| f.clone()) {
            return Err(error);
        }
        Ok(self
            .calendars
            .lock()
            .ok()
            .and_then(|calendars| calendars.get(&year).cloned())
            .unwrap_or_else(|| fixtures::calendar_for_year(year)))
    }
}

/// Decrements the active counter even when the fetch is cancelled.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContributionSource for MockOrigin {
    async fn fetch_year(&self, year: Year) -> Result<ContributionCalendar, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls_by_year.lock() {
            *calls.entry(year).or_default() += 1;
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.next_response(year)
    }
}

/// In-memory edge tier.
#[derive(Debug, Default)]
pub struct MockEdgeCache {
    entries: Mutex<HashMap<Year, EdgeHit>>,
    failing: AtomicBool,
    lookups: AtomicU32,
    warmed: Mutex<Vec<Year>>,
}

impl MockEdgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` for `year`, marked stale or not.
    pub fn insert(&self, year: Year, data: ContributionCalendar, stale: bool) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                year,
                EdgeHit {
                    data,
                    cached: true,
                    stale,
                    age: Some(if stale { 86_400 } else { 60 }),
                },
            );
        }
    }

    /// Make every lookup and warm fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lookup_count(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Years pushed through [`EdgeCache::warm`], in order.
    pub fn warmed_years(&self) -> Vec<Year> {
        self.warmed.lock().map(|w| w.clone()).unwrap_or_default()
    }

    fn unavailable() -> FetchError {
        FetchError::Network {
            reason: "edge unavailable".to_string(),
        }
    }
}

#[async_trait]
impl EdgeCache for MockEdgeCache {
    async fn lookup(&self, year: Year) -> Result<Option<EdgeHit>, FetchError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self
            .entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&year).cloned()))
    }

    async fn warm(&self, year: Year, data: &ContributionCalendar) -> Result<(), FetchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        if let Ok(mut warmed) = self.warmed.lock() {
            warmed.push(year);
        }
        self.insert(year, data.clone(), false);
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for STREAK types.

    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use proptest::prelude::*;

    /// Sparse calendar inside `year`: up to `max_days` days with counts below 40.
    pub fn arb_calendar_in(year: Year, max_days: usize) -> impl Strategy<Value = ContributionCalendar> {
        let days_in_year = fixtures::days_in_year(year);
        prop::collection::btree_map(0..days_in_year, 0u32..40, 0..=max_days).prop_map(
            move |days| {
                let start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default();
                ContributionCalendar::from_days(
                    days.into_iter().map(|(offset, count)| {
                        ContributionDay::new(start + ChronoDuration::days(i64::from(offset)), count)
                    }),
                    vec![],
                )
            },
        )
    }

    /// Sparse calendar in 2024.
    pub fn arb_calendar() -> impl Strategy<Value = ContributionCalendar> {
        arb_calendar_in(2024, 150)
    }

    /// A valid retry profile.
    pub fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (0u32..8, 1u64..5_000, 0u64..120_000, 1.0f64..5.0, 0.0f64..=1.0).prop_map(
            |(max_retries, base_ms, extra_ms, multiplier, jitter)| RetryConfig {
                max_retries,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(base_ms + extra_ms),
                backoff_multiplier: multiplier,
                jitter_factor: jitter,
            },
        )
    }

    /// Any origin failure.
    pub fn arb_fetch_error() -> impl Strategy<Value = FetchError> {
        prop_oneof![
            (1u64..60_000).prop_map(|timeout_ms| FetchError::Timeout { timeout_ms }),
            "[a-z ]{1,20}".prop_map(|reason| FetchError::Network { reason }),
            (400u16..600, "[a-z ]{1,20}").prop_map(|(status, message)| FetchError::Http {
                status,
                message,
                retry_at: None,
            }),
            "[a-z ]{1,20}".prop_map(|message| FetchError::RateLimited {
                message,
                retry_at: None,
            }),
            "[a-z ]{1,20}".prop_map(|message| FetchError::Upstream { message }),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built calendars, entries and configurations.

    use super::*;
    use chrono::{Datelike, NaiveDate, Utc};
    use streak_core::{week_start, CacheEntry};
    use streak_storage::CacheStore;

    pub fn days_in_year(year: Year) -> u32 {
        streak_core::expected_days(year)
    }

    fn every_day(year: Year) -> impl Iterator<Item = NaiveDate> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1);
        (0..days_in_year(year)).filter_map(move |offset| {
            start.and_then(|s| s.checked_add_days(chrono::Days::new(u64::from(offset))))
        })
    }

    /// Twelve month summaries for `year`.
    pub fn month_summaries(year: Year) -> Vec<MonthSummary> {
        const NAMES: [&str; 12] = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        NAMES
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                let first_day = NaiveDate::from_ymd_opt(year, i as u32 + 1, 1)?;
                let next = if i == 11 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(year, i as u32 + 2, 1)?
                };
                let last_day = next.pred_opt()?;
                let weeks = (week_start(last_day) - week_start(first_day)).num_days() / 7 + 1;
                Some(MonthSummary {
                    name: (*name).to_string(),
                    year,
                    first_day,
                    total_weeks: weeks as u32,
                })
            })
            .collect()
    }

    /// Full-year calendar with a deterministic count pattern.
    pub fn calendar_for_year(year: Year) -> ContributionCalendar {
        ContributionCalendar::from_days(
            every_day(year).map(|date| ContributionDay::new(date, (date.ordinal() * 7) % 13)),
            month_summaries(year),
        )
    }

    /// Full-year calendar whose counts add up to exactly `total`.
    pub fn calendar_with_total(year: Year, total: u64) -> ContributionCalendar {
        let days = u64::from(days_in_year(year));
        let base = total / days;
        let remainder = total % days;
        ContributionCalendar::from_days(
            every_day(year).enumerate().map(|(i, date)| {
                let extra = u64::from((i as u64) < remainder);
                ContributionDay::new(date, (base + extra) as u32)
            }),
            month_summaries(year),
        )
    }

    /// Calendar holding only `days` as `(month, day, count)`.
    pub fn sparse_calendar(year: Year, days: &[(u32, u32, u32)]) -> ContributionCalendar {
        ContributionCalendar::from_days(
            days.iter().filter_map(|&(month, day, count)| {
                NaiveDate::from_ymd_opt(year, month, day).map(|d| ContributionDay::new(d, count))
            }),
            vec![],
        )
    }

    /// Entry for `calendar` whose `last_updated` is `age` in the past.
    pub fn aged_entry(year: Year, calendar: ContributionCalendar, age: chrono::Duration) -> CacheEntry {
        CacheEntry::new(year, calendar, Utc::now() - age)
    }

    /// Write `calendar` into `cache` as if it had been synced `age` ago.
    pub async fn seed<S: CacheStore>(
        cache: &YearCache<S>,
        year: Year,
        calendar: ContributionCalendar,
        age: chrono::Duration,
    ) -> CacheEntry {
        match cache.set_at(year, calendar, Utc::now() - age).await {
            Ok(entry) => entry,
            Err(e) => panic!("seeding {year} failed: {e}"),
        }
    }

    /// Config with jitter disabled so delays are exact.
    pub fn deterministic_config() -> SyncConfig {
        SyncConfig::default()
            .with_retry(RetryConfig::default().with_jitter(0.0))
            .with_rate_limit_retry(RetryConfig::rate_limit().with_jitter(0.0))
    }

    pub fn rate_limited() -> FetchError {
        FetchError::RateLimited {
            message: "API rate limit exceeded".to_string(),
            retry_at: None,
        }
    }

    pub fn server_error(status: u16) -> FetchError {
        FetchError::Http {
            status,
            message: "upstream error".to_string(),
            retry_at: None,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over sync outcomes.

    use super::*;

    /// Served from cache without touching the network.
    #[track_caller]
    pub fn assert_cache_hit(result: &SyncResult) {
        assert!(result.success, "Expected success, got: {:?}", result);
        assert_eq!(result.source, SyncSource::Cache, "Wrong source");
        assert_eq!(result.cache_status, CacheStatus::Hit, "Wrong cache status");
        assert!(result.is_fresh, "Expected fresh data");
        assert!(result.error.is_none(), "Unexpected error: {:?}", result.error);
    }

    /// Fetch failed and an older cached copy was returned.
    #[track_caller]
    pub fn assert_degraded(result: &SyncResult) {
        assert!(result.success, "Expected success, got: {:?}", result);
        assert!(result.data.is_some(), "Expected fallback data");
        assert_eq!(result.source, SyncSource::Cache, "Wrong source");
        assert_eq!(result.cache_status, CacheStatus::Stale, "Wrong cache status");
        assert!(!result.is_fresh, "Degraded data must not be fresh");
        assert!(result.error.is_some(), "Expected an error message");
    }

    /// Fresh data obtained from the network.
    #[track_caller]
    pub fn assert_fetched(result: &SyncResult, source: SyncSource, status: CacheStatus) {
        assert!(result.success, "Expected success, got: {:?}", result);
        assert!(result.is_fresh, "Expected fresh data");
        assert_eq!(result.source, source, "Wrong source");
        assert_eq!(result.cache_status, status, "Wrong cache status");
    }
}
