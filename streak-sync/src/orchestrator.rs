//! Synchronization orchestrator.
//!
//! Decides per year whether to serve the cache, fetch from the origin, or
//! fall back to older data, and makes sure only one fetch per year is in
//! flight at a time.
//!
//! # Flow
//!
//! ```text
//! START -> CHECK_CACHE -> SERVE_FRESH
//!                      -> FETCH -> MERGE -> PERSIST -> DONE_OK
//!                               -> FALLBACK_CACHE -> DONE_DEGRADED
//!                               -> DONE_FAIL
//! ```
//!
//! Every failure is turned into fields of [`SyncResult`]; `sync_year` never
//! returns an error.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use streak_core::{
    merge, validate_calendar, CacheEntry, CacheStatus, ContributionCalendar, EntryAge,
    FetchError, RetryConfig, StreakResult, SyncConfig, SyncOptions, SyncResult, SyncSource,
    Year, YearStatus,
};
use streak_storage::{CacheLookup, CacheStore, YearCache};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::edge::{EdgeCache, EdgeHit};
use crate::origin::ContributionSource;
use crate::retry::{base_delay_for, RetryEngine};

type SharedSync = Shared<BoxFuture<'static, SyncResult>>;

/// Retry-history key for a year.
pub fn operation_id(year: Year) -> String {
    format!("sync-{year}")
}

struct Fetched {
    calendar: ContributionCalendar,
    from_origin: bool,
}

struct FetchFailure {
    error: FetchError,
    retry_after: Option<u64>,
}

/// Coordinates the cache, the edge tier and the origin.
///
/// Cheap to clone; clones share the in-flight map and retry history.
///
/// # Example
///
/// ```ignore
/// let cache = YearCache::new(Arc::new(LmdbCacheStore::new(dir, 64)?));
/// let origin = Arc::new(HttpOrigin::new("https://api.example.com"));
/// let orchestrator = SyncOrchestrator::new(cache, origin, SyncConfig::from_env());
///
/// let result = orchestrator.sync_year(2024, SyncOptions::new()).await;
/// ```
pub struct SyncOrchestrator<S: CacheStore + 'static> {
    inner: Arc<Inner<S>>,
}

impl<S: CacheStore + 'static> Clone for SyncOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S: CacheStore + 'static> {
    cache: YearCache<S>,
    origin: Arc<dyn ContributionSource>,
    edge: Option<Arc<dyn EdgeCache>>,
    retry: RetryEngine,
    config: SyncConfig,
    in_flight: AsyncMutex<HashMap<Year, SharedSync>>,
    rate_limited: Mutex<HashSet<Year>>,
}

impl<S: CacheStore + 'static> SyncOrchestrator<S> {
    pub fn new(cache: YearCache<S>, origin: Arc<dyn ContributionSource>, config: SyncConfig) -> Self {
        Self::build(cache, origin, None, config)
    }

    /// Orchestrator that consults `edge` before the origin when
    /// `config.edge_enabled` is set.
    pub fn with_edge(
        cache: YearCache<S>,
        origin: Arc<dyn ContributionSource>,
        edge: Arc<dyn EdgeCache>,
        config: SyncConfig,
    ) -> Self {
        Self::build(cache, origin, Some(edge), config)
    }

    fn build(
        cache: YearCache<S>,
        origin: Arc<dyn ContributionSource>,
        edge: Option<Arc<dyn EdgeCache>>,
        config: SyncConfig,
    ) -> Self {
        let cache = cache.with_freshness(config.freshness);
        Self {
            inner: Arc::new(Inner {
                cache,
                origin,
                edge,
                retry: RetryEngine::with_window(config.recent_retry_window),
                config,
                in_flight: AsyncMutex::new(HashMap::new()),
                rate_limited: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn cache(&self) -> &YearCache<S> {
        &self.inner.cache
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn retry_engine(&self) -> &RetryEngine {
        &self.inner.retry
    }

    /// Years with a sync currently in flight.
    pub async fn in_flight_years(&self) -> Vec<Year> {
        let mut years: Vec<Year> = self.inner.in_flight.lock().await.keys().copied().collect();
        years.sort_unstable();
        years
    }

    /// Synchronize one year.
    ///
    /// Concurrent calls for the same year share one computation and receive
    /// equal results. The computation runs on its own task, so it completes
    /// even if every caller stops waiting. A background refresh started for
    /// an aging entry holds the same slot, so later callers join it.
    pub async fn sync_year(&self, year: Year, options: SyncOptions) -> SyncResult {
        let flight = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(&year) {
                Some(flight) => {
                    debug!(year, "Joining in-flight sync");
                    flight.clone()
                }
                None => {
                    let flight = self.start_flight(year, options);
                    in_flight.insert(year, flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    fn start_flight(&self, year: Year, options: SyncOptions) -> SharedSync {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let (result, aging) = inner.run(year, &options).await;
            let mut in_flight = inner.in_flight.lock().await;
            match aging {
                // The refresh task cannot clear its slot before this insert:
                // it needs the lock held here.
                Some(entry) => {
                    let refresh = inner.start_refresh(year, entry, options);
                    in_flight.insert(year, refresh);
                }
                None => {
                    in_flight.remove(&year);
                }
            }
            result
        });
        Arc::clone(&self.inner).share(year, task)
    }

    /// Synchronize several years, `batch_size` at a time.
    ///
    /// Results come back in the order of `years`.
    pub async fn sync_multiple_years(
        &self,
        years: &[Year],
        options: SyncOptions,
    ) -> Vec<(Year, SyncResult)> {
        let batch_size = self.inner.config.batch_size.max(1);
        let mut results = Vec::with_capacity(years.len());
        for chunk in years.chunks(batch_size) {
            debug!(years = ?chunk, "Syncing batch");
            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|&year| self.sync_year(year, options.clone())),
            )
            .await;
            results.extend(chunk.iter().copied().zip(outcomes));
        }
        results
    }

    /// Delete the given years, or everything when `years` is None.
    ///
    /// Returns the number of entries removed.
    pub async fn invalidate(&self, years: Option<&[Year]>) -> StreakResult<u64> {
        match years {
            Some(years) => {
                let mut removed = 0;
                for &year in years {
                    if self.inner.cache.delete(year).await? {
                        removed += 1;
                    }
                    self.inner.forget(year);
                }
                info!(removed, "Invalidated cached years");
                Ok(removed)
            }
            None => {
                if let Ok(mut rate_limited) = self.inner.rate_limited.lock() {
                    rate_limited.clear();
                }
                self.inner.retry.clear_all();
                let removed = self.inner.cache.delete_all().await?;
                info!(removed, "Invalidated entire cache");
                Ok(removed)
            }
        }
    }

    /// Freshness, last update and size of every valid cached year.
    pub async fn cache_status(&self) -> StreakResult<BTreeMap<Year, YearStatus>> {
        self.inner.cache.status().await
    }
}

impl<S: CacheStore + 'static> Inner<S> {
    /// Decide and execute one sync. The second value is an aging entry that
    /// was served and still needs a background refresh.
    async fn run(&self, year: Year, options: &SyncOptions) -> (SyncResult, Option<CacheEntry>) {
        let lookup = match self.cache.lookup(year).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(year, error = %e, "Cache read failed, treating as miss");
                CacheLookup::Missing
            }
        };
        let replaced_invalid = lookup.is_invalid();
        let existing = lookup.into_entry();

        if !options.force_refresh {
            if let Some(entry) = &existing {
                match self.cache.policy().classify(entry.last_updated) {
                    EntryAge::Fresh => {
                        debug!(year, "Serving fresh cache entry");
                        let result =
                            SyncResult::from_cache(entry.data.clone(), CacheStatus::Hit, true);
                        return (result, None);
                    }
                    EntryAge::Aging if options.allow_stale_data => {
                        debug!(year, "Serving aging cache entry, refreshing in background");
                        let result =
                            SyncResult::from_cache(entry.data.clone(), CacheStatus::Stale, false);
                        return (result, existing);
                    }
                    age => debug!(year, ?age, "Cache entry needs refresh"),
                }
            }
        }

        let result = self
            .fetch_and_store(year, options, existing, replaced_invalid)
            .await;
        info!(
            year,
            success = result.success,
            source = ?result.source,
            cache_status = ?result.cache_status,
            "Sync finished"
        );
        (result, None)
    }

    async fn fetch_and_store(
        &self,
        year: Year,
        options: &SyncOptions,
        existing: Option<CacheEntry>,
        replaced_invalid: bool,
    ) -> SyncResult {
        match self.fetch(year, options).await {
            Ok(fetched) => {
                let (data, source, status) = match &existing {
                    Some(entry) => (
                        merge(&entry.data, &fetched.calendar),
                        SyncSource::Merged,
                        CacheStatus::Hit,
                    ),
                    None if replaced_invalid => {
                        (fetched.calendar, SyncSource::Api, CacheStatus::Invalid)
                    }
                    None => (fetched.calendar, SyncSource::Api, CacheStatus::Miss),
                };

                if fetched.from_origin {
                    self.warm_edge(year, &data).await;
                }

                let result = SyncResult::fetched(data.clone(), source, status);
                match self.cache.set(year, data).await {
                    Ok(_) => result,
                    Err(e) => {
                        error!(year, error = %e, "Failed to persist calendar");
                        result.with_error(format!("failed to persist calendar: {e}"))
                    }
                }
            }
            Err(failure) => match existing {
                Some(entry) => {
                    warn!(
                        year,
                        error = %failure.error,
                        retry_after = ?failure.retry_after,
                        "Fetch failed, serving cached calendar"
                    );
                    SyncResult::degraded(entry.data, failure.error.to_string(), failure.retry_after)
                }
                None => {
                    warn!(year, error = %failure.error, "Fetch failed with nothing cached");
                    SyncResult::failed(failure.error.to_string(), failure.retry_after)
                }
            },
        }
    }

    async fn fetch(&self, year: Year, options: &SyncOptions) -> Result<Fetched, FetchFailure> {
        if !options.force_refresh {
            if let Some(hit) = self.edge_lookup(year).await {
                return Ok(Fetched {
                    calendar: hit.data,
                    from_origin: false,
                });
            }
        }

        let op_id = operation_id(year);
        let mut profile = self.profile_for(year);
        let mut limited = self.config.rate_limit_retry.clone();
        if let Some(max_retries) = options.max_retries {
            profile.max_retries = max_retries;
            limited.max_retries = max_retries;
        }
        if !self
            .retry
            .should_retry(&op_id, self.config.max_recent_attempts)
        {
            warn!(year, "Too many recent retries, making a single attempt");
            profile.max_retries = 0;
            limited.max_retries = 0;
        }
        let timeout = options.timeout.unwrap_or(self.config.fetch_timeout);

        let origin = Arc::clone(&self.origin);
        let outcome = self
            .retry
            .execute_with_escalation(
                move || {
                    let origin = Arc::clone(&origin);
                    async move { fetch_with_timeout(origin.as_ref(), year, timeout).await }
                },
                &profile,
                &limited,
                Some(&op_id),
            )
            .await;
        let attempts = outcome.attempt_count();
        let profile = if outcome.escalated { limited } else { profile };

        match outcome.outcome {
            Ok(calendar) => {
                self.mark_rate_limited(year, false);
                Ok(Fetched {
                    calendar,
                    from_origin: true,
                })
            }
            Err(error) => {
                self.mark_rate_limited(year, error.is_rate_limit());
                let retry_after = self.retry_after(&error, &profile, attempts);
                Err(FetchFailure { error, retry_after })
            }
        }
    }

    /// Starting profile: the rate-limit one if the previous failure for
    /// `year` was a rate limit.
    fn profile_for(&self, year: Year) -> RetryConfig {
        let limited = self
            .rate_limited
            .lock()
            .map(|set| set.contains(&year))
            .unwrap_or(false);
        if limited {
            debug!(year, "Using rate-limit retry profile");
            self.config.rate_limit_retry.clone()
        } else {
            self.config.retry.clone()
        }
    }

    fn mark_rate_limited(&self, year: Year, limited: bool) {
        if let Ok(mut set) = self.rate_limited.lock() {
            if limited {
                set.insert(year);
            } else {
                set.remove(&year);
            }
        }
    }

    fn forget(&self, year: Year) {
        self.mark_rate_limited(year, false);
        self.retry.clear_history(&operation_id(year));
    }

    /// Seconds the caller should wait: the origin's own signal when it sent
    /// one, otherwise the next step of the backoff schedule.
    fn retry_after(&self, error: &FetchError, profile: &RetryConfig, attempts: u32) -> Option<u64> {
        if let Some(at) = self.retry.next_retry_time(error) {
            let secs = (at - Utc::now()).num_seconds().max(0);
            return Some(secs as u64);
        }
        if self.retry.is_retryable_error(error) {
            let next = base_delay_for(profile, attempts.saturating_sub(1));
            return Some(next.as_secs_f64().ceil() as u64);
        }
        None
    }

    async fn edge_lookup(&self, year: Year) -> Option<EdgeHit> {
        if !self.config.edge_enabled {
            return None;
        }
        let edge = self.edge.as_ref()?;
        match edge.lookup(year).await {
            Ok(Some(hit)) if !hit.stale && validate_calendar(&hit.data).is_ok() => {
                debug!(year, age = ?hit.age, "Edge cache hit");
                Some(hit)
            }
            Ok(_) => None,
            Err(e) => {
                debug!(year, error = %e, "Edge lookup failed, ignoring");
                None
            }
        }
    }

    async fn warm_edge(&self, year: Year, data: &ContributionCalendar) {
        if !self.config.edge_enabled {
            return;
        }
        if let Some(edge) = &self.edge {
            if let Err(e) = edge.warm(year, data).await {
                debug!(year, error = %e, "Edge warm failed, ignoring");
            }
        }
    }

    /// Detached refresh for stale-while-revalidate. The returned flight
    /// takes over the year's in-flight slot and clears it when done.
    fn start_refresh(
        self: &Arc<Self>,
        year: Year,
        entry: CacheEntry,
        options: SyncOptions,
    ) -> SharedSync {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = inner.fetch_and_store(year, &options, Some(entry), false).await;
            if result.source == SyncSource::Cache || result.error.is_some() {
                error!(
                    year,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Background refresh failed"
                );
            } else {
                info!(year, "Background refresh stored new data");
            }
            inner.in_flight.lock().await.remove(&year);
            result
        });
        Arc::clone(self).share(year, task)
    }

    fn share(self: Arc<Self>, year: Year, task: JoinHandle<SyncResult>) -> SharedSync {
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(year, error = %e, "Sync task aborted");
                    self.in_flight.lock().await.remove(&year);
                    SyncResult::failed(format!("sync task aborted: {e}"), None)
                }
            }
        }
        .boxed()
        .shared()
    }
}

async fn fetch_with_timeout(
    origin: &dyn ContributionSource,
    year: Year,
    timeout: Duration,
) -> Result<ContributionCalendar, FetchError> {
    match tokio::time::timeout(timeout, origin.fetch_year(year)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};
    use streak_core::ContributionDay;
    use streak_storage::InMemoryCacheStore;

    struct ScriptedSource {
        calls: AtomicU32,
        response: Result<ContributionCalendar, FetchError>,
    }

    #[async_trait]
    impl ContributionSource for ScriptedSource {
        async fn fetch_year(&self, _year: Year) -> Result<ContributionCalendar, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    fn calendar(year: Year, count: u32) -> ContributionCalendar {
        let date = NaiveDate::from_ymd_opt(year, 5, 5).expect("valid date");
        ContributionCalendar::from_days(vec![ContributionDay::new(date, count)], vec![])
    }

    fn orchestrator(
        response: Result<ContributionCalendar, FetchError>,
    ) -> (SyncOrchestrator<InMemoryCacheStore>, Arc<ScriptedSource>) {
        let source = Arc::new(ScriptedSource {
            calls: AtomicU32::new(0),
            response,
        });
        let cache = YearCache::new(Arc::new(InMemoryCacheStore::new()));
        let config = SyncConfig::default()
            .with_retry(RetryConfig::default().with_jitter(0.0))
            .with_rate_limit_retry(RetryConfig::rate_limit().with_jitter(0.0));
        (SyncOrchestrator::new(cache, source.clone(), config), source)
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_entry_is_replaced_and_reported_invalid() {
        let (orchestrator, source) = orchestrator(Ok(calendar(2020, 4)));
        orchestrator
            .cache()
            .backend()
            .store_bytes(2020, b"garbage".to_vec())
            .expect("raw bytes");

        let result = orchestrator.sync_year(2020, SyncOptions::new()).await;
        assert!(result.success);
        assert_eq!(result.cache_status, CacheStatus::Invalid);
        assert_eq!(result.source, SyncSource::Api);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.cache().get(2020).await.expect("get").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_without_cache() {
        let (orchestrator, source) = orchestrator(Err(FetchError::Http {
            status: 401,
            message: "bad credentials".to_string(),
            retry_at: None,
        }));

        let result = orchestrator.sync_year(2021, SyncOptions::new()).await;
        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.cache_status, CacheStatus::Miss);
        assert_eq!(result.retry_after, None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.in_flight_years().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_escalates_and_is_remembered() {
        let (orchestrator, source) = orchestrator(Err(FetchError::RateLimited {
            message: "slow down".to_string(),
            retry_at: None,
        }));

        // One attempt under the default profile, then the rate-limit budget.
        let first = orchestrator.sync_year(2019, SyncOptions::new()).await;
        assert!(!first.success);
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
        let log = orchestrator
            .retry_engine()
            .history(&operation_id(2019))
            .expect("history");
        assert_eq!(log[1].delay, 12_500);

        // The next sync starts on the rate-limit profile.
        let second = orchestrator.sync_year(2019, SyncOptions::new()).await;
        assert!(!second.success);
        assert_eq!(source.calls.load(Ordering::SeqCst), 12);
        let log = orchestrator
            .retry_engine()
            .history(&operation_id(2019))
            .expect("history");
        assert_eq!(log[0].delay, 5_000);
        assert_eq!(second.retry_after, Some(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_all_forgets_retry_history() {
        let (orchestrator, _source) = orchestrator(Err(FetchError::Timeout { timeout_ms: 5 }));
        orchestrator
            .sync_year(2018, SyncOptions::new().with_max_retries(0))
            .await;
        assert_eq!(orchestrator.retry_engine().recent_failures(&operation_id(2018)), 1);

        orchestrator.invalidate(None).await.expect("invalidate");
        assert!(orchestrator
            .retry_engine()
            .history(&operation_id(2018))
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_merges_over_fresh_entry() {
        let (orchestrator, source) = orchestrator(Ok(calendar(2024, 9)));
        let mut base = calendar(2024, 1);
        let extra = NaiveDate::from_ymd_opt(2024, 2, 2).expect("valid date");
        base = merge(
            &base,
            &ContributionCalendar::from_days(vec![ContributionDay::new(extra, 3)], vec![]),
        );
        orchestrator.cache().set(2024, base).await.expect("seed");

        let result = orchestrator
            .sync_year(2024, SyncOptions::new().force_refresh())
            .await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.source, SyncSource::Merged);
        assert_eq!(result.cache_status, CacheStatus::Hit);
        let data = result.data.expect("data");
        assert_eq!(data.total_contributions, 12);
    }
}
