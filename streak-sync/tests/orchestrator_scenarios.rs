//! End-to-end orchestrator scenarios against scripted collaborators.
//!
//! All tests run on a paused clock, so backoff sleeps and origin latency
//! cost no wall time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as Age;
use streak_core::{CacheStatus, SyncOptions, SyncSource};
use streak_storage::{CacheStore, InMemoryCacheStore, YearCache};
use streak_sync::{operation_id, SyncOrchestrator};
use streak_test_utils::assertions::{assert_cache_hit, assert_degraded, assert_fetched};
use streak_test_utils::fixtures::{
    calendar_for_year, calendar_with_total, deterministic_config, rate_limited, seed,
    server_error, sparse_calendar,
};
use streak_test_utils::{MockEdgeCache, MockOrigin};
use tokio::time::Instant;

fn setup(origin: MockOrigin) -> (SyncOrchestrator<InMemoryCacheStore>, Arc<MockOrigin>) {
    let origin = Arc::new(origin);
    let cache = YearCache::new(Arc::new(InMemoryCacheStore::new()));
    let orchestrator = SyncOrchestrator::new(cache, origin.clone(), deterministic_config());
    (orchestrator, origin)
}

fn setup_with_edge(
    origin: MockOrigin,
) -> (
    SyncOrchestrator<InMemoryCacheStore>,
    Arc<MockOrigin>,
    Arc<MockEdgeCache>,
) {
    let origin = Arc::new(origin);
    let edge = Arc::new(MockEdgeCache::new());
    let cache = YearCache::new(Arc::new(InMemoryCacheStore::new()));
    let orchestrator = SyncOrchestrator::with_edge(
        cache,
        origin.clone(),
        edge.clone(),
        deterministic_config().with_edge(true),
    );
    (orchestrator, origin, edge)
}

/// Give detached tasks a chance to finish.
async fn settle() {
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn cold_fetch_populates_cache() {
    let (orchestrator, origin) =
        setup(MockOrigin::new().with_calendar(2024, calendar_with_total(2024, 500)));

    let result = orchestrator.sync_year(2024, SyncOptions::new()).await;

    assert_fetched(&result, SyncSource::Api, CacheStatus::Miss);
    assert_eq!(result.data.as_ref().map(|d| d.total_contributions), Some(500));
    assert_eq!(origin.call_count(), 1);

    let entry = orchestrator
        .cache()
        .get(2024)
        .await
        .expect("get")
        .expect("entry written");
    assert!(entry.is_complete);
    assert_eq!(entry.data.day_count(), 366);
    assert_eq!(entry.data.total_contributions, 500);
}

#[tokio::test(start_paused = true)]
async fn fresh_hit_skips_origin() {
    let (orchestrator, origin) = setup(MockOrigin::new());
    let cached = seed(orchestrator.cache(), 2023, calendar_for_year(2023), Age::hours(1)).await;

    let result = orchestrator.sync_year(2023, SyncOptions::new()).await;

    assert_cache_hit(&result);
    assert_eq!(result.data, Some(cached.data));
    assert_eq!(origin.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn degraded_fallback_after_rate_limit() {
    let origin = MockOrigin::new();
    origin.fail_always(rate_limited());
    let (orchestrator, origin) = setup(origin);
    let cached = seed(orchestrator.cache(), 2022, calendar_for_year(2022), Age::days(10)).await;

    let result = orchestrator.sync_year(2022, SyncOptions::new()).await;

    assert_degraded(&result);
    assert_eq!(result.data, Some(cached.data));
    assert!(result.retry_after.is_some());
    assert_eq!(origin.call_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_sync_backs_off_on_rate_limit_schedule() {
    let origin = MockOrigin::new();
    origin.fail_always(rate_limited());
    let (orchestrator, origin) = setup(origin);

    let started = Instant::now();
    let result = orchestrator.sync_year(2022, SyncOptions::new()).await;

    assert!(!result.success);
    assert_eq!(origin.call_count(), 6);
    let delays: Vec<u64> = orchestrator
        .retry_engine()
        .history(&operation_id(2022))
        .expect("attempt log")
        .iter()
        .map(|a| a.delay)
        .collect();
    assert_eq!(delays, vec![5_000, 12_500, 31_250, 78_125, 195_312, 0]);
    assert!(started.elapsed() >= Duration::from_millis(322_187));
    assert_eq!(result.retry_after, Some(300));
}

#[tokio::test(start_paused = true)]
async fn failure_without_cache_reports_miss() {
    let origin = MockOrigin::new();
    origin.fail_always(server_error(503));
    let (orchestrator, _origin) = setup(origin);

    let result = orchestrator
        .sync_year(2020, SyncOptions::new().with_max_retries(1))
        .await;

    assert!(!result.success);
    assert!(result.data.is_none());
    assert_eq!(result.cache_status, CacheStatus::Miss);
    assert_eq!(result.retry_after, Some(2));
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_share_one_fetch() {
    let (orchestrator, origin) =
        setup(MockOrigin::new().with_latency(Duration::from_millis(200)));

    let (a, b) = tokio::join!(
        orchestrator.sync_year(2024, SyncOptions::new()),
        orchestrator.sync_year(2024, SyncOptions::new()),
    );

    assert_eq!(origin.call_count(), 1);
    assert_eq!(a, b);
    assert!(a.success);
    assert!(orchestrator.in_flight_years().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn batch_sync_bounds_concurrency() {
    let (orchestrator, origin) =
        setup(MockOrigin::new().with_latency(Duration::from_millis(50)));
    let years: Vec<i32> = (2018..=2024).collect();

    let results = orchestrator
        .sync_multiple_years(&years, SyncOptions::new())
        .await;

    assert_eq!(results.len(), 7);
    assert!(results.iter().all(|(_, r)| r.success));
    assert_eq!(
        results.iter().map(|(y, _)| *y).collect::<Vec<_>>(),
        years
    );
    assert_eq!(origin.call_count(), 7);
    assert!(origin.max_concurrency() <= 3);
    assert_eq!(origin.max_concurrency(), 3);
}

#[tokio::test(start_paused = true)]
async fn aging_entry_served_while_refreshing() {
    let (orchestrator, origin) = setup(MockOrigin::new());
    let cached = seed(
        orchestrator.cache(),
        2021,
        sparse_calendar(2021, &[(3, 1, 2)]),
        Age::hours(30),
    )
    .await;

    let result = orchestrator
        .sync_year(2021, SyncOptions::new().allow_stale())
        .await;

    assert!(result.success);
    assert_eq!(result.source, SyncSource::Cache);
    assert_eq!(result.cache_status, CacheStatus::Stale);
    assert!(!result.is_fresh);
    assert_eq!(result.data, Some(cached.data));

    settle().await;

    assert_eq!(origin.calls_for(2021), 1);
    let refreshed = orchestrator
        .cache()
        .get(2021)
        .await
        .expect("get")
        .expect("entry");
    assert!(orchestrator.cache().is_fresh(&refreshed));
    assert_eq!(refreshed.data, calendar_for_year(2021));
}

#[tokio::test(start_paused = true)]
async fn callers_join_running_background_refresh() {
    let (orchestrator, origin) =
        setup(MockOrigin::new().with_latency(Duration::from_millis(500)));
    seed(
        orchestrator.cache(),
        2021,
        sparse_calendar(2021, &[(3, 1, 2)]),
        Age::hours(30),
    )
    .await;

    let served = orchestrator
        .sync_year(2021, SyncOptions::new().allow_stale())
        .await;
    assert_eq!(served.cache_status, CacheStatus::Stale);
    assert_eq!(orchestrator.in_flight_years().await, vec![2021]);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let (plain, forced) = tokio::join!(
        orchestrator.sync_year(2021, SyncOptions::new()),
        orchestrator.sync_year(2021, SyncOptions::new().force_refresh()),
    );

    assert_eq!(origin.call_count(), 1);
    assert_eq!(origin.max_concurrency(), 1);
    assert_fetched(&plain, SyncSource::Merged, CacheStatus::Hit);
    assert_eq!(plain, forced);
    assert!(orchestrator.in_flight_years().await.is_empty());

    let after = orchestrator.sync_year(2021, SyncOptions::new()).await;
    assert_cache_hit(&after);
    assert_eq!(origin.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_background_refresh_keeps_entry() {
    let origin = MockOrigin::new();
    origin.fail_always(server_error(500));
    let (orchestrator, origin) = setup(origin);
    let cached = seed(orchestrator.cache(), 2021, calendar_for_year(2021), Age::hours(30)).await;

    let result = orchestrator
        .sync_year(2021, SyncOptions::new().allow_stale().with_max_retries(0))
        .await;
    assert!(result.success);
    assert!(result.error.is_none());

    settle().await;

    assert_eq!(origin.calls_for(2021), 1);
    let entry = orchestrator.cache().get(2021).await.expect("get").expect("entry");
    assert_eq!(entry.last_updated, cached.last_updated);
}

#[tokio::test(start_paused = true)]
async fn aging_entry_without_allow_stale_merges() {
    let (orchestrator, origin) = setup(
        MockOrigin::new().with_calendar(2019, sparse_calendar(2019, &[(6, 1, 5), (6, 2, 7)])),
    );
    seed(
        orchestrator.cache(),
        2019,
        sparse_calendar(2019, &[(1, 1, 3), (6, 1, 1)]),
        Age::hours(30),
    )
    .await;

    let result = orchestrator.sync_year(2019, SyncOptions::new()).await;

    assert_fetched(&result, SyncSource::Merged, CacheStatus::Hit);
    assert_eq!(origin.call_count(), 1);
    let data = result.data.expect("data");
    assert_eq!(data.day_count(), 3);
    assert_eq!(data.total_contributions, 3 + 5 + 7);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_never_served_directly() {
    let (orchestrator, origin) = setup(MockOrigin::new());
    seed(orchestrator.cache(), 2018, calendar_for_year(2018), Age::days(8)).await;

    let result = orchestrator
        .sync_year(2018, SyncOptions::new().allow_stale())
        .await;

    assert_fetched(&result, SyncSource::Merged, CacheStatus::Hit);
    assert_eq!(origin.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_origin_times_out_as_retryable() {
    let (orchestrator, origin) =
        setup(MockOrigin::new().with_latency(Duration::from_secs(30)));

    let result = orchestrator
        .sync_year(
            2017,
            SyncOptions::new()
                .with_timeout(Duration::from_secs(1))
                .with_max_retries(1),
        )
        .await;

    assert!(!result.success);
    assert_eq!(origin.call_count(), 2);
    assert!(result
        .error
        .as_deref()
        .is_some_and(|e| e.contains("timed out")));
}

#[tokio::test(start_paused = true)]
async fn tampered_entry_is_refetched() {
    let (orchestrator, origin) = setup(MockOrigin::new());
    let mut entry = seed(orchestrator.cache(), 2016, calendar_for_year(2016), Age::hours(1)).await;
    entry.data.weeks[3].contribution_days[0].count += 1;
    orchestrator
        .cache()
        .backend()
        .store(&entry)
        .await
        .expect("raw store");

    let result = orchestrator.sync_year(2016, SyncOptions::new()).await;

    assert_fetched(&result, SyncSource::Api, CacheStatus::Invalid);
    assert_eq!(origin.call_count(), 1);
    assert_eq!(result.data, Some(calendar_for_year(2016)));
}

#[tokio::test(start_paused = true)]
async fn edge_hit_short_circuits_origin() {
    let (orchestrator, origin, edge) = setup_with_edge(MockOrigin::new());
    edge.insert(2024, calendar_with_total(2024, 42), false);

    let result = orchestrator.sync_year(2024, SyncOptions::new()).await;

    assert_fetched(&result, SyncSource::Api, CacheStatus::Miss);
    assert_eq!(origin.call_count(), 0);
    assert_eq!(result.data.map(|d| d.total_contributions), Some(42));
    assert!(orchestrator.cache().get(2024).await.expect("get").is_some());
    assert!(edge.warmed_years().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_or_failing_edge_falls_through_and_is_warmed() {
    let (orchestrator, origin, edge) = setup_with_edge(MockOrigin::new());
    edge.insert(2023, calendar_with_total(2023, 1), true);

    let result = orchestrator.sync_year(2023, SyncOptions::new()).await;
    assert!(result.success);
    assert_eq!(origin.call_count(), 1);
    assert_eq!(edge.warmed_years(), vec![2023]);

    edge.set_failing(true);
    let result = orchestrator.sync_year(2022, SyncOptions::new()).await;
    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(origin.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn force_refresh_skips_edge() {
    let (orchestrator, origin, edge) = setup_with_edge(MockOrigin::new());
    edge.insert(2024, calendar_with_total(2024, 42), false);

    let result = orchestrator
        .sync_year(2024, SyncOptions::new().force_refresh())
        .await;

    assert!(result.success);
    assert_eq!(edge.lookup_count(), 0);
    assert_eq!(origin.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalidate_and_status() {
    let (orchestrator, _origin) = setup(MockOrigin::new());
    orchestrator
        .sync_multiple_years(&[2020, 2021, 2022], SyncOptions::new())
        .await;

    let status = orchestrator.cache_status().await.expect("status");
    assert_eq!(status.keys().copied().collect::<Vec<_>>(), vec![2020, 2021, 2022]);
    assert!(status.values().all(|s| s.is_fresh && s.size_bytes > 0));

    assert_eq!(orchestrator.invalidate(Some(&[2021, 1999][..])).await.expect("invalidate"), 1);
    assert_eq!(
        orchestrator.cache().list_years().await.expect("list"),
        vec![2020, 2022]
    );

    assert_eq!(orchestrator.invalidate(None).await.expect("invalidate all"), 2);
    assert!(orchestrator.cache_status().await.expect("status").is_empty());
}
