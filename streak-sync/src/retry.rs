//! Retry engine with exponential backoff and jitter.
//!
//! The engine wraps a fallible async operation and keeps retrying it while
//! the error is classified as retryable. Failures come back as values inside
//! [`RetryResult`] together with the full attempt log; nothing panics or
//! propagates past this boundary.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use streak_core::{FetchError, RetryConfig, Timestamp};
use tracing::{debug, warn};

/// Default window inspected by [`RetryEngine::should_retry`].
pub const RECENT_RETRY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Errors the engine knows how to classify.
pub trait Retryable {
    /// Whether another attempt could succeed.
    fn is_retryable(&self) -> bool;

    /// Instant the remote side asked us to wait until, if any.
    fn retry_at(&self) -> Option<Timestamp> {
        None
    }

    /// Whether the remote side is throttling us.
    fn is_rate_limit(&self) -> bool {
        false
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        FetchError::is_retryable(self)
    }

    fn retry_at(&self) -> Option<Timestamp> {
        FetchError::retry_at(self)
    }

    fn is_rate_limit(&self) -> bool {
        FetchError::is_rate_limit(self)
    }
}

/// One entry of the attempt log. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Delay slept after this attempt, in milliseconds. Zero for the last one.
    pub delay: u64,
    pub timestamp: Timestamp,
    pub error: Option<String>,
}

/// Outcome of [`RetryEngine::execute_with_retry`].
#[derive(Debug)]
pub struct RetryResult<T, E = FetchError> {
    pub outcome: Result<T, E>,
    pub attempts: Vec<RetryAttempt>,
    pub total_delay: Duration,
    /// The run switched to the rate-limit profile after a throttled attempt.
    pub escalated: bool,
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Number of times the operation actually ran.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Un-jittered delay before retry number `attempt` (zero based).
///
/// `min(base_delay * backoff_multiplier^attempt, max_delay)`.
pub fn base_delay_for(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = config.base_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let capped = raw.min(config.max_delay.as_secs_f64());
    if capped.is_finite() && capped > 0.0 {
        Duration::from_secs_f64(capped)
    } else if capped.is_finite() {
        Duration::ZERO
    } else {
        config.max_delay
    }
}

/// Delay for `attempt` with jitter applied from `sample` in `[-0.5, 0.5)`.
///
/// `delay + delay * jitter_factor * sample`, never negative.
pub fn compute_delay(config: &RetryConfig, attempt: u32, sample: f64) -> Duration {
    let base = base_delay_for(config, attempt).as_secs_f64();
    let jittered = base + base * config.jitter_factor * sample;
    if jittered.is_finite() && jittered > 0.0 {
        Duration::from_secs_f64(jittered)
    } else {
        Duration::ZERO
    }
}

/// [`compute_delay`] with a fresh random sample.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    if config.jitter_factor == 0.0 {
        return base_delay_for(config, attempt);
    }
    let sample: f64 = rand::rng().random_range(-0.5..0.5);
    compute_delay(config, attempt, sample)
}

/// Backoff executor with per-operation attempt history.
pub struct RetryEngine {
    history: Mutex<HashMap<String, Vec<RetryAttempt>>>,
    recent_window: Duration,
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryEngine {
    pub fn new() -> Self {
        Self::with_window(RECENT_RETRY_WINDOW)
    }

    pub fn with_window(recent_window: Duration) -> Self {
        Self {
            history: Mutex::new(HashMap::new()),
            recent_window,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or
    /// `config.max_retries` retries are used up.
    ///
    /// When `operation_id` is given the attempt log is kept for
    /// [`should_retry`](Self::should_retry).
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        config: &RetryConfig,
        operation_id: Option<&str>,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        self.execute(operation, config, None, operation_id).await
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), but the first
    /// rate-limited failure switches the rest of the run to `rate_limit`:
    /// its delays and its `max_retries` budget, counted from the start.
    pub async fn execute_with_escalation<T, E, F, Fut>(
        &self,
        operation: F,
        config: &RetryConfig,
        rate_limit: &RetryConfig,
        operation_id: Option<&str>,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        self.execute(operation, config, Some(rate_limit), operation_id).await
    }

    async fn execute<T, E, F, Fut>(
        &self,
        mut operation: F,
        config: &RetryConfig,
        rate_limit: Option<&RetryConfig>,
        operation_id: Option<&str>,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let mut attempts = Vec::new();
        let mut total_delay = Duration::ZERO;
        let mut attempt = 0u32;
        let mut config = config;
        let mut escalated = false;

        let outcome = loop {
            match operation().await {
                Ok(value) => {
                    attempts.push(RetryAttempt {
                        attempt,
                        delay: 0,
                        timestamp: Utc::now(),
                        error: None,
                    });
                    break Ok(value);
                }
                Err(error) => {
                    let message = error.to_string();
                    if let Some(limited) =
                        rate_limit.filter(|_| !escalated && error.is_rate_limit())
                    {
                        debug!(attempt, "Rate limited, switching to rate-limit profile");
                        config = limited;
                        escalated = true;
                    }
                    if !error.is_retryable() || attempt >= config.max_retries {
                        if !error.is_retryable() {
                            debug!(attempt, error = %message, "Permanent failure, not retrying");
                        }
                        attempts.push(RetryAttempt {
                            attempt,
                            delay: 0,
                            timestamp: Utc::now(),
                            error: Some(message),
                        });
                        break Err(error);
                    }

                    let delay = backoff_delay(config, attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        operation = operation_id.unwrap_or("anonymous"),
                        error = %message,
                        "Retrying after failure"
                    );
                    attempts.push(RetryAttempt {
                        attempt,
                        delay: delay.as_millis() as u64,
                        timestamp: Utc::now(),
                        error: Some(message),
                    });
                    tokio::time::sleep(delay).await;
                    total_delay += delay;
                    attempt += 1;
                }
            }
        };

        if let Some(id) = operation_id {
            self.record(id, attempts.clone());
        }

        RetryResult {
            outcome,
            attempts,
            total_delay,
            escalated,
        }
    }

    /// Whether `error` is worth another attempt.
    pub fn is_retryable_error<E: Retryable>(&self, error: &E) -> bool {
        error.is_retryable()
    }

    /// Instant carried by a `Retry-After` / `X-RateLimit-Reset` signal.
    pub fn next_retry_time<E: Retryable>(&self, error: &E) -> Option<Timestamp> {
        error.retry_at()
    }

    /// False once `operation_id` has logged `max_recent_attempts` failed
    /// attempts inside the recent window.
    pub fn should_retry(&self, operation_id: &str, max_recent_attempts: usize) -> bool {
        self.recent_failures(operation_id) < max_recent_attempts
    }

    /// Failed attempts logged for `operation_id` inside the recent window.
    pub fn recent_failures(&self, operation_id: &str) -> usize {
        let Ok(history) = self.history.lock() else {
            return 0;
        };
        let cutoff = self.cutoff();
        history
            .get(operation_id)
            .map(|log| {
                log.iter()
                    .filter(|a| a.error.is_some() && a.timestamp >= cutoff)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Most recent attempt log for `operation_id`.
    pub fn history(&self, operation_id: &str) -> Option<Vec<RetryAttempt>> {
        self.history.lock().ok()?.get(operation_id).cloned()
    }

    pub fn clear_history(&self, operation_id: &str) {
        if let Ok(mut history) = self.history.lock() {
            history.remove(operation_id);
        }
    }

    /// Forget every operation's attempt log.
    pub fn clear_all(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }

    fn cutoff(&self) -> Timestamp {
        let window = chrono::Duration::from_std(self.recent_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        Utc::now() - window
    }

    fn record(&self, operation_id: &str, attempts: Vec<RetryAttempt>) {
        let cutoff = self.cutoff();
        if let Ok(mut history) = self.history.lock() {
            history.retain(|_, log| log.last().is_some_and(|a| a.timestamp >= cutoff));
            history.insert(operation_id.to_string(), attempts);
        }
    }
}

impl fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self.history.lock().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("RetryEngine")
            .field("recent_window", &self.recent_window)
            .field("tracked_operations", &tracked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(max_retries)
            .with_jitter(0.0)
    }

    fn unavailable() -> FetchError {
        FetchError::Http {
            status: 503,
            message: "unavailable".to_string(),
            retry_at: None,
        }
    }

    #[test]
    fn test_default_schedule_without_jitter() {
        let config = RetryConfig::default().with_jitter(0.0);
        let delays: Vec<u64> = (0..6)
            .map(|n| compute_delay(&config, n, 0.3).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000]);
    }

    #[test]
    fn test_rate_limit_schedule_caps_at_five_minutes() {
        let config = RetryConfig::rate_limit();
        assert_eq!(base_delay_for(&config, 0), Duration::from_secs(5));
        assert_eq!(base_delay_for(&config, 1), Duration::from_millis(12_500));
        assert_eq!(base_delay_for(&config, 10), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_is_symmetric_and_bounded() {
        let config = RetryConfig::default();
        let low = compute_delay(&config, 0, -0.5).as_secs_f64();
        let high = compute_delay(&config, 0, 0.5).as_secs_f64();
        assert!((low - 0.95).abs() < 1e-6);
        assert!((high - 1.05).abs() < 1e-6);

        for _ in 0..100 {
            let d = backoff_delay(&config, 2).as_millis();
            assert!((3_799..=4_200).contains(&d), "delay {d} out of band");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let engine = RetryEngine::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = engine
            .execute_with_retry(
                || {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(unavailable())
                        } else {
                            Ok(42)
                        }
                    }
                },
                &fast(3),
                Some("op"),
            )
            .await;

        assert_eq!(result.outcome, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.attempt_count(), 3);
        assert_eq!(result.total_delay, Duration::from_secs(3));
        assert!(result.attempts[2].error.is_none());
        assert_eq!(engine.recent_failures("op"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_runs_max_retries_plus_one() {
        let engine = RetryEngine::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: RetryResult<(), FetchError> = engine
            .execute_with_retry(
                || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(FetchError::Timeout { timeout_ms: 10 })
                    }
                },
                &fast(3),
                None,
            )
            .await;

        assert!(!result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let delays: Vec<u64> = result.attempts.iter().map(|a| a.delay).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_consumes_no_retries() {
        let engine = RetryEngine::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: RetryResult<(), FetchError> = engine
            .execute_with_retry(
                || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(FetchError::Http {
                            status: 404,
                            message: "not found".to_string(),
                            retry_at: None,
                        })
                    }
                },
                &fast(5),
                None,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.total_delay, Duration::ZERO);
        assert!(matches!(result.outcome, Err(FetchError::Http { status: 404, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_tracks_recent_failures() {
        let engine = RetryEngine::new();
        assert!(engine.should_retry("sync-2024", 3));

        let _: RetryResult<(), FetchError> = engine
            .execute_with_retry(|| async { Err(unavailable()) }, &fast(2), Some("sync-2024"))
            .await;

        assert_eq!(engine.recent_failures("sync-2024"), 3);
        assert!(!engine.should_retry("sync-2024", 3));
        assert!(engine.should_retry("sync-2024", 4));
        assert!(engine.should_retry("sync-2023", 1));

        engine.clear_history("sync-2024");
        assert!(engine.history("sync-2024").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_escalates_mid_run() {
        let engine = RetryEngine::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let limited = RetryConfig::rate_limit().with_jitter(0.0);

        let result: RetryResult<(), FetchError> = engine
            .execute_with_escalation(
                || {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(unavailable())
                        } else {
                            Err(FetchError::RateLimited {
                                message: "slow down".to_string(),
                                retry_at: None,
                            })
                        }
                    }
                },
                &fast(3),
                &limited,
                Some("sync-2022"),
            )
            .await;

        assert!(result.escalated);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        let delays: Vec<u64> = result.attempts.iter().map(|a| a.delay).collect();
        assert_eq!(delays, vec![1_000, 12_500, 31_250, 78_125, 195_312, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_retry_never_escalates() {
        let engine = RetryEngine::new();
        let result: RetryResult<(), FetchError> = engine
            .execute_with_retry(
                || async {
                    Err(FetchError::RateLimited {
                        message: "slow down".to_string(),
                        retry_at: None,
                    })
                },
                &fast(1),
                Some("a"),
            )
            .await;
        assert!(!result.escalated);
        assert_eq!(result.attempt_count(), 2);

        engine
            .execute_with_retry(|| async { Err::<(), _>(unavailable()) }, &fast(0), Some("b"))
            .await;
        engine.clear_all();
        assert!(engine.history("a").is_none());
        assert!(engine.history("b").is_none());
    }

    #[test]
    fn test_next_retry_time_reads_error_signal() {
        let engine = RetryEngine::new();
        let at = Utc::now() + chrono::Duration::seconds(30);
        let limited = FetchError::RateLimited {
            message: "slow down".to_string(),
            retry_at: Some(at),
        };
        assert_eq!(engine.next_retry_time(&limited), Some(at));
        assert!(engine.is_retryable_error(&limited));
        assert_eq!(engine.next_retry_time(&unavailable()), None);
    }
}
