//! Configuration types
//!
//! Defaults match the production profiles. `SyncConfig::from_env` lets an
//! operator override any of them through `STREAK_*` variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::freshness::FreshnessPolicy;

/// Number of years synchronized concurrently by a batch.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Hard per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Exponential backoff profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay (before jitter)
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Symmetric jitter band as a fraction of the delay, 0.0 disables it
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    /// 3 retries, 1s base, 30s cap, x2, 10% jitter.
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Profile used once the origin has signalled rate limiting:
    /// 5 retries, 5s base, 5 min cap, x2.5, 20% jitter.
    pub fn rate_limit() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.5,
            jitter_factor: 0.2,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(invalid(
                "retry.backoff_multiplier",
                self.backoff_multiplier,
                "must be >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(invalid(
                "retry.jitter_factor",
                self.jitter_factor,
                "must be within 0.0..=1.0",
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(invalid(
                "retry.max_delay",
                format!("{:?}", self.max_delay),
                "must be >= base_delay",
            ));
        }
        Ok(())
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub freshness: FreshnessPolicy,
    pub fetch_timeout: Duration,
    pub batch_size: usize,
    pub retry: RetryConfig,
    pub rate_limit_retry: RetryConfig,
    /// Window used by the recent-retry courtesy check.
    pub recent_retry_window: Duration,
    /// Retries allowed inside `recent_retry_window` before further retries are suppressed.
    pub max_recent_attempts: usize,
    pub edge_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            freshness: FreshnessPolicy::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryConfig::default(),
            rate_limit_retry: RetryConfig::rate_limit(),
            recent_retry_window: Duration::from_secs(5 * 60),
            max_recent_attempts: 10,
            edge_enabled: false,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from defaults overridden by environment variables.
    ///
    /// Environment variables:
    /// - `STREAK_FRESH_WINDOW_SECS` (default: 86400)
    /// - `STREAK_STALE_WINDOW_SECS` (default: 604800)
    /// - `STREAK_FETCH_TIMEOUT_MS` (default: 10000)
    /// - `STREAK_BATCH_SIZE` (default: 3)
    /// - `STREAK_MAX_RETRIES` (default: 3)
    /// - `STREAK_MAX_RECENT_ATTEMPTS` (default: 10)
    /// - `STREAK_EDGE_ENABLED`: "true" or "1" (default: false)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("STREAK_FRESH_WINDOW_SECS") {
            config.freshness.fresh_window = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("STREAK_STALE_WINDOW_SECS") {
            config.freshness.stale_window = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("STREAK_FETCH_TIMEOUT_MS") {
            config.fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = env_parse::<usize>("STREAK_BATCH_SIZE") {
            config.batch_size = size;
        }
        if let Some(retries) = env_parse::<u32>("STREAK_MAX_RETRIES") {
            config.retry.max_retries = retries;
        }
        if let Some(max) = env_parse::<usize>("STREAK_MAX_RECENT_ATTEMPTS") {
            config.max_recent_attempts = max;
        }
        config.edge_enabled = std::env::var("STREAK_EDGE_ENABLED")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(config.edge_enabled);

        config
    }

    pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit_retry(mut self, retry: RetryConfig) -> Self {
        self.rate_limit_retry = retry;
        self
    }

    pub fn with_max_recent_attempts(mut self, max: usize) -> Self {
        self.max_recent_attempts = max;
        self
    }

    pub fn with_edge(mut self, enabled: bool) -> Self {
        self.edge_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.freshness.stale_window < self.freshness.fresh_window {
            return Err(invalid(
                "freshness.stale_window",
                format!("{:?}", self.freshness.stale_window),
                "must be >= fresh_window",
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(invalid("fetch_timeout", "0", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", 0, "must be > 0"));
        }
        self.retry.validate()?;
        self.rate_limit_retry.validate()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse::<T>().ok())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
