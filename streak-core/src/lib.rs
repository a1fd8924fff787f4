//! STREAK Core - Calendar Types, Integrity Model, Merge
//!
//! Pure data structures and pure functions. All other crates depend on this.
//! Nothing in this crate performs I/O.

use chrono::{DateTime, Utc};

pub mod calendar;
pub mod config;
pub mod entry;
pub mod error;
pub mod freshness;
pub mod integrity;
pub mod merge;
pub mod sync;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Cache key: a calendar year.
pub type Year = i32;

pub use calendar::{
    level_for_count, week_start, ContributionCalendar, ContributionDay, MonthSummary, Week,
    MAX_LEVEL,
};
pub use config::{RetryConfig, SyncConfig, DEFAULT_BATCH_SIZE, DEFAULT_FETCH_TIMEOUT};
pub use entry::{CacheEntry, CACHE_SCHEMA_VERSION};
pub use error::{
    mentions_rate_limit, ConfigError, ErrorClass, FetchError, IntegrityViolation, StorageError,
    StreakError, StreakResult, RETRYABLE_STATUSES,
};
pub use freshness::{EntryAge, FreshnessPolicy, FRESH_WINDOW, STALE_WINDOW};
pub use integrity::{
    compute_checksum, expected_days, is_complete, validate_calendar, verify_checksum,
    COMPLETENESS_THRESHOLD,
};
pub use merge::merge;
pub use sync::{CacheStatus, SyncOptions, SyncResult, SyncSource, YearStatus};
