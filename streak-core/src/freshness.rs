//! Freshness windows for cached calendars.
//!
//! `is_fresh` and `is_stale` are deliberately not complements. Between the
//! two windows lies an "aging" band where data may still be served while a
//! refresh runs in the background.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Entries younger than this are served without touching the network.
pub const FRESH_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Entries older than this are only used as a last-resort fallback.
pub const STALE_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Where an entry sits relative to the freshness windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryAge {
    Fresh,
    Aging,
    Stale,
}

/// Fresh/stale window pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub fresh_window: Duration,
    pub stale_window: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            fresh_window: FRESH_WINDOW,
            stale_window: STALE_WINDOW,
        }
    }
}

impl FreshnessPolicy {
    pub fn new(fresh_window: Duration, stale_window: Duration) -> Self {
        Self {
            fresh_window,
            stale_window,
        }
    }

    /// Age of `last_updated` as seen from `now`. Future timestamps count as zero.
    pub fn age(last_updated: Timestamp, now: Timestamp) -> Duration {
        now.signed_duration_since(last_updated)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// `now - last_updated < fresh_window`
    pub fn is_fresh_at(&self, last_updated: Timestamp, now: Timestamp) -> bool {
        Self::age(last_updated, now) < self.fresh_window
    }

    /// `now - last_updated > stale_window`
    pub fn is_stale_at(&self, last_updated: Timestamp, now: Timestamp) -> bool {
        Self::age(last_updated, now) > self.stale_window
    }

    pub fn is_fresh(&self, last_updated: Timestamp) -> bool {
        self.is_fresh_at(last_updated, Utc::now())
    }

    pub fn is_stale(&self, last_updated: Timestamp) -> bool {
        self.is_stale_at(last_updated, Utc::now())
    }

    pub fn classify_at(&self, last_updated: Timestamp, now: Timestamp) -> EntryAge {
        if self.is_fresh_at(last_updated, now) {
            EntryAge::Fresh
        } else if self.is_stale_at(last_updated, now) {
            EntryAge::Stale
        } else {
            EntryAge::Aging
        }
    }

    pub fn classify(&self, last_updated: Timestamp) -> EntryAge {
        self.classify_at(last_updated, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_just_written_is_fresh_not_stale() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        assert!(policy.is_fresh_at(now, now));
        assert!(!policy.is_stale_at(now, now));
        assert_eq!(policy.classify_at(now, now), EntryAge::Fresh);
    }

    #[test]
    fn test_twenty_five_hours_is_aging() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        let written = now - ChronoDuration::hours(25);
        assert!(!policy.is_fresh_at(written, now));
        assert!(!policy.is_stale_at(written, now));
        assert_eq!(policy.classify_at(written, now), EntryAge::Aging);
    }

    #[test]
    fn test_eight_days_is_stale() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        let written = now - ChronoDuration::days(8);
        assert!(policy.is_stale_at(written, now));
        assert_eq!(policy.classify_at(written, now), EntryAge::Stale);
    }

    #[test]
    fn test_window_edges() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        // exactly at the fresh window is no longer fresh
        assert!(!policy.is_fresh_at(now - ChronoDuration::hours(24), now));
        // exactly at the stale window is not yet stale
        assert!(!policy.is_stale_at(now - ChronoDuration::days(7), now));
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        let future = now + ChronoDuration::minutes(5);
        assert_eq!(FreshnessPolicy::age(future, now), Duration::ZERO);
        assert!(policy.is_fresh_at(future, now));
    }
}
