//! Cache entry persisted per year.

use serde::{Deserialize, Serialize};

use crate::calendar::ContributionCalendar;
use crate::error::IntegrityViolation;
use crate::integrity::{compute_checksum, is_complete, validate_calendar, verify_checksum};
use crate::{Timestamp, Year};

/// Schema version written into every entry. Entries carrying any other
/// version are treated as absent.
pub const CACHE_SCHEMA_VERSION: &str = "2.1.0";

/// One year's calendar plus the metadata needed to trust it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub year: Year,
    pub data: ContributionCalendar,
    pub timestamp: Timestamp,
    pub last_updated: Timestamp,
    pub version: String,
    pub checksum: String,
    pub is_complete: bool,
    pub retry_count: u32,
    pub next_retry_at: Option<Timestamp>,
}

impl CacheEntry {
    /// Build a fully stamped entry for `data` as of `now`.
    pub fn new(year: Year, data: ContributionCalendar, now: Timestamp) -> Self {
        let checksum = compute_checksum(&data);
        let is_complete = is_complete(year, &data);
        Self {
            year,
            data,
            timestamp: now,
            last_updated: now,
            version: CACHE_SCHEMA_VERSION.to_string(),
            checksum,
            is_complete,
            retry_count: 0,
            next_retry_at: None,
        }
    }

    /// Full integrity check: version, structure, checksum.
    pub fn validate(&self) -> Result<(), IntegrityViolation> {
        if self.version != CACHE_SCHEMA_VERSION {
            return Err(IntegrityViolation::VersionMismatch {
                stored: self.version.clone(),
                expected: CACHE_SCHEMA_VERSION.to_string(),
            });
        }
        validate_calendar(&self.data)?;
        verify_checksum(&self.data, &self.checksum)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}
