//! Error types for STREAK operations

use crate::Timestamp;
use thiserror::Error;

/// HTTP-style statuses that are worth another attempt.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Integrity failures of a stored entry.
///
/// These never reach a caller of the sync layer; the store downgrades them
/// to a cache miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityViolation {
    #[error("Checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch { stored: String, computed: String },

    #[error("Schema version mismatch: stored {stored}, expected {expected}")]
    VersionMismatch { stored: String, expected: String },

    #[error("Malformed calendar: {reason}")]
    MalformedCalendar { reason: String },

    #[error("Entry for year {stored} stored under key {requested}")]
    YearMismatch { stored: i32, requested: i32 },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open cache store: {reason}")]
    Open { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// How a fetch failure should be handled by the retry layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 429 or a rate-limit message; retried under the rate-limit profile.
    RateLimit,
    /// Timeouts, connection failures and retryable 5xx statuses.
    Transient,
    /// Anything else; fails without consuming a retry.
    Permanent,
}

/// Failures talking to the origin (or the edge tier).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Origin responded with status {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_at: Option<Timestamp>,
    },

    #[error("Rate limited by origin: {message}")]
    RateLimited {
        message: String,
        retry_at: Option<Timestamp>,
    },

    #[error("Invalid response from origin: {reason}")]
    InvalidResponse { reason: String },

    #[error("Origin reported failure: {message}")]
    Upstream { message: String },
}

impl FetchError {
    /// Classify this error for retry purposes.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => ErrorClass::Transient,
            Self::RateLimited { .. } => ErrorClass::RateLimit,
            Self::Http { status: 429, .. } => ErrorClass::RateLimit,
            Self::Http { status, message, .. } => {
                if mentions_rate_limit(message) {
                    ErrorClass::RateLimit
                } else if RETRYABLE_STATUSES.contains(status) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            Self::InvalidResponse { reason: message } | Self::Upstream { message } => {
                if mentions_rate_limit(message) {
                    ErrorClass::RateLimit
                } else {
                    ErrorClass::Permanent
                }
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Permanent
    }

    pub fn is_rate_limit(&self) -> bool {
        self.class() == ErrorClass::RateLimit
    }

    /// The instant the origin asked us to wait until, if it said so.
    pub fn retry_at(&self) -> Option<Timestamp> {
        match self {
            Self::Http { retry_at, .. } | Self::RateLimited { retry_at, .. } => *retry_at,
            _ => None,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// Returns true if a message carries a rate-limit marker.
pub fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate-limit")
        || lower.contains("ratelimit")
        || lower.contains("too many requests")
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all STREAK errors.
#[derive(Debug, Clone, Error)]
pub enum StreakError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityViolation),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for STREAK operations.
pub type StreakResult<T> = Result<T, StreakError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, message: &str) -> FetchError {
        FetchError::Http {
            status,
            message: message.to_string(),
            retry_at: None,
        }
    }

    #[test]
    fn test_retryable_statuses_are_transient() {
        for status in [408, 500, 502, 503, 504] {
            assert_eq!(http(status, "boom").class(), ErrorClass::Transient);
        }
        assert_eq!(http(429, "slow down").class(), ErrorClass::RateLimit);
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 422] {
            assert!(!http(status, "nope").is_retryable());
        }
    }

    #[test]
    fn test_rate_limit_marker_in_message() {
        assert!(http(403, "API rate limit exceeded for user").is_rate_limit());
        let upstream = FetchError::Upstream {
            message: "secondary rate limit".to_string(),
        };
        assert!(upstream.is_retryable());
        let plain = FetchError::Upstream {
            message: "user not found".to_string(),
        };
        assert!(!plain.is_retryable());
    }

    #[test]
    fn test_network_and_timeout_are_transient() {
        assert_eq!(
            FetchError::Timeout { timeout_ms: 10 }.class(),
            ErrorClass::Transient
        );
        assert_eq!(
            FetchError::Network {
                reason: "connection reset".to_string()
            }
            .class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_status_accessor() {
        let limited = FetchError::RateLimited {
            message: "slow".to_string(),
            retry_at: None,
        };
        assert_eq!(limited.status(), Some(429));
        assert_eq!(http(503, "x").status(), Some(503));
        assert_eq!(FetchError::Timeout { timeout_ms: 1 }.status(), None);
    }

    #[test]
    fn test_streak_error_from_variants() {
        let storage = StreakError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, StreakError::Storage(_)));

        let fetch = StreakError::from(FetchError::Timeout { timeout_ms: 5 });
        assert!(matches!(fetch, StreakError::Fetch(_)));

        let integrity = StreakError::from(IntegrityViolation::MalformedCalendar {
            reason: "empty week".to_string(),
        });
        assert!(matches!(integrity, StreakError::Integrity(_)));

        let config = StreakError::from(ConfigError::MissingRequired {
            field: "origin.base_url".to_string(),
        });
        assert!(matches!(config, StreakError::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let msg = format!("{}", FetchError::Timeout { timeout_ms: 10_000 });
        assert!(msg.contains("10000ms"));
        let msg = format!(
            "{}",
            IntegrityViolation::VersionMismatch {
                stored: "1".to_string(),
                expected: "2".to_string()
            }
        );
        assert!(msg.contains("stored 1"));
    }
}
