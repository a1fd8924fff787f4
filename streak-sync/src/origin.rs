//! Origin client: the network source of contribution calendars.
//!
//! The wire format is loose (optional counts, two names for the count field,
//! a total that may disagree with the days). Everything is coerced into
//! [`ContributionCalendar`] here so nothing past this module sees raw JSON.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use streak_core::{
    ContributionCalendar, ContributionDay, FetchError, MonthSummary, Timestamp, Year,
};
use tracing::debug;

/// Anything that can produce a calendar for a year.
#[async_trait]
pub trait ContributionSource: Send + Sync {
    async fn fetch_year(&self, year: Year) -> Result<ContributionCalendar, FetchError>;
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireResponse {
    #[serde(default)]
    pub success: bool,
    pub contributions: Option<WireCalendar>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireCalendar {
    /// Reported total. Ignored; the total is recomputed from the days.
    #[allow(dead_code)]
    pub total_contributions: Option<u64>,
    #[serde(default)]
    pub weeks: Vec<WireWeek>,
    #[serde(default)]
    pub months: Vec<MonthSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireWeek {
    #[serde(default)]
    pub contribution_days: Vec<WireDay>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireDay {
    pub date: NaiveDate,
    #[serde(alias = "count")]
    pub contribution_count: Option<u32>,
}

impl WireCalendar {
    /// Coerce into the domain type.
    ///
    /// Days without a count are dropped so a later merge fills them from the
    /// cache. Levels and the total are recomputed, days are re-grouped into
    /// Sunday-start weeks in date order.
    pub(crate) fn into_calendar(self) -> ContributionCalendar {
        let days = self
            .weeks
            .into_iter()
            .flat_map(|w| w.contribution_days)
            .filter_map(|d| d.contribution_count.map(|count| ContributionDay::new(d.date, count)));
        ContributionCalendar::from_days(days, self.months)
    }
}

/// Turn an origin body into a calendar or a typed failure.
pub(crate) fn parse_origin_body(body: &str) -> Result<ContributionCalendar, FetchError> {
    let response: WireResponse =
        serde_json::from_str(body).map_err(|e| FetchError::InvalidResponse {
            reason: e.to_string(),
        })?;

    if !response.success {
        return Err(FetchError::Upstream {
            message: response
                .error
                .unwrap_or_else(|| "origin reported success: false".to_string()),
        });
    }

    response
        .contributions
        .map(WireCalendar::into_calendar)
        .ok_or_else(|| FetchError::InvalidResponse {
            reason: "missing contributions".to_string(),
        })
}

// ============================================================================
// RATE-LIMIT HEADERS
// ============================================================================

/// Resolve `Retry-After` (delta-seconds or HTTP date) or
/// `X-RateLimit-Reset` (epoch seconds) into an instant.
pub fn parse_retry_at(headers: &HeaderMap, now: Timestamp) -> Option<Timestamp> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    };

    if let Some(value) = header("retry-after") {
        if let Ok(seconds) = value.parse::<u64>() {
            let delta = chrono::Duration::seconds(i64::try_from(seconds).ok()?);
            return Some(now + delta);
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(value) {
            return Some(at.with_timezone(&Utc));
        }
    }

    header("x-ratelimit-reset")
        .and_then(|value| value.parse::<i64>().ok())
        .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
}

/// Map a non-success status to the matching error.
pub(crate) fn status_error(
    status: StatusCode,
    message: String,
    retry_at: Option<Timestamp>,
) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::RateLimited { message, retry_at }
    } else {
        FetchError::Http {
            status: status.as_u16(),
            message,
            retry_at,
        }
    }
}

pub(crate) fn request_error(error: reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        FetchError::Network {
            reason: error.to_string(),
        }
    }
}

// ============================================================================
// HTTP ORIGIN
// ============================================================================

/// HTTP origin: `GET {base_url}/contributions?year={year}`.
pub struct HttpOrigin {
    client: Client,
    base_url: String,
    token: Option<String>,
    request_timeout: Duration,
}

impl HttpOrigin {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            request_timeout: streak_core::DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Send `Authorization: Bearer {token}` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Transport-level timeout. The orchestrator applies its own as well.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ContributionSource for HttpOrigin {
    async fn fetch_year(&self, year: Year) -> Result<ContributionCalendar, FetchError> {
        let url = format!("{}/contributions", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(&[("year", year)])
            .timeout(self.request_timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(e, self.request_timeout))?;

        let status = response.status();
        let retry_at = parse_retry_at(response.headers(), Utc::now());
        let body = response
            .text()
            .await
            .map_err(|e| request_error(e, self.request_timeout))?;

        if !status.is_success() {
            let message = serde_json::from_str::<WireResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(status_error(status, message, retry_at));
        }

        let calendar = parse_origin_body(&body)?;
        debug!(
            year,
            days = calendar.day_count(),
            total = calendar.total_contributions,
            "Fetched calendar from origin"
        );
        Ok(calendar)
    }
}

impl fmt::Debug for HttpOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOrigin")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
