//! Optional edge cache tier.
//!
//! A latency optimization only. Every failure here is swallowed by the
//! orchestrator and execution falls through to the origin.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use streak_core::{ContributionCalendar, FetchError, Year};

use crate::origin::{request_error, status_error};

/// What the edge tier returned for a year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeHit {
    pub data: ContributionCalendar,
    pub cached: bool,
    pub stale: bool,
    /// Age in seconds, when the edge reports it.
    pub age: Option<u64>,
}

#[async_trait]
pub trait EdgeCache: Send + Sync {
    /// Look up `year`. `Ok(None)` means the edge has nothing.
    async fn lookup(&self, year: Year) -> Result<Option<EdgeHit>, FetchError>;

    /// Push a freshly fetched calendar to the edge.
    async fn warm(&self, _year: Year, _data: &ContributionCalendar) -> Result<(), FetchError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct EdgeEnvelope {
    data: Option<ContributionCalendar>,
    #[serde(default)]
    cached: bool,
    #[serde(default)]
    stale: bool,
    age: Option<u64>,
}

/// Edge cache over HTTP: `GET`/`PUT {base_url}/contributions/{year}`.
#[derive(Debug)]
pub struct HttpEdgeCache {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpEdgeCache {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, year: Year) -> String {
        format!("{}/contributions/{}", self.base_url, year)
    }
}

#[async_trait]
impl EdgeCache for HttpEdgeCache {
    async fn lookup(&self, year: Year) -> Result<Option<EdgeHit>, FetchError> {
        let response = self
            .client
            .get(self.url(year))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, "edge lookup failed".to_string(), None));
        }

        let envelope: EdgeEnvelope =
            response
                .json()
                .await
                .map_err(|e| FetchError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        Ok(envelope.data.map(|data| EdgeHit {
            data,
            cached: envelope.cached,
            stale: envelope.stale,
            age: envelope.age,
        }))
    }

    async fn warm(&self, year: Year, data: &ContributionCalendar) -> Result<(), FetchError> {
        let response = self
            .client
            .put(self.url(year))
            .timeout(self.timeout)
            .json(data)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(status, "edge warm failed".to_string(), None))
        }
    }
}
