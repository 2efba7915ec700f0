//! # Live Wait-Time Fetching
//!
//! This module handles all network operations for fetching live attraction wait
//! times from the wartezeiten.app REST API (or any provider speaking the same shape).
//!
//! ## Data Source
//! - **Wait times**: `GET {base_url}/v1/waitingtimes` with `park` and `language` headers
//! - **Crowd level**: `GET {base_url}/v1/crowdlevel` with a `park` header
//! - **Format**: JSON array of attraction records
//!
//! ```json
//! [
//!   {"code": "silverstar", "name": "Silver Star", "status": "opened", "waitingtime": 25},
//!   {"code": "blue-fire", "name": "blue fire", "status": "closed", "waitingtime": 0}
//! ]
//! ```
//!
//! ## Error Handling
//! A fetch is all-or-nothing: one malformed record fails the whole response. The
//! caller (the alert evaluator) turns any [`FetchError`] into a retry request, so
//! nothing here retries or caches.

use crate::config::ApiConfig;
use crate::{AttractionState, AttractionStatus};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while fetching current attraction states.
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request failed (network, timeout, TLS or protocol error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    /// Response body did not match the expected record shape
    #[error("parse failed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Anything that can produce the current state of every attraction.
#[async_trait]
pub trait WaitTimeSource: Send + Sync {
    /// Fetch one consistent snapshot of attraction states.
    async fn fetch_current(&self) -> Result<Vec<AttractionState>, FetchError>;
}

/// Park-wide crowd level reported by the provider.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CrowdLevel {
    pub crowd_level: f64,
    pub timestamp: String,
}

/// Attraction record as the provider sends it.
#[derive(Debug, Deserialize)]
struct WireAttraction {
    code: String,
    #[serde(default)]
    name: String,
    status: String,
    #[serde(rename = "waitingtime", alias = "waitTimeMinutes")]
    wait_time: i64,
}

impl From<WireAttraction> for AttractionState {
    fn from(wire: WireAttraction) -> Self {
        AttractionState {
            status: AttractionStatus::from_wire(&wire.status),
            wait_time_minutes: wire.wait_time.clamp(0, u32::MAX as i64) as u32,
            code: wire.code,
            name: wire.name,
        }
    }
}

/// Parse a `/v1/waitingtimes` response body.
///
/// Order of the provider's list is preserved.
pub fn parse_wait_times(body: &[u8]) -> Result<Vec<AttractionState>, FetchError> {
    let records: Vec<WireAttraction> = serde_json::from_slice(body)?;
    Ok(records.into_iter().map(AttractionState::from).collect())
}

/// REST client for the wait-time provider.
#[derive(Debug, Clone)]
pub struct HttpWaitTimeSource {
    client: reqwest::Client,
    base_url: String,
    park: String,
    language: String,
}

impl HttpWaitTimeSource {
    /// Build a client from the `[api]` config section.
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpWaitTimeSource {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            park: config.park.clone(),
            language: config.language.clone(),
        })
    }

    /// Fetch the park-wide crowd level.
    pub async fn fetch_crowd_level(&self) -> Result<CrowdLevel, FetchError> {
        let url = format!("{}/v1/crowdlevel", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("park", &self.park)
            .send()
            .await?;
        let body = success_body(response).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl WaitTimeSource for HttpWaitTimeSource {
    async fn fetch_current(&self) -> Result<Vec<AttractionState>, FetchError> {
        let url = format!("{}/v1/waitingtimes", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("park", &self.park)
            .header("language", &self.language)
            .send()
            .await?;
        let body = success_body(response).await?;
        let states = parse_wait_times(&body)?;
        debug!(park = %self.park, attractions = states.len(), "wait_times_fetched");
        Ok(states)
    }
}

/// Read the whole body, rejecting non-2xx responses first.
async fn success_body(response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }
    Ok(response.bytes().await?.to_vec())
}
