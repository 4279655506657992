//! HTTP client for the usage endpoint.
//!
//! Provides a wrapper around reqwest with:
//! - Bearer authentication, the beta feature header and a fixed user-agent
//! - A per-request deadline independent of retry timing
//! - Status-code classification into [`FetchError`]
//!
//! The controller talks to the endpoint through the [`UsageSource`] trait so
//! tests can script responses without a network.

use crate::config::{ApiConfig, AppConfig};
use crate::error::{FetchError, Result, UsageError};
use crate::models::UsageSnapshot;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Anything that can perform one authenticated usage fetch.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Issue a single request with the given bearer token.
    ///
    /// Implementations must not retry; retry policy belongs to the caller.
    async fn fetch_usage(&self, token: &str) -> std::result::Result<UsageSnapshot, FetchError>;
}

/// Shared handle to a usage source.
pub type DynUsageSource = Arc<dyn UsageSource>;

/// How a response status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Unauthorized,
    RateLimited,
    ServerError(u16),
    Invalid(u16),
}

impl StatusClass {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            200 => StatusClass::Success,
            401 => StatusClass::Unauthorized,
            429 => StatusClass::RateLimited,
            code @ 500..=599 => StatusClass::ServerError(code),
            code => StatusClass::Invalid(code),
        }
    }
}

/// reqwest-backed client for the usage endpoint.
pub struct UsageClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl UsageClient {
    /// Create a client for the production endpoint.
    pub fn new() -> Result<Self> {
        Self::with_endpoint(ApiConfig::USAGE_ENDPOINT)
    }

    /// Create a client for a custom endpoint (staging, local fixtures).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        Self::with_endpoint_and_timeout(endpoint, ApiConfig::REQUEST_TIMEOUT)
    }

    pub fn with_endpoint_and_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint).map_err(|e| UsageError::Config {
            message: format!("Invalid usage endpoint {}: {}", endpoint, e),
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(AppConfig::user_agent())
            .build()
            .map_err(|e| UsageError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn retry_after_secs(headers: &header::HeaderMap) -> Option<u64> {
        headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    }
}

#[async_trait]
impl UsageSource for UsageClient {
    async fn fetch_usage(&self, token: &str) -> std::result::Result<UsageSnapshot, FetchError> {
        debug!("GET {}", self.endpoint);

        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(token)
            .header(ApiConfig::BETA_HEADER_NAME, ApiConfig::BETA_HEADER_VALUE)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!("Usage request failed: {}", e);
                FetchError::Network {
                    message: e.to_string(),
                }
            })?;

        let status = response.status();
        match StatusClass::from_status(status) {
            StatusClass::Success => {}
            StatusClass::Unauthorized => return Err(FetchError::Unauthorized),
            StatusClass::RateLimited => {
                return Err(FetchError::RateLimited {
                    retry_after_secs: Self::retry_after_secs(response.headers()),
                })
            }
            StatusClass::ServerError(code) => return Err(FetchError::ServerError { status: code }),
            StatusClass::Invalid(code) => return Err(FetchError::InvalidResponse { status: code }),
        }

        // Body read failures are transport errors; only the parse is a decode error.
        let body = response.bytes().await.map_err(|e| FetchError::Network {
            message: e.to_string(),
        })?;
        let snapshot = UsageSnapshot::from_json(&body)?;
        Ok(snapshot)
    }
}
