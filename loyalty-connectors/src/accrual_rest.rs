//! Accrual Oracle REST Client
//!
//! Queries `GET {base}/api/orders/{number}` and translates the response:
//!
//! | HTTP | Result |
//! |---|---|
//! | 200 | `Known(report)` (malformed body → `Unavailable`) |
//! | 204 | `Unknown` |
//! | 429 | `RateLimited` with the `Retry-After` seconds, if present |
//! | other | `Unavailable` |
//!
//! Transport failures and timeouts are `Unavailable` as well.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use loyalty_domain::{AccrualReport, OrderNumber};

use crate::ports::{AccrualPort, OracleResult};

// =============================================================================
// Constants
// =============================================================================

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the accrual REST client.
///
/// Folded into [`OracleResult::Unavailable`] before leaving the client.
#[derive(Debug, Clone, Error)]
pub enum AccrualRestError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Oracle answered with a status outside its contract
    #[error("Unexpected status: {0}")]
    UnexpectedStatus(u16),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

// =============================================================================
// Accrual REST Client
// =============================================================================

/// HTTP client for the accrual oracle.
pub struct AccrualRestClient {
    /// HTTP client
    client: Client,
    /// Oracle base URL, without trailing slash
    base_url: String,
    /// Per-request budget
    timeout: Duration,
}

impl AccrualRestClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Oracle address, e.g. `http://localhost:8081`
    /// * `timeout` - Budget for one request including the body read
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            timeout,
        }
    }

    /// Get the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the status endpoint for one order.
    fn order_url(&self, number: &OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }

    /// Send the request and classify the response.
    async fn fetch(&self, number: &OrderNumber) -> Result<OracleResult, AccrualRestError> {
        let response = timeout(self.timeout, self.client.get(self.order_url(number)).send())
            .await
            .map_err(|_| AccrualRestError::Timeout(self.timeout))?
            .map_err(|e| AccrualRestError::RequestFailed(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body = timeout(self.timeout, response.text())
                    .await
                    .map_err(|_| AccrualRestError::Timeout(self.timeout))?
                    .map_err(|e| AccrualRestError::RequestFailed(e.to_string()))?;
                let report: AccrualReport = serde_json::from_str(&body)
                    .map_err(|e| AccrualRestError::ParseError(e.to_string()))?;
                Ok(OracleResult::Known(report))
            },
            StatusCode::NO_CONTENT => Ok(OracleResult::Unknown),
            StatusCode::TOO_MANY_REQUESTS => Ok(OracleResult::RateLimited {
                retry_after: retry_after(&response),
            }),
            other => Err(AccrualRestError::UnexpectedStatus(other.as_u16())),
        }
    }
}

/// `Retry-After` as delay-seconds. HTTP-date values are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl AccrualPort for AccrualRestClient {
    async fn query(&self, number: &OrderNumber) -> OracleResult {
        match self.fetch(number).await {
            Ok(result) => {
                debug!(order = %number, result = result.kind(), "Accrual oracle answered");
                result
            },
            Err(e) => {
                debug!(order = %number, error = %e, "Accrual oracle unavailable");
                OracleResult::Unavailable(e.to_string())
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
