//! Accrual oracle port definitions.
//!
//! Ports define the interface to the external scoring service.
//! Adapters implement them for a concrete transport (REST, stub).

use async_trait::async_trait;
use std::time::Duration;

use loyalty_domain::{AccrualReport, OrderNumber};

// =============================================================================
// Oracle Result
// =============================================================================

/// Typed outcome of one oracle query.
///
/// Every transport outcome maps onto one of these; the port never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleResult {
    /// The oracle knows the order and reported its status
    Known(AccrualReport),
    /// The oracle has not registered the order yet (HTTP 204)
    Unknown,
    /// The oracle asked us to slow down (HTTP 429)
    RateLimited {
        /// Pause requested via `Retry-After`, if any
        retry_after: Option<Duration>,
    },
    /// Any other failure: 5xx, unexpected status, transport error, bad body
    Unavailable(String),
}

impl OracleResult {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            OracleResult::Known(_) => "known",
            OracleResult::Unknown => "unknown",
            OracleResult::RateLimited { .. } => "rate_limited",
            OracleResult::Unavailable(_) => "unavailable",
        }
    }
}

// =============================================================================
// Accrual Port
// =============================================================================

/// Port for querying the accrual oracle.
///
/// Implementations:
/// - `AccrualRestClient` - HTTP client for the real oracle
/// - `StubAccrual` - For testing (scripted responses per order)
///
/// Implementations do not retry; scheduling retries is the caller's job.
#[async_trait]
pub trait AccrualPort: Send + Sync {
    /// Ask the oracle about one order.
    async fn query(&self, number: &OrderNumber) -> OracleResult;
}
