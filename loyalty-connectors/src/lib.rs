//! Loyalty Accrual Connectors
//!
//! Adapters for the external accrual oracle.
//! Normalizes HTTP outcomes to a small typed result taxonomy.

#![warn(clippy::all)]

// Public modules
pub mod accrual_rest;
pub mod ports;
pub mod stub;

// Re-exports
pub use accrual_rest::{AccrualRestClient, AccrualRestError};
pub use ports::{AccrualPort, OracleResult};
pub use stub::StubAccrual;
