//! Loyalty Daemon Library
//!
//! Runtime orchestrator for the loyalty-points ledger.
//!
//! # Architecture
//!
//! ```text
//! API Server → Order Service   → Order Ledger
//!            → Balance Service → Balance Ledger
//!
//! Reconciler (timer) → Accrual Oracle → Engine → Order/Balance Ledgers
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Order Service**: Order submission and listing
//! - **Balance Service**: Balances and withdrawals
//! - **Reconciler**: Background loop advancing orders via the accrual oracle
//! - **API**: HTTP endpoints
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use loyaltyd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::in_memory(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod balance_service;
pub mod config;
pub mod daemon;
pub mod error;
pub mod order_service;
pub mod reconciler;

#[cfg(feature = "postgres")]
pub mod db;

// Re-exports for convenience
pub use balance_service::{BalanceService, WithdrawOutcome};
pub use config::{AccrualConfig, ApiConfig, Config, Environment, ReconcileConfig, StoreConfig};
pub use daemon::{Daemon, RunningDaemon};
pub use error::{DaemonError, DaemonResult};
pub use order_service::{OrderService, SubmitOutcome};
pub use reconciler::{Reconciler, TickReport};
