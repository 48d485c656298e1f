//! Loyalty Storage Layer
//!
//! Persistence for orders and the balance journals.
//!
//! # Architecture
//!
//! - **Ledger traits**: Define the storage interface (ports)
//! - **In-memory store**: Fast implementation for testing
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use loyalty_store::{Insertion, MemoryStore, Store};
//! use loyalty_domain::{Order, OrderNumber, UserId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     let order = Order::new(
//!         OrderNumber::parse("79927398713").unwrap(),
//!         UserId::new("alice").unwrap(),
//!     );
//!     let inserted = store.orders().insert_if_absent(&order).await.unwrap();
//!     assert!(matches!(inserted, Insertion::Created(_)));
//!
//!     let open = store.orders().find_unsettled(None, 100).await.unwrap();
//!     println!("Orders awaiting accrual: {}", open.len());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{
    BalanceLedger, DebitOutcome, Insertion, OrderLedger, ScanCursor, Settlement, Store,
};
