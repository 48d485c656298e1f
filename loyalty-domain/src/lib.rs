//! Loyalty Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains entities, value objects, and domain rules for the points ledger.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    AccrualReport, AccrualStatus, BalanceSnapshot, Credit, Order, OrderStatus, Withdrawal,
    WithdrawalId,
};
pub use value_objects::{DomainError, OrderNumber, Points, UserId};
