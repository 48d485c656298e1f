//! Daemon error types.

use loyalty_domain::{BalanceSnapshot, OrderNumber, Points};
use loyalty_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Submitted number is not a valid order number
    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),

    /// Order number is already registered to a different user
    #[error("Order {0} belongs to another user")]
    OrderOwnedByAnotherUser(OrderNumber),

    /// Available balance does not cover the withdrawal
    #[error("Insufficient funds: requested {requested}, available {}", .snapshot.available())]
    InsufficientFunds {
        requested: Points,
        snapshot: BalanceSnapshot,
    },

    /// Withdrawal amount is not a positive number of points
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DaemonError {
    /// Whether the error describes bad caller input rather than a system fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DaemonError::InvalidOrderNumber(_)
                | DaemonError::OrderOwnedByAnotherUser(_)
                | DaemonError::InsufficientFunds { .. }
                | DaemonError::InvalidAmount(_)
        )
    }
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
