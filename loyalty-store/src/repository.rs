//! Ledger trait definitions (Ports)
//!
//! These traits define the storage interface for the domain.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loyalty_domain::{
    BalanceSnapshot, Credit, Order, OrderNumber, OrderStatus, Points, UserId, Withdrawal,
};

/// Result of an atomic create-if-absent on the order ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// This call created the order
    Created(Order),
    /// The number was already taken; carries the stored order (any owner)
    Existing(Order),
}

impl Insertion {
    /// The stored order, whichever call created it
    pub fn order(&self) -> &Order {
        match self {
            Insertion::Created(order) | Insertion::Existing(order) => order,
        }
    }
}

/// Result of settling an order into PROCESSED
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Status written and payout credited by this call
    Credited(Credit),
    /// A credit for this order already exists; nothing was written
    AlreadySettled,
}

/// Result of an atomic conditional debit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Debit appended
    Recorded(Withdrawal),
    /// Available balance did not cover the sum; nothing was written
    InsufficientFunds(BalanceSnapshot),
    /// A withdrawal against the same order number already exists
    AlreadyWithdrawn(Withdrawal),
}

/// Resume point of the unsettled-order scan.
///
/// Open orders are scanned by `(uploaded_at, number)`. A cursor names the
/// last order examined; the next page starts strictly after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor {
    /// Submission time of the last examined order
    pub uploaded_at: DateTime<Utc>,
    /// Number of the last examined order
    pub number: OrderNumber,
}

impl ScanCursor {
    /// Cursor positioned on `order`
    pub fn after(order: &Order) -> Self {
        Self {
            uploaded_at: order.uploaded_at,
            number: order.number.clone(),
        }
    }

    /// Scan key of `order`
    pub fn key(order: &Order) -> (DateTime<Utc>, &str) {
        (order.uploaded_at, order.number.as_str())
    }

    /// Whether `order` comes after this cursor in scan order
    pub fn precedes(&self, order: &Order) -> bool {
        (self.uploaded_at, self.number.as_str()) < Self::key(order)
    }
}

/// Ledger of submitted orders
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Insert the order unless its number exists, as one atomic operation
    async fn insert_if_absent(&self, order: &Order) -> Result<Insertion, StoreError>;

    /// Find an order by number
    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;

    /// Find all orders of a user, oldest submission first
    async fn find_by_owner(&self, owner: &UserId) -> Result<Vec<Order>, StoreError>;

    /// Find up to `limit` non-terminal orders in scan order, starting after
    /// `after` (or from the oldest submission when `None`)
    async fn find_unsettled(
        &self,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError>;

    /// Write a non-crediting status.
    ///
    /// Returns `false` when the order is missing or already terminal.
    /// PROCESSED is rejected; use [`Store::settle`].
    async fn update_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> Result<bool, StoreError>;
}

/// Append-only credit and withdrawal journals
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Append a credit keyed by order number.
    ///
    /// Returns `false` (and writes nothing) if the order was already credited.
    async fn append_credit(&self, credit: &Credit) -> Result<bool, StoreError>;

    /// Sum of all credits of a user
    async fn sum_credits(&self, user: &UserId) -> Result<Points, StoreError>;

    /// Sum of all withdrawals of a user
    async fn sum_debits(&self, user: &UserId) -> Result<Points, StoreError>;

    /// Both sums, read at the same committed point in time
    async fn snapshot(&self, user: &UserId) -> Result<BalanceSnapshot, StoreError>;

    /// Append the withdrawal only if the user's available balance covers it.
    ///
    /// Check and append are serialized per user.
    async fn withdraw_if_covered(&self, withdrawal: &Withdrawal)
        -> Result<DebitOutcome, StoreError>;

    /// All withdrawals of a user, oldest first
    async fn find_withdrawals(&self, user: &UserId) -> Result<Vec<Withdrawal>, StoreError>;
}

/// Combined store interface
#[async_trait]
pub trait Store: Send + Sync {
    /// Get order ledger
    fn orders(&self) -> &dyn OrderLedger;

    /// Get balance ledger
    fn balances(&self) -> &dyn BalanceLedger;

    /// Move an order into PROCESSED with `payout` and credit its owner.
    ///
    /// Status, payout and credit are committed together. Keyed by order
    /// number: a repeated call returns [`Settlement::AlreadySettled`].
    /// Fails with `InvalidState` for INVALID orders and `NotFound` for
    /// unknown numbers.
    async fn settle(&self, number: &OrderNumber, payout: Points)
        -> Result<Settlement, StoreError>;
}
