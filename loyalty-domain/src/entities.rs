//! Domain Entities for the Loyalty Ledger
//!
//! Orders move through a monotonic lifecycle driven by the accrual oracle;
//! balance entries (credits and withdrawals) are append-only.

use crate::value_objects::{DomainError, OrderNumber, Points, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a Withdrawal
pub type WithdrawalId = Uuid;

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle status of an order
///
/// ```text
/// NEW → REGISTERED → PROCESSING → INVALID | PROCESSED
/// ```
///
/// `INVALID` and `PROCESSED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted by us, not yet seen by the oracle
    New,
    /// Oracle knows the order but has not started scoring
    Registered,
    /// Oracle is computing the payout
    Processing,
    /// Oracle rejected the order (terminal)
    Invalid,
    /// Payout computed and credited (terminal)
    Processed,
}

impl OrderStatus {
    /// All statuses that never change again
    pub const TERMINAL: [OrderStatus; 2] = [OrderStatus::Invalid, OrderStatus::Processed];

    /// Check if no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Position in the lifecycle; transitions only ever increase it
    pub fn rank(&self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Registered => 1,
            OrderStatus::Processing => 2,
            OrderStatus::Invalid | OrderStatus::Processed => 3,
        }
    }

    /// Wire/storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "REGISTERED" => Ok(OrderStatus::Registered),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Order
// =============================================================================

/// A purchase order submitted for points accrual
///
/// `owner` and `uploaded_at` never change after creation.
/// `accrual` is only set once the order is `PROCESSED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub number: OrderNumber,
    pub owner: UserId,
    pub status: OrderStatus,
    pub accrual: Option<Points>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a freshly submitted order
    pub fn new(number: OrderNumber, owner: UserId) -> Self {
        let now = Utc::now();
        Self {
            number,
            owner,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: now,
            updated_at: now,
        }
    }

    /// Check if the order reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the order belongs to `user`
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner == user
    }
}

// =============================================================================
// Balance Journal Entries
// =============================================================================

/// Credit of an order's payout to its owner.
///
/// Keyed by order number: at most one credit exists per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub order: OrderNumber,
    pub user: UserId,
    pub amount: Points,
    pub recorded_at: DateTime<Utc>,
}

impl Credit {
    /// Create a credit for a settled order
    pub fn new(order: OrderNumber, user: UserId, amount: Points) -> Self {
        Self {
            order,
            user,
            amount,
            recorded_at: Utc::now(),
        }
    }
}

/// Debit of points spent against a target order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub order: OrderNumber,
    pub user: UserId,
    pub sum: Points,
    pub processed_at: DateTime<Utc>,
}

impl Withdrawal {
    /// Create a withdrawal
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if `sum` is zero
    pub fn new(order: OrderNumber, user: UserId, sum: Points) -> Result<Self, DomainError> {
        if sum.is_zero() {
            return Err(DomainError::InvalidAmount("withdrawal sum must be positive".to_string()));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            order,
            user,
            sum,
            processed_at: Utc::now(),
        })
    }
}

/// Credited and withdrawn totals of one user, read at a single point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub credited: Points,
    pub withdrawn: Points,
}

impl BalanceSnapshot {
    /// Spendable points: credited minus withdrawn.
    ///
    /// Never negative; a journal that violates this reads as zero.
    pub fn available(&self) -> Points {
        self.credited.checked_sub(self.withdrawn).unwrap_or(Points::ZERO)
    }

    /// Check whether `amount` can be withdrawn from this snapshot
    pub fn covers(&self, amount: Points) -> bool {
        self.available() >= amount
    }
}

// =============================================================================
// Accrual Oracle Report
// =============================================================================

/// Status reported by the accrual oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    /// Registered with the oracle, scoring not started
    Registered,
    /// Scoring in progress
    Processing,
    /// Not eligible for points
    Invalid,
    /// Scored; `accrual` carries the payout
    Processed,
}

impl AccrualStatus {
    /// The order status this oracle status maps onto
    pub fn order_status(&self) -> OrderStatus {
        match self {
            AccrualStatus::Registered => OrderStatus::Registered,
            AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Oracle response body for `GET /api/orders/{number}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualReport {
    /// Order number as echoed by the oracle (not validated)
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

// =============================================================================
// Tests
// =============================================================================
