//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! All ledgers live behind one RwLock so that multi-record operations
//! (settle, conditional debit) are atomic, like a database transaction.

use crate::error::StoreError;
use crate::repository::{
    BalanceLedger, DebitOutcome, Insertion, OrderLedger, ScanCursor, Settlement, Store,
};
use async_trait::async_trait;
use chrono::Utc;
use loyalty_domain::{
    BalanceSnapshot, Credit, Order, OrderNumber, OrderStatus, Points, UserId, Withdrawal,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// In-memory store for testing
pub struct MemoryStore {
    ledgers: RwLock<Ledgers>,
    fail_next_write: AtomicBool,
}

#[derive(Default)]
struct Ledgers {
    /// Orders in submission order
    orders: Vec<Order>,
    /// Order number -> index into `orders`
    index: HashMap<OrderNumber, usize>,
    /// Credits keyed by order number (at most one per order)
    credits: HashMap<OrderNumber, Credit>,
    /// Withdrawals in insertion order
    withdrawals: Vec<Withdrawal>,
}

impl Ledgers {
    fn order(&self, number: &OrderNumber) -> Option<&Order> {
        self.index.get(number).map(|&i| &self.orders[i])
    }

    fn order_mut(&mut self, number: &OrderNumber) -> Option<&mut Order> {
        match self.index.get(number) {
            Some(&i) => self.orders.get_mut(i),
            None => None,
        }
    }

    fn snapshot(&self, user: &UserId) -> BalanceSnapshot {
        BalanceSnapshot {
            credited: self.credits.values().filter(|c| &c.user == user).map(|c| c.amount).sum(),
            withdrawn: self.withdrawals.iter().filter(|w| &w.user == user).map(|w| w.sum).sum(),
        }
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            ledgers: RwLock::new(Ledgers::default()),
            fail_next_write: AtomicBool::new(false),
        }
    }

    /// Get the number of orders
    pub fn order_count(&self) -> usize {
        self.read().map(|l| l.orders.len()).unwrap_or(0)
    }

    /// Get the number of credits
    pub fn credit_count(&self) -> usize {
        self.read().map(|l| l.credits.len()).unwrap_or(0)
    }

    /// Get the number of withdrawals
    pub fn withdrawal_count(&self) -> usize {
        self.read().map(|l| l.withdrawals.len()).unwrap_or(0)
    }

    /// Make the next mutating call fail with a timeout (fault injection for tests)
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        if let Ok(mut ledgers) = self.write() {
            *ledgers = Ledgers::default();
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Ledgers>, StoreError> {
        self.ledgers
            .read()
            .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Ledgers>, StoreError> {
        self.ledgers
            .write()
            .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
    }

    /// Write guard for a mutating operation, honoring injected failures
    fn write_for(&self, operation: &'static str) -> Result<RwLockWriteGuard<'_, Ledgers>, StoreError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Timeout { operation, millis: 0 });
        }
        self.write()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Order Ledger Implementation
// =============================================================================

#[async_trait]
impl OrderLedger for MemoryStore {
    async fn insert_if_absent(&self, order: &Order) -> Result<Insertion, StoreError> {
        let mut ledgers = self.write_for("insert_if_absent")?;

        if let Some(existing) = ledgers.order(&order.number) {
            return Ok(Insertion::Existing(existing.clone()));
        }

        let idx = ledgers.orders.len();
        ledgers.orders.push(order.clone());
        ledgers.index.insert(order.number.clone(), idx);
        Ok(Insertion::Created(order.clone()))
    }

    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        Ok(self.read()?.order(number).cloned())
    }

    async fn find_by_owner(&self, owner: &UserId) -> Result<Vec<Order>, StoreError> {
        let ledgers = self.read()?;
        Ok(ledgers.orders.iter().filter(|o| &o.owner == owner).cloned().collect())
    }

    async fn find_unsettled(
        &self,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError> {
        let ledgers = self.read()?;
        let mut open: Vec<&Order> = ledgers
            .orders
            .iter()
            .filter(|o| !o.is_terminal())
            .filter(|o| after.map_or(true, |cursor| cursor.precedes(o)))
            .collect();
        open.sort_by(|a, b| ScanCursor::key(a).cmp(&ScanCursor::key(b)));

        Ok(open.into_iter().take(limit).cloned().collect())
    }

    async fn update_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> Result<bool, StoreError> {
        if status == OrderStatus::Processed {
            return Err(StoreError::invalid_state("PROCESSED is only reachable through settle"));
        }

        let mut ledgers = self.write_for("update_status")?;
        match ledgers.order_mut(number) {
            Some(order) if !order.is_terminal() => {
                order.status = status;
                order.updated_at = Utc::now();
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

// =============================================================================
// Balance Ledger Implementation
// =============================================================================

#[async_trait]
impl BalanceLedger for MemoryStore {
    async fn append_credit(&self, credit: &Credit) -> Result<bool, StoreError> {
        let mut ledgers = self.write_for("append_credit")?;
        if ledgers.credits.contains_key(&credit.order) {
            return Ok(false);
        }
        ledgers.credits.insert(credit.order.clone(), credit.clone());
        Ok(true)
    }

    async fn sum_credits(&self, user: &UserId) -> Result<Points, StoreError> {
        Ok(self.read()?.snapshot(user).credited)
    }

    async fn sum_debits(&self, user: &UserId) -> Result<Points, StoreError> {
        Ok(self.read()?.snapshot(user).withdrawn)
    }

    async fn snapshot(&self, user: &UserId) -> Result<BalanceSnapshot, StoreError> {
        Ok(self.read()?.snapshot(user))
    }

    async fn withdraw_if_covered(
        &self,
        withdrawal: &Withdrawal,
    ) -> Result<DebitOutcome, StoreError> {
        let mut ledgers = self.write_for("withdraw_if_covered")?;

        if let Some(existing) = ledgers.withdrawals.iter().find(|w| w.order == withdrawal.order) {
            return Ok(DebitOutcome::AlreadyWithdrawn(existing.clone()));
        }

        let snapshot = ledgers.snapshot(&withdrawal.user);
        if !snapshot.covers(withdrawal.sum) {
            return Ok(DebitOutcome::InsufficientFunds(snapshot));
        }

        ledgers.withdrawals.push(withdrawal.clone());
        Ok(DebitOutcome::Recorded(withdrawal.clone()))
    }

    async fn find_withdrawals(&self, user: &UserId) -> Result<Vec<Withdrawal>, StoreError> {
        let ledgers = self.read()?;
        Ok(ledgers.withdrawals.iter().filter(|w| &w.user == user).cloned().collect())
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for MemoryStore {
    fn orders(&self) -> &dyn OrderLedger {
        self
    }

    fn balances(&self) -> &dyn BalanceLedger {
        self
    }

    async fn settle(&self, number: &OrderNumber, payout: Points) -> Result<Settlement, StoreError> {
        let mut ledgers = self.write_for("settle")?;
        let credited = ledgers.credits.get(number).map(|c| c.amount);

        let order = ledgers
            .order_mut(number)
            .ok_or_else(|| StoreError::not_found("order", number.as_str()))?;

        if order.status == OrderStatus::Invalid {
            return Err(StoreError::invalid_state(format!("order {} is INVALID", number)));
        }

        // Credited without its status write: close the order on the credited amount
        if let Some(amount) = credited {
            if order.status != OrderStatus::Processed {
                order.status = OrderStatus::Processed;
                order.accrual = Some(amount);
                order.updated_at = Utc::now();
            }
            return Ok(Settlement::AlreadySettled);
        }

        let amount = match order.status {
            // Settled earlier without its credit: keep the stored payout
            OrderStatus::Processed => order.accrual.unwrap_or(payout),
            _ => {
                order.status = OrderStatus::Processed;
                order.accrual = Some(payout);
                order.updated_at = Utc::now();
                payout
            },
        };

        let credit = Credit::new(number.clone(), order.owner.clone(), amount);
        ledgers.credits.insert(number.clone(), credit.clone());
        debug!(order = %number, amount = %amount, "Order settled in memory");

        Ok(Settlement::Credited(credit))
    }
}

// =============================================================================
// Tests
// =============================================================================
