//! Balance Service: balances and withdrawals.
//!
//! Available balance is always derived from the credit and withdrawal
//! journals. Withdrawals are authorized by the ledger itself, which
//! re-checks coverage and appends the debit in one serialized step.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use loyalty_domain::{BalanceSnapshot, Points, UserId, Withdrawal};
use loyalty_store::{DebitOutcome, Store};

use crate::error::{DaemonError, DaemonResult};
use crate::order_service::OrderService;

/// Successful outcome of a withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// Debit recorded by this call
    Recorded(Withdrawal),
    /// A withdrawal against the same order number already exists; nothing debited
    AlreadyWithdrawn(Withdrawal),
}

/// Answers balance queries and records withdrawals.
pub struct BalanceService<S: Store> {
    store: Arc<S>,
    orders: OrderService<S>,
}

impl<S: Store> Clone for BalanceService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            orders: self.orders.clone(),
        }
    }
}

impl<S: Store> BalanceService<S> {
    /// Create a new balance service.
    pub fn new(store: Arc<S>) -> Self {
        let orders = OrderService::new(store.clone());
        Self { store, orders }
    }

    /// Credited and withdrawn totals from one consistent read.
    pub async fn balance(&self, user: &UserId) -> DaemonResult<BalanceSnapshot> {
        Ok(self.store.balances().snapshot(user).await?)
    }

    /// Spendable points: credits minus withdrawals.
    pub async fn available(&self, user: &UserId) -> DaemonResult<Points> {
        Ok(self.balance(user).await?.available())
    }

    /// Total points ever withdrawn.
    pub async fn withdrawn(&self, user: &UserId) -> DaemonResult<Points> {
        Ok(self.store.balances().sum_debits(user).await?)
    }

    /// Whether `amount` could be withdrawn right now.
    ///
    /// Advisory only: [`BalanceService::withdraw`] re-checks atomically.
    pub async fn can_withdraw(&self, user: &UserId, amount: Decimal) -> DaemonResult<bool> {
        let amount = parse_amount(amount)?;
        Ok(self.balance(user).await?.covers(amount))
    }

    /// Spend `amount` points against the target order number `raw_order`.
    ///
    /// The target is submitted as an order of `user` first, so it follows the
    /// same duplicate and ownership rules as any purchase order and stays
    /// registered to `user` even when the debit is refused.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount` is not positive
    /// - `InvalidOrderNumber` / `OrderOwnedByAnotherUser` from the submission
    /// - `InsufficientFunds` if the available balance does not cover `amount`
    /// - `Store` on ledger failure
    pub async fn withdraw(
        &self,
        user: &UserId,
        raw_order: &str,
        amount: Decimal,
    ) -> DaemonResult<WithdrawOutcome> {
        let sum = parse_amount(amount)?;
        let number = self.orders.submit(raw_order, user).await?.order().number.clone();
        let withdrawal = Withdrawal::new(number, user.clone(), sum)
            .map_err(|e| DaemonError::InvalidAmount(e.to_string()))?;

        match self.store.balances().withdraw_if_covered(&withdrawal).await? {
            DebitOutcome::Recorded(withdrawal) => {
                info!(
                    user = %user,
                    order = %withdrawal.order,
                    sum = %withdrawal.sum,
                    "Withdrawal recorded"
                );
                Ok(WithdrawOutcome::Recorded(withdrawal))
            },
            DebitOutcome::AlreadyWithdrawn(existing) if existing.user == *user => {
                debug!(user = %user, order = %existing.order, "Withdrawal already recorded");
                Ok(WithdrawOutcome::AlreadyWithdrawn(existing))
            },
            DebitOutcome::AlreadyWithdrawn(existing) => {
                Err(DaemonError::OrderOwnedByAnotherUser(existing.order))
            },
            DebitOutcome::InsufficientFunds(snapshot) => {
                debug!(
                    user = %user,
                    requested = %sum,
                    available = %snapshot.available(),
                    "Withdrawal refused"
                );
                Err(DaemonError::InsufficientFunds {
                    requested: sum,
                    snapshot,
                })
            },
        }
    }

    /// All withdrawals of `user`, oldest first.
    pub async fn withdrawals(&self, user: &UserId) -> DaemonResult<Vec<Withdrawal>> {
        Ok(self.store.balances().find_withdrawals(user).await?)
    }
}

fn parse_amount(amount: Decimal) -> DaemonResult<Points> {
    Points::positive(amount).map_err(|e| DaemonError::InvalidAmount(e.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
