//! PostgreSQL ledger implementation.
//!
//! Uses dynamic queries (sqlx::query) instead of compile-time checked
//! macros (sqlx::query!) to allow compilation without DATABASE_URL.
//!
//! Every operation runs under the store's time budget and fails with
//! `StoreError::Timeout` when the budget is exceeded.

use crate::error::StoreError;
use crate::repository::{
    BalanceLedger, DebitOutcome, Insertion, OrderLedger, ScanCursor, Settlement, Store,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loyalty_domain::{
    BalanceSnapshot, Credit, Order, OrderNumber, OrderStatus, Points, UserId, Withdrawal,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default per-operation time budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

const ORDER_COLUMNS: &str = "number, user_id, status, accrual, uploaded_at, updated_at";
const WITHDRAWAL_COLUMNS: &str = "id, order_number, user_id, amount, processed_at";

/// PostgreSQL adapter for the order and balance ledgers.
pub struct PgStore {
    /// PostgreSQL connection pool
    pool: Arc<PgPool>,
    /// Budget applied to every ledger operation
    timeout: Duration,
}

impl PgStore {
    /// Create a new PostgreSQL store.
    pub fn new(pool: Arc<PgPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Run `fut` under the store's time budget.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let millis = self.timeout.as_millis() as u64;
                warn!(operation, millis, "Ledger operation timed out");
                Err(StoreError::Timeout { operation, millis })
            },
        }
    }
}

// =============================================================================
// Row parsing
// =============================================================================

fn corrupt(column: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Deserialization(format!("{}: {}", column, err))
}

fn parse_order_row(row: &PgRow) -> Result<Order, StoreError> {
    let number: String = row.try_get("number")?;
    let user_id: String = row.try_get("user_id")?;
    let status: String = row.try_get("status")?;
    let accrual: Option<Decimal> = row.try_get("accrual")?;

    Ok(Order {
        number: OrderNumber::parse(&number).map_err(|e| corrupt("number", e))?,
        owner: UserId::new(user_id).map_err(|e| corrupt("user_id", e))?,
        status: status.parse::<OrderStatus>().map_err(|e| corrupt("status", e))?,
        accrual: accrual
            .map(Points::new)
            .transpose()
            .map_err(|e| corrupt("accrual", e))?,
        uploaded_at: row.try_get("uploaded_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_withdrawal_row(row: &PgRow) -> Result<Withdrawal, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let order_number: String = row.try_get("order_number")?;
    let user_id: String = row.try_get("user_id")?;
    let amount: Decimal = row.try_get("amount")?;
    let processed_at: DateTime<Utc> = row.try_get("processed_at")?;

    Ok(Withdrawal {
        id,
        order: OrderNumber::parse(&order_number).map_err(|e| corrupt("order_number", e))?,
        user: UserId::new(user_id).map_err(|e| corrupt("user_id", e))?,
        sum: Points::positive(amount).map_err(|e| corrupt("amount", e))?,
        processed_at,
    })
}

fn parse_snapshot_row(row: &PgRow) -> Result<BalanceSnapshot, StoreError> {
    let credited: Decimal = row.try_get("credited")?;
    let withdrawn: Decimal = row.try_get("withdrawn")?;

    Ok(BalanceSnapshot {
        credited: Points::new(credited).map_err(|e| corrupt("credited", e))?,
        withdrawn: Points::new(withdrawn).map_err(|e| corrupt("withdrawn", e))?,
    })
}

const SNAPSHOT_SQL: &str = r#"
    SELECT
        (SELECT COALESCE(SUM(amount), 0) FROM credits WHERE user_id = $1) AS credited,
        (SELECT COALESCE(SUM(amount), 0) FROM withdrawals WHERE user_id = $1) AS withdrawn
"#;

// =============================================================================
// Order Ledger
// =============================================================================

#[async_trait]
impl OrderLedger for PgStore {
    async fn insert_if_absent(&self, order: &Order) -> Result<Insertion, StoreError> {
        self.bounded("insert_if_absent", async {
            let inserted = sqlx::query(&format!(
                r#"
                INSERT INTO orders ({ORDER_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (number) DO NOTHING
                RETURNING {ORDER_COLUMNS}
                "#
            ))
            .bind(order.number.as_str())
            .bind(order.owner.as_str())
            .bind(order.status.as_str())
            .bind(order.accrual.map(|p| p.as_decimal()))
            .bind(order.uploaded_at)
            .bind(order.updated_at)
            .fetch_optional(&*self.pool)
            .await?;

            if let Some(row) = inserted {
                return Ok(Insertion::Created(parse_order_row(&row)?));
            }

            let row = sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE number = $1"
            ))
            .bind(order.number.as_str())
            .fetch_one(&*self.pool)
            .await?;

            Ok(Insertion::Existing(parse_order_row(&row)?))
        })
        .await
    }

    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        self.bounded("find_by_number", async {
            let row = sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE number = $1"
            ))
            .bind(number.as_str())
            .fetch_optional(&*self.pool)
            .await?;

            row.as_ref().map(parse_order_row).transpose()
        })
        .await
    }

    async fn find_by_owner(&self, owner: &UserId) -> Result<Vec<Order>, StoreError> {
        self.bounded("find_by_owner", async {
            let rows = sqlx::query(&format!(
                r#"
                SELECT {ORDER_COLUMNS} FROM orders
                WHERE user_id = $1
                ORDER BY uploaded_at ASC, number ASC
                "#
            ))
            .bind(owner.as_str())
            .fetch_all(&*self.pool)
            .await?;

            rows.iter().map(parse_order_row).collect()
        })
        .await
    }

    async fn find_unsettled(
        &self,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.bounded("find_unsettled", async {
            let rows = match after {
                None => {
                    sqlx::query(&format!(
                        r#"
                        SELECT {ORDER_COLUMNS} FROM orders
                        WHERE status NOT IN ('INVALID', 'PROCESSED')
                        ORDER BY uploaded_at ASC, number ASC
                        LIMIT $1
                        "#
                    ))
                    .bind(limit)
                    .fetch_all(&*self.pool)
                    .await?
                },
                Some(cursor) => {
                    sqlx::query(&format!(
                        r#"
                        SELECT {ORDER_COLUMNS} FROM orders
                        WHERE status NOT IN ('INVALID', 'PROCESSED')
                          AND (uploaded_at, number) > ($1, $2)
                        ORDER BY uploaded_at ASC, number ASC
                        LIMIT $3
                        "#
                    ))
                    .bind(cursor.uploaded_at)
                    .bind(cursor.number.as_str())
                    .bind(limit)
                    .fetch_all(&*self.pool)
                    .await?
                },
            };

            rows.iter().map(parse_order_row).collect()
        })
        .await
    }

    async fn update_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> Result<bool, StoreError> {
        if status == OrderStatus::Processed {
            return Err(StoreError::invalid_state("PROCESSED is only reachable through settle"));
        }

        self.bounded("update_status", async {
            let result = sqlx::query(
                r#"
                UPDATE orders
                SET status = $2, updated_at = NOW()
                WHERE number = $1 AND status NOT IN ('INVALID', 'PROCESSED')
                "#,
            )
            .bind(number.as_str())
            .bind(status.as_str())
            .execute(&*self.pool)
            .await?;

            Ok(result.rows_affected() == 1)
        })
        .await
    }
}

// =============================================================================
// Balance Ledger
// =============================================================================

#[async_trait]
impl BalanceLedger for PgStore {
    async fn append_credit(&self, credit: &Credit) -> Result<bool, StoreError> {
        self.bounded("append_credit", async {
            let result = sqlx::query(
                r#"
                INSERT INTO credits (order_number, user_id, amount, recorded_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (order_number) DO NOTHING
                "#,
            )
            .bind(credit.order.as_str())
            .bind(credit.user.as_str())
            .bind(credit.amount.as_decimal())
            .bind(credit.recorded_at)
            .execute(&*self.pool)
            .await?;

            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn sum_credits(&self, user: &UserId) -> Result<Points, StoreError> {
        Ok(self.snapshot(user).await?.credited)
    }

    async fn sum_debits(&self, user: &UserId) -> Result<Points, StoreError> {
        Ok(self.snapshot(user).await?.withdrawn)
    }

    async fn snapshot(&self, user: &UserId) -> Result<BalanceSnapshot, StoreError> {
        self.bounded("snapshot", async {
            let row = sqlx::query(SNAPSHOT_SQL)
                .bind(user.as_str())
                .fetch_one(&*self.pool)
                .await?;

            parse_snapshot_row(&row)
        })
        .await
    }

    async fn withdraw_if_covered(
        &self,
        withdrawal: &Withdrawal,
    ) -> Result<DebitOutcome, StoreError> {
        self.bounded("withdraw_if_covered", async {
            let mut tx = self.pool.begin().await?;

            // Serializes check-then-append per user until commit
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(withdrawal.user.as_str())
                .execute(&mut *tx)
                .await?;

            let existing = sqlx::query(&format!(
                "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE order_number = $1"
            ))
            .bind(withdrawal.order.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                tx.commit().await?;
                return Ok(DebitOutcome::AlreadyWithdrawn(parse_withdrawal_row(&row)?));
            }

            let row = sqlx::query(SNAPSHOT_SQL)
                .bind(withdrawal.user.as_str())
                .fetch_one(&mut *tx)
                .await?;
            let snapshot = parse_snapshot_row(&row)?;

            if !snapshot.covers(withdrawal.sum) {
                tx.commit().await?;
                return Ok(DebitOutcome::InsufficientFunds(snapshot));
            }

            let inserted = sqlx::query(
                r#"
                INSERT INTO withdrawals (id, order_number, user_id, amount, processed_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (order_number) DO NOTHING
                "#,
            )
            .bind(withdrawal.id)
            .bind(withdrawal.order.as_str())
            .bind(withdrawal.user.as_str())
            .bind(withdrawal.sum.as_decimal())
            .bind(withdrawal.processed_at)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                // Another user's withdrawal claimed this order number meanwhile
                let row = sqlx::query(&format!(
                    "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE order_number = $1"
                ))
                .bind(withdrawal.order.as_str())
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                return Ok(DebitOutcome::AlreadyWithdrawn(parse_withdrawal_row(&row)?));
            }

            tx.commit().await?;
            debug!(user = %withdrawal.user, order = %withdrawal.order, "Withdrawal recorded");
            Ok(DebitOutcome::Recorded(withdrawal.clone()))
        })
        .await
    }

    async fn find_withdrawals(&self, user: &UserId) -> Result<Vec<Withdrawal>, StoreError> {
        self.bounded("find_withdrawals", async {
            let rows = sqlx::query(&format!(
                r#"
                SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals
                WHERE user_id = $1
                ORDER BY processed_at ASC, id ASC
                "#
            ))
            .bind(user.as_str())
            .fetch_all(&*self.pool)
            .await?;

            rows.iter().map(parse_withdrawal_row).collect()
        })
        .await
    }
}

// =============================================================================
// Store
// =============================================================================

#[async_trait]
impl Store for PgStore {
    fn orders(&self) -> &dyn OrderLedger {
        self
    }

    fn balances(&self) -> &dyn BalanceLedger {
        self
    }

    async fn settle(&self, number: &OrderNumber, payout: Points) -> Result<Settlement, StoreError> {
        self.bounded("settle", async {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(
                "SELECT user_id, status, accrual FROM orders WHERE number = $1 FOR UPDATE",
            )
            .bind(number.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("order", number.as_str()))?;

            let user_id: String = row.try_get("user_id")?;
            let status: String = row.try_get("status")?;
            let stored_accrual: Option<Decimal> = row.try_get("accrual")?;
            let status = status.parse::<OrderStatus>().map_err(|e| corrupt("status", e))?;

            if status == OrderStatus::Invalid {
                return Err(StoreError::invalid_state(format!("order {} is INVALID", number)));
            }

            let credited = sqlx::query("SELECT amount FROM credits WHERE order_number = $1")
                .bind(number.as_str())
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(credit_row) = credited {
                // Credited without its status write: close the order on the credited amount
                if status != OrderStatus::Processed {
                    let amount: Decimal = credit_row.try_get("amount")?;
                    sqlx::query(
                        r#"
                        UPDATE orders
                        SET status = 'PROCESSED', accrual = $2, updated_at = NOW()
                        WHERE number = $1
                        "#,
                    )
                    .bind(number.as_str())
                    .bind(amount)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
                return Ok(Settlement::AlreadySettled);
            }

            let amount = if status == OrderStatus::Processed {
                // Settled earlier without its credit: keep the stored payout
                match stored_accrual {
                    Some(value) => Points::new(value).map_err(|e| corrupt("accrual", e))?,
                    None => payout,
                }
            } else {
                sqlx::query(
                    r#"
                    UPDATE orders
                    SET status = 'PROCESSED', accrual = $2, updated_at = NOW()
                    WHERE number = $1
                    "#,
                )
                .bind(number.as_str())
                .bind(payout.as_decimal())
                .execute(&mut *tx)
                .await?;
                payout
            };

            let owner = UserId::new(user_id).map_err(|e| corrupt("user_id", e))?;
            let credit = Credit::new(number.clone(), owner, amount);

            sqlx::query(
                r#"
                INSERT INTO credits (order_number, user_id, amount, recorded_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(credit.order.as_str())
            .bind(credit.user.as_str())
            .bind(credit.amount.as_decimal())
            .bind(credit.recorded_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            debug!(order = %number, amount = %amount, "Order settled");
            Ok(Settlement::Credited(credit))
        })
        .await
    }
}

// =============================================================================
// SQLX-TEST: Integration tests require DATABASE_URL
// =============================================================================
