//! Reconciler: polls the accrual oracle and advances open orders.
//!
//! Each tick fetches a batch of non-terminal orders, asks the oracle about
//! each one and persists the engine's decision. Batches rotate through all
//! open orders: the next tick resumes after the last order examined and
//! wraps around once the end is reached. Per-order failures are logged and
//! skipped; a rate-limit answer ends the tick early and, when the oracle
//! supplied `Retry-After`, pauses ticking until then (capped by
//! `max_pause`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use loyalty_connectors::{AccrualPort, OracleResult};
use loyalty_domain::{AccrualReport, Order};
use loyalty_engine::{decide, Decision};
use loyalty_store::{ScanCursor, Settlement, Store};

use crate::config::ReconcileConfig;
use crate::error::DaemonResult;

// =============================================================================
// Tick Report
// =============================================================================

/// Summary of one reconciliation tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Orders sent to the oracle
    pub examined: usize,
    /// Non-crediting status writes
    pub updated: usize,
    /// Orders moved into PROCESSED and credited
    pub settled: usize,
    /// Orders left untouched because of a failure (oracle, engine or store)
    pub skipped: usize,
    /// The oracle rate-limited us and the rest of the batch was abandoned
    pub rate_limited: bool,
    /// The tick did nothing because an earlier `Retry-After` is still running
    pub paused: bool,
}

/// State carried between ticks. Guarded by the tick mutex.
#[derive(Debug, Default)]
struct LoopState {
    paused_until: Option<Instant>,
    /// Last order examined; `None` starts from the oldest open order
    cursor: Option<ScanCursor>,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Background worker driving orders to a terminal status.
pub struct Reconciler<A: AccrualPort + 'static, S: Store + 'static> {
    oracle: Arc<A>,
    store: Arc<S>,
    config: ReconcileConfig,
    /// Held for the whole tick, so ticks never overlap
    state: Mutex<LoopState>,
}

impl<A: AccrualPort + 'static, S: Store + 'static> Reconciler<A, S> {
    /// Create a new reconciler.
    pub fn new(oracle: Arc<A>, store: Arc<S>, config: ReconcileConfig) -> Self {
        Self {
            oracle,
            store,
            config,
            state: Mutex::new(LoopState::default()),
        }
    }

    /// Start the loop in the background.
    ///
    /// Returns when `shutdown` is cancelled, after the in-flight tick.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Run the loop on the current task until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Reconciler started"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reconciler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if report.examined > 0 => {
                            debug!(
                                examined = report.examined,
                                updated = report.updated,
                                settled = report.settled,
                                skipped = report.skipped,
                                rate_limited = report.rate_limited,
                                "Reconciliation tick"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Reconciliation tick failed (will retry)");
                        }
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Run one batch.
    ///
    /// Fails only when the batch itself cannot be read; per-order failures
    /// are counted in [`TickReport::skipped`].
    pub async fn tick(&self) -> DaemonResult<TickReport> {
        let mut state = self.state.lock().await;
        let mut report = TickReport::default();

        if let Some(until) = state.paused_until {
            if Instant::now() < until {
                trace!("Reconciler paused by Retry-After");
                report.paused = true;
                return Ok(report);
            }
            state.paused_until = None;
        }

        let batch_size = self.config.batch_size;
        let ledger = self.store.orders();
        let mut orders = ledger.find_unsettled(state.cursor.as_ref(), batch_size).await?;
        if orders.is_empty() && state.cursor.is_some() {
            state.cursor = None;
            orders = ledger.find_unsettled(None, batch_size).await?;
        }

        let mut last_examined = None;
        for order in &orders {
            match self.oracle.query(&order.number).await {
                OracleResult::Known(answer) => self.apply(order, &answer, &mut report).await,
                OracleResult::Unknown => {
                    trace!(order = %order.number, "Oracle does not know order yet");
                },
                OracleResult::RateLimited { retry_after } => {
                    warn!(
                        order = %order.number,
                        retry_after_secs = retry_after.map(|d| d.as_secs()),
                        remaining = orders.len() - report.examined - 1,
                        "Oracle rate limit hit, abandoning batch"
                    );
                    report.examined += 1;
                    report.rate_limited = true;
                    state.paused_until = retry_after.and_then(|d| self.pause_deadline(d));
                    break;
                },
                OracleResult::Unavailable(reason) => {
                    warn!(order = %order.number, reason = %reason, "Oracle unavailable for order");
                    report.skipped += 1;
                },
            }
            report.examined += 1;
            last_examined = Some(order);
        }

        // A rate-limited order is retried first; a short page ends the scan
        if report.rate_limited {
            if let Some(order) = last_examined {
                state.cursor = Some(ScanCursor::after(order));
            }
        } else if orders.len() >= batch_size {
            state.cursor = last_examined.map(ScanCursor::after);
        } else {
            state.cursor = None;
        }

        Ok(report)
    }

    /// Deadline for a `Retry-After` pause, capped at `max_pause`.
    fn pause_deadline(&self, retry_after: Duration) -> Option<Instant> {
        let pause = retry_after.min(self.config.max_pause);
        Instant::now().checked_add(pause)
    }

    /// Persist the decision for one oracle answer.
    async fn apply(&self, order: &Order, answer: &AccrualReport, report: &mut TickReport) {
        let decision = match decide(&order.number, order.status, answer) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(order = %order.number, error = %e, "Rejected oracle report");
                report.skipped += 1;
                return;
            },
        };

        match decision {
            Decision::Hold => {},
            Decision::Update(status) => {
                match self.store.orders().update_status(&order.number, status).await {
                    Ok(true) => {
                        info!(
                            order = %order.number,
                            from = %order.status,
                            to = %status,
                            "Order status updated"
                        );
                        report.updated += 1;
                    },
                    Ok(false) => {
                        debug!(order = %order.number, "Order settled concurrently, update skipped");
                    },
                    Err(e) => {
                        warn!(order = %order.number, error = %e, "Failed to update order status");
                        report.skipped += 1;
                    },
                }
            },
            Decision::Settle(payout) => match self.store.settle(&order.number, payout).await {
                Ok(Settlement::Credited(credit)) => {
                    info!(
                        order = %order.number,
                        user = %credit.user,
                        accrual = %credit.amount,
                        "Order processed and credited"
                    );
                    report.settled += 1;
                },
                Ok(Settlement::AlreadySettled) => {
                    debug!(order = %order.number, "Order already credited");
                },
                Err(e) => {
                    warn!(order = %order.number, error = %e, "Failed to settle order");
                    report.skipped += 1;
                },
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
