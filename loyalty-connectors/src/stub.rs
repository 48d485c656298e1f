//! Stub oracle for testing.
//!
//! Answers from scripted responses without making real HTTP calls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use loyalty_domain::{AccrualReport, AccrualStatus, OrderNumber};
use rust_decimal::Decimal;

use crate::ports::{AccrualPort, OracleResult};

// =============================================================================
// Stub Accrual
// =============================================================================

/// Stub accrual oracle for testing.
///
/// Each order has a queue of scripted results. The last scripted result
/// repeats once the queue drains; unscripted orders get the default.
pub struct StubAccrual {
    /// Scripted results by order number
    scripts: RwLock<HashMap<String, VecDeque<OracleResult>>>,
    /// Result for unscripted orders
    default: RwLock<OracleResult>,
    /// Every queried number, in call order
    queries: RwLock<Vec<OrderNumber>>,
}

impl StubAccrual {
    /// Create a stub that answers `Unknown` to everything.
    pub fn new() -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
            default: RwLock::new(OracleResult::Unknown),
            queries: RwLock::new(Vec::new()),
        }
    }

    /// Append a scripted result for an order.
    pub fn push(&self, number: &OrderNumber, result: OracleResult) {
        let mut scripts = self.scripts.write().unwrap();
        scripts.entry(number.as_str().to_string()).or_default().push_back(result);
    }

    /// Script a status report (echoing the order number).
    pub fn push_status(&self, number: &OrderNumber, status: AccrualStatus, accrual: Option<Decimal>) {
        self.push(
            number,
            OracleResult::Known(AccrualReport {
                order: number.as_str().to_string(),
                status,
                accrual,
            }),
        );
    }

    /// Set the result for unscripted orders.
    pub fn set_default(&self, result: OracleResult) {
        *self.default.write().unwrap() = result;
    }

    /// Total number of queries served.
    pub fn query_count(&self) -> usize {
        self.queries.read().unwrap().len()
    }

    /// Number of queries served for one order.
    pub fn queries_for(&self, number: &OrderNumber) -> usize {
        self.queries.read().unwrap().iter().filter(|n| *n == number).count()
    }

    /// Every queried number, in call order.
    pub fn queried(&self) -> Vec<OrderNumber> {
        self.queries.read().unwrap().clone()
    }

    /// Forget recorded queries (scripts are kept).
    pub fn reset_queries(&self) {
        self.queries.write().unwrap().clear();
    }
}

impl Default for StubAccrual {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccrualPort for StubAccrual {
    async fn query(&self, number: &OrderNumber) -> OracleResult {
        self.queries.write().unwrap().push(number.clone());

        let mut scripts = self.scripts.write().unwrap();
        match scripts.get_mut(number.as_str()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(OracleResult::Unknown),
            Some(queue) => queue.front().cloned().unwrap_or(OracleResult::Unknown),
            None => self.default.read().unwrap().clone(),
        }
    }
}
