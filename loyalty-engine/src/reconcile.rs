//! Order reconciliation state machine.
//!
//! ```text
//! NEW/REGISTERED       --(registered)-->  REGISTERED
//! NEW/REG./PROCESSING  --(processing)-->  PROCESSING
//! any non-terminal     --(invalid)---->   INVALID     [terminal]
//! any non-terminal     --(processed P)--> PROCESSED   [terminal, credit P]
//! ```
//!
//! The oracle is authoritative for status, but a report never moves an order
//! backwards: anything ranking at or below the stored status is a no-op.

use loyalty_domain::{AccrualReport, AccrualStatus, OrderNumber, OrderStatus, Points};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::trace;

/// What the reconciler must persist for one order after one oracle report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing changes this tick
    Hold,
    /// Write a new non-crediting status (REGISTERED, PROCESSING or INVALID)
    Update(OrderStatus),
    /// Transition into PROCESSED and credit the payout, as one step
    Settle(Points),
}

/// Reports the engine refuses to act on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Oracle answered for a different order than the one queried
    #[error("Oracle report for {reported} does not match queried order {queried}")]
    MismatchedOrder { queried: String, reported: String },

    /// Oracle reported a negative payout
    #[error("Invalid accrual {accrual} for order {order}")]
    InvalidAccrual { order: String, accrual: Decimal },
}

/// Decide the transition for `number`, currently at `current`, given `report`.
///
/// A PROCESSED report without an accrual settles with zero points.
pub fn decide(
    number: &OrderNumber,
    current: OrderStatus,
    report: &AccrualReport,
) -> Result<Decision, EngineError> {
    if report.order.trim() != number.as_str() {
        return Err(EngineError::MismatchedOrder {
            queried: number.to_string(),
            reported: report.order.clone(),
        });
    }

    if current.is_terminal() {
        return Ok(Decision::Hold);
    }

    let target = report.status.order_status();
    if target.rank() <= current.rank() {
        trace!(order = %number, %current, %target, "Report does not advance order");
        return Ok(Decision::Hold);
    }

    match report.status {
        AccrualStatus::Processed => {
            let accrual = report.accrual.unwrap_or(Decimal::ZERO);
            let payout = Points::new(accrual).map_err(|_| EngineError::InvalidAccrual {
                order: number.to_string(),
                accrual,
            })?;
            Ok(Decision::Settle(payout))
        },
        AccrualStatus::Registered | AccrualStatus::Processing | AccrualStatus::Invalid => {
            Ok(Decision::Update(target))
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn number() -> OrderNumber {
        OrderNumber::parse("12345678903").unwrap()
    }

    fn report(status: AccrualStatus, accrual: Option<Decimal>) -> AccrualReport {
        AccrualReport {
            order: "12345678903".to_string(),
            status,
            accrual,
        }
    }

    #[test]
    fn test_new_order_registered_by_oracle() {
        let d = decide(&number(), OrderStatus::New, &report(AccrualStatus::Registered, None));
        assert_eq!(d, Ok(Decision::Update(OrderStatus::Registered)));
    }

    #[test]
    fn test_registered_report_on_registered_order_holds() {
        let d = decide(&number(), OrderStatus::Registered, &report(AccrualStatus::Registered, None));
        assert_eq!(d, Ok(Decision::Hold));
    }

    #[test]
    fn test_processing_advances_from_new_and_registered() {
        for current in [OrderStatus::New, OrderStatus::Registered] {
            let d = decide(&number(), current, &report(AccrualStatus::Processing, None));
            assert_eq!(d, Ok(Decision::Update(OrderStatus::Processing)));
        }
    }

    #[test]
    fn test_processing_never_regresses_to_registered() {
        let d = decide(&number(), OrderStatus::Processing, &report(AccrualStatus::Registered, None));
        assert_eq!(d, Ok(Decision::Hold));
    }

    #[test]
    fn test_invalid_from_any_open_status() {
        for current in [OrderStatus::New, OrderStatus::Registered, OrderStatus::Processing] {
            let d = decide(&number(), current, &report(AccrualStatus::Invalid, None));
            assert_eq!(d, Ok(Decision::Update(OrderStatus::Invalid)));
        }
    }

    #[test]
    fn test_processed_settles_payout() {
        let d = decide(
            &number(),
            OrderStatus::Processing,
            &report(AccrualStatus::Processed, Some(dec!(729.98))),
        );
        assert_eq!(d, Ok(Decision::Settle(Points::new(dec!(729.98)).unwrap())));
    }

    #[test]
    fn test_processed_without_accrual_settles_zero() {
        let d = decide(&number(), OrderStatus::New, &report(AccrualStatus::Processed, None));
        assert_eq!(d, Ok(Decision::Settle(Points::ZERO)));
    }

    #[test]
    fn test_terminal_orders_hold() {
        for current in OrderStatus::TERMINAL {
            for status in [
                AccrualStatus::Registered,
                AccrualStatus::Processing,
                AccrualStatus::Invalid,
                AccrualStatus::Processed,
            ] {
                let d = decide(&number(), current, &report(status, Some(dec!(100))));
                assert_eq!(d, Ok(Decision::Hold), "{:?} + {:?}", current, status);
            }
        }
    }

    #[test]
    fn test_negative_accrual_rejected() {
        let d = decide(
            &number(),
            OrderStatus::Processing,
            &report(AccrualStatus::Processed, Some(dec!(-5))),
        );
        assert!(matches!(d, Err(EngineError::InvalidAccrual { .. })));
    }

    #[test]
    fn test_mismatched_order_rejected() {
        let mut r = report(AccrualStatus::Processed, Some(dec!(5)));
        r.order = "79927398713".to_string();

        let d = decide(&number(), OrderStatus::New, &r);
        assert!(matches!(d, Err(EngineError::MismatchedOrder { .. })));
    }
}
