//! Loyalty Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes the stored order status and an oracle report → returns what to persist.

#![warn(clippy::all)]

mod reconcile;

pub use reconcile::{decide, Decision, EngineError};
