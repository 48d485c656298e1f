//! Value Objects for the Loyalty Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Order number is not a Luhn-valid digit string
    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),

    /// User identifier is empty
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    /// Points amount is negative (or zero where a positive amount is required)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Unknown order status string
    #[error("Invalid order status: {0}")]
    InvalidStatus(String),
}

// =============================================================================
// OrderNumber
// =============================================================================

/// OrderNumber is an externally supplied purchase number.
///
/// # Invariants
/// - ASCII digits only (surrounding whitespace is trimmed)
/// - Between 2 and [`OrderNumber::MAX_DIGITS`] digits
/// - Passes the Luhn checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Longest accepted order number
    pub const MAX_DIGITS: usize = 64;

    /// Parse and validate an order number
    ///
    /// # Examples
    /// ```
    /// # use loyalty_domain::OrderNumber;
    /// let number = OrderNumber::parse("79927398713").unwrap();
    /// assert_eq!(number.as_str(), "79927398713");
    /// assert!(OrderNumber::parse("79927398710").is_err());
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidOrderNumber` on bad format or checksum
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let digits = Self::digits(raw)?;

        if luhn_sum(&digits, false) % 10 != 0 {
            return Err(DomainError::InvalidOrderNumber(format!("checksum mismatch: {}", raw.trim())));
        }

        Ok(Self(raw.trim().to_string()))
    }

    /// Build a valid order number by appending the Luhn check digit to `payload`
    ///
    /// ```
    /// # use loyalty_domain::OrderNumber;
    /// let number = OrderNumber::with_check_digit("7992739871").unwrap();
    /// assert_eq!(number.as_str(), "79927398713");
    /// ```
    pub fn with_check_digit(payload: &str) -> Result<Self, DomainError> {
        let digits = Self::digits(&format!("{}0", payload.trim()))?;
        let payload_digits = &digits[..digits.len() - 1];

        // The check digit will occupy the rightmost slot, so the payload's
        // rightmost digit is the first one doubled.
        let check = (10 - luhn_sum(payload_digits, true) % 10) % 10;

        Ok(Self(format!("{}{}", payload.trim(), check)))
    }

    /// Get the order number as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digits(raw: &str) -> Result<Vec<u32>, DomainError> {
        let trimmed = raw.trim();

        if trimmed.len() < 2 {
            return Err(DomainError::InvalidOrderNumber(format!("too short: {:?}", trimmed)));
        }
        if trimmed.len() > Self::MAX_DIGITS {
            return Err(DomainError::InvalidOrderNumber(format!(
                "longer than {} digits",
                Self::MAX_DIGITS
            )));
        }

        trimmed
            .chars()
            .map(|c| {
                c.to_digit(10).ok_or_else(|| {
                    DomainError::InvalidOrderNumber(format!("non-digit character {:?}", c))
                })
            })
            .collect()
    }
}

/// Luhn sum over `digits`, walking right to left.
///
/// With `double_first == false` the rightmost digit is the check digit and
/// every second digit from it is doubled.
fn luhn_sum(digits: &[u32], double_first: bool) -> u32 {
    digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            let doubled = (i % 2 == 0) == double_first;
            if doubled {
                let d2 = d * 2;
                if d2 > 9 {
                    d2 - 9
                } else {
                    d2
                }
            } else {
                d
            }
        })
        .sum()
}

impl FromStr for OrderNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderNumber> for String {
    fn from(value: OrderNumber) -> Self {
        value.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// UserId
// =============================================================================

/// Opaque identifier of an authenticated user.
///
/// Issued by the identity provider; the ledger never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a UserId, rejecting blank identifiers
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(DomainError::InvalidUserId("user id must be non-empty".to_string()));
        }
        Ok(Self(raw))
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Points
// =============================================================================

/// Points represents a non-negative amount of loyalty points
///
/// Serialized as a JSON number.
///
/// # Invariants
/// - Must be >= 0
/// - At most [`Points::SCALE`] decimal places (finer input is rounded)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Points(Decimal);

impl Points {
    /// Zero points
    pub const ZERO: Points = Points(Decimal::ZERO);

    /// Decimal places kept; matches the ledger columns
    pub const SCALE: u32 = 8;

    /// Create a new Points amount with validation
    ///
    /// Values are rounded half away from zero to [`Points::SCALE`] places.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value < 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::InvalidAmount(format!("points cannot be negative: {}", value)));
        }
        let rounded =
            value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        Ok(Self(rounded.normalize()))
    }

    /// Create a strictly positive amount (withdrawals)
    ///
    /// Amounts that round to zero are rejected.
    pub fn positive(value: Decimal) -> Result<Self, DomainError> {
        let points = if value > Decimal::ZERO { Self::new(value)? } else { Self::ZERO };
        if points.is_zero() {
            return Err(DomainError::InvalidAmount(format!("amount must be positive: {}", value)));
        }
        Ok(points)
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Check whether the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Subtract, returning `None` if the result would be negative
    pub fn checked_sub(self, other: Points) -> Option<Points> {
        let diff = self.0 - other.0;
        if diff < Decimal::ZERO {
            None
        } else {
            Some(Points(diff))
        }
    }
}

impl Add for Points {
    type Output = Points;

    fn add(self, rhs: Points) -> Points {
        Points(self.0 + rhs.0)
    }
}

impl Sum for Points {
    fn sum<I: Iterator<Item = Points>>(iter: I) -> Points {
        iter.fold(Points::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Points> for Points {
    fn sum<I: Iterator<Item = &'a Points>>(iter: I) -> Points {
        iter.copied().sum()
    }
}

impl TryFrom<Decimal> for Points {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Serialize for Points {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::float::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Points {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = rust_decimal::serde::float::deserialize(deserializer)?;
        Points::new(value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_number_accepts_luhn_valid() {
        for raw in ["79927398713", "12345678903", "4561261212345467", "2377225624", "18"] {
            assert!(OrderNumber::parse(raw).is_ok(), "{} should be valid", raw);
        }
    }

    #[test]
    fn test_order_number_rejects_bad_checksum() {
        assert!(matches!(
            OrderNumber::parse("12345678904"),
            Err(DomainError::InvalidOrderNumber(_))
        ));
        assert!(OrderNumber::parse("79927398710").is_err());
    }

    #[test]
    fn test_order_number_rejects_single_digit() {
        assert!(OrderNumber::parse("1").is_err());
        assert!(OrderNumber::parse("0").is_err());
        assert!(OrderNumber::parse("").is_err());
    }

    #[test]
    fn test_order_number_rejects_non_digits() {
        assert!(OrderNumber::parse("7992-7398713").is_err());
        assert!(OrderNumber::parse("abc").is_err());
        assert!(OrderNumber::parse("١٢").is_err());
    }

    #[test]
    fn test_order_number_trims_whitespace() {
        let number = OrderNumber::parse("  79927398713\n").unwrap();
        assert_eq!(number.as_str(), "79927398713");
    }

    #[test]
    fn test_order_number_rejects_overlong() {
        let raw = "0".repeat(OrderNumber::MAX_DIGITS + 1);
        assert!(OrderNumber::parse(&raw).is_err());
    }

    #[test]
    fn test_with_check_digit_produces_valid_numbers() -> anyhow::Result<()> {
        for payload in ["1", "7992739871", "1234567890", "4561261212345", "900"] {
            let number = OrderNumber::with_check_digit(payload)?;
            assert!(number.as_str().starts_with(payload));
            assert_eq!(OrderNumber::parse(number.as_str())?, number);
        }
        Ok(())
    }

    #[test]
    fn test_order_number_serde_validates() {
        let ok: OrderNumber = serde_json::from_str("\"12345678903\"").unwrap();
        assert_eq!(ok.as_str(), "12345678903");

        let bad: Result<OrderNumber, _> = serde_json::from_str("\"12345678904\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_user_id_rejects_blank() {
        assert!(UserId::new("").is_err());
        assert!(UserId::new("   ").is_err());
        assert_eq!(UserId::new("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn test_points_validation() {
        assert!(Points::new(dec!(0)).is_ok());
        assert!(Points::new(dec!(729.98)).is_ok());
        assert!(Points::new(dec!(-0.01)).is_err());
        assert!(Points::positive(dec!(0)).is_err());
        assert!(Points::positive(dec!(1)).is_ok());
    }

    #[test]
    fn test_points_keep_ledger_scale() {
        let fine = Points::new(dec!(0.123456785)).unwrap();
        assert_eq!(fine.as_decimal(), dec!(0.12345679));
        assert_eq!(Points::new(dec!(729.98)).unwrap().as_decimal().scale(), 2);

        assert!(Points::positive(dec!(0.000000001)).is_err());
        assert_eq!(
            Points::positive(dec!(0.000000005)).unwrap().as_decimal(),
            dec!(0.00000001)
        );
    }

    #[test]
    fn test_points_arithmetic() {
        let a = Points::new(dec!(500)).unwrap();
        let b = Points::new(dec!(729.98)).unwrap();

        assert_eq!((a + b).as_decimal(), dec!(1229.98));
        assert_eq!([a, b].iter().sum::<Points>().as_decimal(), dec!(1229.98));
        assert_eq!(b.checked_sub(a).unwrap().as_decimal(), dec!(229.98));
        assert!(a.checked_sub(b).is_none());
    }

    #[test]
    fn test_points_serialize_as_number() -> anyhow::Result<()> {
        let p = Points::new(dec!(729.98))?;
        assert_eq!(serde_json::to_string(&p)?, "729.98");

        let back: Points = serde_json::from_str("500")?;
        assert_eq!(back.as_decimal(), dec!(500));

        assert!(serde_json::from_str::<Points>("-1").is_err());
        Ok(())
    }
}
