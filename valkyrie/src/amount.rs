//! Fixed-precision monetary amounts.
//!
//! Amounts are arbitrary-precision decimals internally. Whenever an amount
//! leaves the process (HTTP body or plugin frame) it is written with exactly
//! [`AMOUNT_SCALE`] decimal places, as a string. An amount that cannot be
//! represented at that scale without dropping significant digits is rejected
//! instead of being truncated.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Number of decimal places in the wire representation of an [`Amount`].
pub const AMOUNT_SCALE: u32 = 6;

/// Errors raised while validating or parsing amounts.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    /// Rounding to the wire scale would change the value.
    #[error("amount {amount} cannot be represented with {scale} decimal places without losing precision")]
    PrecisionLoss { amount: String, scale: u32 },

    /// The textual representation is not a decimal number.
    #[error("invalid amount: {0}")]
    Invalid(String),

    /// Arithmetic overflowed the decimal range.
    #[error("amount arithmetic overflow")]
    Overflow,
}

/// Signature of a pluggable rounding function.
///
/// A rounder returns the amount as it will be transmitted, or fails when
/// the value would change. Backends hand their rounder to transaction
/// mappers so the check happens before any I/O.
pub type AmountRounder = fn(Amount) -> Result<Amount, AmountError>;

/// A monetary amount.
///
/// Equality and ordering are numeric: `1.5` equals `1.500000`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    /// Wrap a decimal value.
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// The zero amount.
    pub const fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// The underlying decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Add two amounts, failing on overflow.
    pub fn checked_add(self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    /// Subtract `other` from this amount, failing on overflow.
    pub fn checked_sub(self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    /// Render the amount with exactly [`AMOUNT_SCALE`] decimal places.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::PrecisionLoss`] if the amount carries more
    /// significant decimals than the wire format can hold.
    pub fn to_wire_string(&self) -> Result<String, AmountError> {
        let mut rounded = round_amount(*self)?.0;
        rounded.rescale(AMOUNT_SCALE);
        Ok(rounded.to_string())
    }
}

/// Default rounder: round to [`AMOUNT_SCALE`] places and accept the result
/// only if it is numerically identical to the input.
///
/// Rounding therefore succeeds only when it drops insignificant trailing
/// zeros, which makes it idempotent.
pub fn round_amount(amount: Amount) -> Result<Amount, AmountError> {
    let rounded = amount
        .0
        .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointNearestEven);
    if rounded != amount.0 {
        return Err(AmountError::PrecisionLoss {
            amount: amount.0.to_string(),
            scale: AMOUNT_SCALE,
        });
    }
    Ok(Amount(rounded))
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str_exact(s.trim())
            .map(Amount)
            .map_err(|_| AmountError::Invalid(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = self.to_wire_string().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&wire)
    }
}

struct AmountVisitor;

impl de::Visitor<'_> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a decimal string with at most {AMOUNT_SCALE} decimal places")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Amount, E> {
        let amount = Amount::from_str(value).map_err(E::custom)?;
        round_amount(amount).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn test_round_accepts_six_decimals() {
        let a = amount("1.123456");
        assert_eq!(round_amount(a), Ok(a));
    }

    #[test]
    fn test_round_accepts_insignificant_trailing_zeros() {
        let a = amount("1.12345600000");
        assert_eq!(round_amount(a).unwrap(), amount("1.123456"));
    }

    #[test]
    fn test_round_rejects_seventh_decimal() {
        let err = round_amount(amount("1.1234567")).unwrap_err();
        assert!(matches!(err, AmountError::PrecisionLoss { scale: 6, .. }));
    }

    #[test]
    fn test_wire_string_has_fixed_scale() {
        assert_eq!(amount("10").to_wire_string().unwrap(), "10.000000");
        assert_eq!(amount("-0.5").to_wire_string().unwrap(), "-0.500000");
    }

    #[test]
    fn test_wire_string_rejects_precision_loss() {
        assert!(amount("0.0000001").to_wire_string().is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            "12,5".parse::<Amount>(),
            Err(AmountError::Invalid(_))
        ));
        assert!("".parse::<Amount>().is_err());
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(amount("1.5"), amount("1.500000"));
        assert!(amount("2") > amount("1.999999"));
    }

    #[test]
    fn test_checked_arithmetic() {
        let sum = amount("1.25").checked_add(amount("0.75")).unwrap();
        assert_eq!(sum, Amount::from(2));
        let diff = amount("1").checked_sub(amount("3")).unwrap();
        assert!(diff.is_negative());
        assert!(!Amount::zero().is_negative());
    }

    #[test]
    fn test_json_round_trip_is_a_string() {
        let json = serde_json::to_string(&amount("3.14")).unwrap();
        assert_eq!(json, "\"3.140000\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount("3.14"));
    }

    #[test]
    fn test_serialize_fails_instead_of_truncating() {
        assert!(serde_json::to_string(&amount("1.1234567")).is_err());
    }

    #[test]
    fn test_deserialize_rejects_excess_precision() {
        assert!(serde_json::from_str::<Amount>("\"1.1234567\"").is_err());
        assert!(serde_json::from_str::<Amount>("1.5").is_err());
    }
}
