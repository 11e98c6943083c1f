//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Quantities, prices and money amounts all flow through this type. It parses
//! canonically from strings (the SQLite storage format), serializes to JSON
//! numbers, and offers zero-safe division for the analytics code.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Lossless decimal numeric type for financial calculations.
///
/// Backed by rust_decimal to avoid floating-point drift.
/// Serializes to JSON number (not string) by default.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    /// Create a Decimal from a RustDecimal.
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Decimal)
    }

    /// Convert an upstream JSON float. Returns None for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        RustDecimal::from_f64(value).map(Decimal)
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    /// Get the underlying RustDecimal.
    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    /// Round to `dp` decimal places (banker's rounding).
    pub fn round_dp(&self, dp: u32) -> Self {
        Decimal(self.0.round_dp(dp))
    }

    /// Returns the value 100.
    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    /// `self / divisor`, or zero when the divisor is zero or the result overflows.
    pub fn ratio_or_zero(self, divisor: Decimal) -> Decimal {
        if divisor.is_zero() {
            return Decimal::zero();
        }
        self.0
            .checked_div(divisor.0)
            .map(Decimal)
            .unwrap_or_default()
    }

    /// `self / divisor × 100`, or zero when the divisor is zero or the result overflows.
    pub fn percent_of(self, divisor: Decimal) -> Decimal {
        self.ratio_or_zero(divisor)
            .checked_mul(Decimal::hundred())
            .unwrap_or_default()
    }

    /// `self + rhs`, or None on overflow.
    pub fn checked_add(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_add(rhs.0).map(Decimal)
    }

    /// `self - rhs`, or None on overflow.
    pub fn checked_sub(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_sub(rhs.0).map(Decimal)
    }

    /// `self × rhs`, or None on overflow.
    pub fn checked_mul(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }

    /// Sum of `values`, or None as soon as an addition overflows.
    pub fn checked_sum<I: IntoIterator<Item = Decimal>>(values: I) -> Option<Decimal> {
        values
            .into_iter()
            .try_fold(Decimal::zero(), |acc, value| acc.checked_add(value))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    /// Panics on a zero divisor; use [`Decimal::ratio_or_zero`] when the divisor may be zero.
    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc + d)
    }
}

impl<'a> Sum<&'a Decimal> for Decimal {
    fn sum<I: Iterator<Item = &'a Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc + *d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_decimal_canonical_strips_trailing_zeros() {
        assert_eq!(d("1.2300").to_canonical_string(), "1.23");
        assert_eq!(d("65000.000").to_canonical_string(), "65000");
        assert_eq!(d(" 0.5 ").to_canonical_string(), "0.5");
    }

    #[test]
    fn test_decimal_arithmetic() {
        let a = d("10.5");
        let b = d("2.5");

        assert_eq!((a + b).to_canonical_string(), "13");
        assert_eq!((a - b).to_canonical_string(), "8");
        assert_eq!((a * b).to_canonical_string(), "26.25");
        assert_eq!((a / b).to_canonical_string(), "4.2");
    }

    #[test]
    fn test_ratio_or_zero_handles_zero_divisor() {
        assert_eq!(d("10").ratio_or_zero(Decimal::zero()), Decimal::zero());
        assert_eq!(d("10").ratio_or_zero(d("4")), d("2.5"));
        assert_eq!(d("1").percent_of(d("4")), d("25"));
        assert_eq!(d("1").percent_of(Decimal::zero()), Decimal::zero());
    }

    #[test]
    fn test_checked_ops_report_overflow() {
        let huge = d("1000000000000000");
        assert_eq!(huge.checked_mul(huge), None);
        assert_eq!(d("2").checked_mul(d("3")), Some(d("6")));
        assert_eq!(d("1.5").checked_add(d("1.5")), Some(d("3")));
        assert_eq!(d("1").checked_sub(d("4")), Some(d("-3")));

        let max = Decimal::new(RustDecimal::MAX);
        assert_eq!(max.checked_add(d("1")), None);
        assert_eq!(Decimal::checked_sum(vec![max, max]), None);
        assert_eq!(Decimal::checked_sum(vec![d("1"), d("2")]), Some(d("3")));

        // the percent form falls back to zero rather than panicking
        assert_eq!(max.percent_of(d("1")), Decimal::zero());
    }

    #[test]
    fn test_from_f64() {
        assert_eq!(Decimal::from_f64(67000.0), Some(d("67000")));
        assert_eq!(Decimal::from_f64(-2.5), Some(d("-2.5")));
        assert_eq!(Decimal::from_f64(f64::NAN), None);
    }

    #[test]
    fn test_decimal_sum() {
        let values = vec![d("1.5"), d("2"), d("0.25")];
        let total: Decimal = values.iter().sum();
        assert_eq!(total, d("3.75"));
    }

    #[test]
    fn test_decimal_json_serialization() {
        let json = serde_json::to_value(d("123.456")).unwrap();
        assert!(json.is_number());
        assert_eq!(json.to_string(), "123.456");
    }
}
