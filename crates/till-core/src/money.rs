//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    All amounts are i64 cents. The only float→cents conversion in the   │
//! │    whole system happens once, at the external-invoice boundary, via    │
//! │    `Money::from_euros`.                                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: allows negative values for corrections and refunds
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **Transparent serde**: serializes as a bare integer, like the cents
///   columns in the store
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Converts a float euro amount to cents, rounding half away from zero.
    ///
    /// ## The Only Float Boundary
    /// External invoice payloads carry float euros; this is the single place
    /// they become integers. Everything downstream is integer arithmetic.
    #[inline]
    pub fn from_euros(euros: f64) -> Self {
        Money((euros * 100.0).round() as i64)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero amount.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the amount is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Applies a VAT rate, returning the tax portion.
    ///
    /// Uses round-half-to-even on the bps product, so repeated ingestion of
    /// the same line always yields the same tax cents.
    pub fn vat(&self, rate: VatRate) -> Money {
        let numerator = self.0 * rate.bps() as i64;
        let quotient = numerator / 10_000;
        let remainder = numerator % 10_000;

        // Banker's rounding on the remainder
        let rounded = if remainder.abs() * 2 > 10_000
            || (remainder.abs() * 2 == 10_000 && quotient % 2 != 0)
        {
            quotient + numerator.signum()
        } else {
            quotient
        };
        Money(rounded)
    }
}

impl Add for Money {
    type Output = Money;

    #[inline]
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    #[inline]
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Mul<i64> for Money {
    type Output = Money;

    #[inline]
    fn mul(self, rhs: i64) -> Money {
        Money(self.0 * rhs)
    }
}

impl fmt::Display for Money {
    /// Formats as a decimal amount, e.g. `12.50` or `-3.07`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

// =============================================================================
// VAT Rate
// =============================================================================

/// VAT rate represented in basis points (bps).
///
/// 1 basis point = 0.01% = 1/10000, so 2000 bps = 20% (standard French VAT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VatRate(u32);

impl VatRate {
    /// Creates a VAT rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        VatRate(bps)
    }

    /// Creates a VAT rate from a percentage (for payload normalization).
    pub fn from_percentage(pct: f64) -> Self {
        VatRate((pct * 100.0).round() as u32)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero rate.
    #[inline]
    pub const fn zero() -> Self {
        VatRate(0)
    }
}

impl Default for VatRate {
    fn default() -> Self {
        VatRate::zero()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_euros_rounds() {
        assert_eq!(Money::from_euros(10.99).cents(), 1099);
        assert_eq!(Money::from_euros(0.1).cents(), 10);
        assert_eq!(Money::from_euros(149.999).cents(), 15000);
        assert_eq!(Money::from_euros(-5.50).cents(), -550);
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(250);
        assert_eq!((a + b).cents(), 1250);
        assert_eq!((a - b).cents(), 750);
        assert_eq!((b * 3).cents(), 750);
    }

    #[test]
    fn test_vat_twenty_percent() {
        let base = Money::from_cents(10_000); // 100.00
        let vat = base.vat(VatRate::from_bps(2000));
        assert_eq!(vat.cents(), 2_000); // 20.00
    }

    #[test]
    fn test_vat_rounding_is_stable() {
        let base = Money::from_cents(333);
        let rate = VatRate::from_bps(2000);
        assert_eq!(base.vat(rate), base.vat(rate));
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1250).to_string(), "12.50");
        assert_eq!(Money::from_cents(-307).to_string(), "-3.07");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn test_vat_rate_from_percentage() {
        assert_eq!(VatRate::from_percentage(20.0).bps(), 2000);
        assert_eq!(VatRate::from_percentage(5.5).bps(), 550);
    }
}
