//! # Money Module
//!
//! Provides the `Money` type and the single rounding rule used by every
//! fee, commission and allocation calculation in the engine.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  A 2.9% card fee on a $2.00 vend, in floating point:                    │
//! │    200 * 0.029 = 5.800000000000001  ❌ drifts across a month of sales   │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents + Basis Points                             │
//! │    200 cents * 290 bps / 10000 = 5.8 → round half up → 6 cents          │
//! │    Exactly one rounding step, in exactly one function                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use vendops_core::money::Money;
//! use vendops_core::types::BasisPoints;
//!
//! let gross = Money::from_cents(200);
//! let fee = gross.apply_bps(BasisPoints::from_bps(290)).unwrap();
//! assert_eq!(fee.cents(), 6);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::BasisPoints;

/// Denominator for basis-point arithmetic (10000 bps = 100%).
pub const BPS_DENOMINATOR: i64 = 10_000;

// =============================================================================
// Rounding
// =============================================================================

/// Computes `value * numer / denom` rounded half up, without intermediate
/// overflow.
///
/// This is the ONLY place in the engine where a fractional cent is turned
/// into a whole cent. Exact halves round toward positive infinity
/// (`5.5 → 6`, `-5.5 → -5`).
///
/// Returns `None` when `denom` is not positive or the result does not fit
/// in an `i64`.
///
/// ```rust
/// use vendops_core::money::mul_div_round_half_up;
///
/// assert_eq!(mul_div_round_half_up(200, 290, 10_000), Some(6)); // 5.8
/// assert_eq!(mul_div_round_half_up(25, 1, 10), Some(3));        // 2.5
/// assert_eq!(mul_div_round_half_up(24, 1, 10), Some(2));        // 2.4
/// assert_eq!(mul_div_round_half_up(1, 1, 0), None);
/// ```
pub fn mul_div_round_half_up(value: i64, numer: i64, denom: i64) -> Option<i64> {
    if denom <= 0 {
        return None;
    }

    let product = i128::from(value).checked_mul(i128::from(numer))?;
    let denom = i128::from(denom);

    // Euclidean division keeps the remainder in [0, denom) for negative
    // products too, so a single comparison decides the rounding.
    let quotient = product.div_euclid(denom);
    let remainder = product.rem_euclid(denom);
    let rounded = if remainder * 2 >= denom {
        quotient + 1
    } else {
        quotient
    };

    i64::try_from(rounded).ok()
}

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: variances and net amounts can be negative
/// - **Checked arithmetic**: engine code uses the `checked_*` methods so an
///   overflow surfaces as [`CoreError::ArithmeticOverflow`] instead of
///   wrapping
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Transaction.qty × unit_price ──► line total (gross)                    │
/// │        │                                                                │
/// │        ├──► FeeRuleResolver ──► fee ──► ReconciliationRow.calc_fees     │
/// │        │                                                                │
/// │        └──► TransactionAggregator ──► CommissionCalculator              │
/// │                                                                         │
/// │  CostPolicy.base_cents ──► CostAllocationEngine ──► allocated cents     │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit (dollars) portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit (cents) portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Adds two amounts, failing instead of wrapping.
    pub fn checked_add(self, other: Money) -> CoreResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| CoreError::overflow(format!("{} + {}", self, other)))
    }

    /// Subtracts two amounts, failing instead of wrapping.
    pub fn checked_sub(self, other: Money) -> CoreResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| CoreError::overflow(format!("{} - {}", self, other)))
    }

    /// Multiplies a unit amount by a quantity (line total).
    ///
    /// ```rust
    /// use vendops_core::money::Money;
    ///
    /// let line = Money::from_cents(125).checked_mul_quantity(3).unwrap();
    /// assert_eq!(line.cents(), 375);
    /// ```
    pub fn checked_mul_quantity(self, qty: i64) -> CoreResult<Money> {
        self.0
            .checked_mul(qty)
            .map(Money)
            .ok_or_else(|| CoreError::overflow(format!("{} x {}", self, qty)))
    }

    /// Applies a basis-point rate, rounding half up.
    ///
    /// Used for processor percentage fees, percent-of-gross commissions and
    /// percentage cost allocations.
    ///
    /// ## Example
    /// ```rust
    /// use vendops_core::money::Money;
    /// use vendops_core::types::BasisPoints;
    ///
    /// // 10% of $1,000.00
    /// let gross = Money::from_cents(100_000);
    /// let commission = gross.apply_bps(BasisPoints::from_bps(1000)).unwrap();
    /// assert_eq!(commission.cents(), 10_000);
    /// ```
    pub fn apply_bps(self, rate: BasisPoints) -> CoreResult<Money> {
        mul_div_round_half_up(self.0, i64::from(rate.bps()), BPS_DENOMINATOR)
            .map(Money)
            .ok_or_else(|| CoreError::overflow(format!("{} at {} bps", self, rate.bps())))
    }

    /// Scales the amount by `numer / denom`, rounding half up.
    ///
    /// Used for linear proration of monthly amounts.
    ///
    /// ```rust
    /// use vendops_core::money::Money;
    ///
    /// // 15 of 30 days of a $250.00 monthly fee
    /// let flat = Money::from_cents(25_000);
    /// assert_eq!(flat.prorate(15, 30).unwrap().cents(), 12_500);
    /// ```
    pub fn prorate(self, numer: i64, denom: i64) -> CoreResult<Money> {
        mul_div_round_half_up(self.0, numer, denom)
            .map(Money)
            .ok_or_else(|| CoreError::overflow(format!("{} prorated {}/{}", self, numer, denom)))
    }

    /// Sums an iterator of amounts with overflow checking.
    pub fn checked_sum<I>(amounts: I) -> CoreResult<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display implementation shows money in a human-readable format.
///
/// ## Note
/// This is for logs and error messages. Presentation formats amounts itself.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}${}.{:02}",
            sign,
            self.dollars().abs(),
            self.cents_part()
        )
    }
}

/// Default money is zero.
impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.dollars(), 10);
        assert_eq!(money.cents_part(), 99);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(500)), "$5.00");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(format!("{}", Money::from_cents(0)), "$0.00");
    }

    #[test]
    fn test_round_half_up_positive() {
        assert_eq!(mul_div_round_half_up(200, 290, 10_000), Some(6)); // 5.8
        assert_eq!(mul_div_round_half_up(150, 1, 100), Some(2)); // 1.5
        assert_eq!(mul_div_round_half_up(149, 1, 100), Some(1)); // 1.49
        assert_eq!(mul_div_round_half_up(0, 290, 10_000), Some(0));
    }

    #[test]
    fn test_round_half_up_negative_goes_toward_positive_infinity() {
        assert_eq!(mul_div_round_half_up(-150, 1, 100), Some(-1)); // -1.5
        assert_eq!(mul_div_round_half_up(-151, 1, 100), Some(-2)); // -1.51
        assert_eq!(mul_div_round_half_up(-149, 1, 100), Some(-1)); // -1.49
    }

    #[test]
    fn test_round_rejects_bad_denominator_and_overflow() {
        assert_eq!(mul_div_round_half_up(10, 1, 0), None);
        assert_eq!(mul_div_round_half_up(10, 1, -5), None);
        assert_eq!(mul_div_round_half_up(i64::MAX, 2, 1), None);
        // Intermediate product overflows i64 but the result fits.
        assert_eq!(mul_div_round_half_up(i64::MAX, 10, 10), Some(i64::MAX));
    }

    #[test]
    fn test_apply_bps() {
        let gross = Money::from_cents(100_000);
        assert_eq!(
            gross.apply_bps(BasisPoints::from_bps(1000)).unwrap().cents(),
            10_000
        );
        assert_eq!(
            Money::from_cents(1000)
                .apply_bps(BasisPoints::from_bps(825))
                .unwrap()
                .cents(),
            83
        );
    }

    #[test]
    fn test_prorate() {
        let flat = Money::from_cents(25_000);
        assert_eq!(flat.prorate(15, 30).unwrap().cents(), 12_500);
        assert_eq!(flat.prorate(30, 30).unwrap().cents(), 25_000);
        assert_eq!(Money::from_cents(100).prorate(1, 3).unwrap().cents(), 33);
        assert_eq!(Money::from_cents(100).prorate(2, 3).unwrap().cents(), 67);
    }

    #[test]
    fn test_checked_ops_report_overflow() {
        let max = Money::from_cents(i64::MAX);
        assert!(matches!(
            max.checked_add(Money::from_cents(1)),
            Err(CoreError::ArithmeticOverflow { .. })
        ));
        assert!(matches!(
            Money::from_cents(i64::MIN).checked_sub(Money::from_cents(1)),
            Err(CoreError::ArithmeticOverflow { .. })
        ));
        assert!(max.checked_mul_quantity(2).is_err());
        assert_eq!(
            Money::from_cents(299).checked_mul_quantity(3).unwrap().cents(),
            897
        );
    }

    #[test]
    fn test_checked_sum() {
        let total =
            Money::checked_sum([100, 250, -50].into_iter().map(Money::from_cents)).unwrap();
        assert_eq!(total.cents(), 300);
        assert!(Money::checked_sum([Money::from_cents(i64::MAX), Money::from_cents(1)]).is_err());
    }

    #[test]
    fn test_zero_and_checks() {
        let zero = Money::zero();
        assert!(zero.is_zero());
        assert!(!zero.is_positive());
        assert!(!zero.is_negative());
        assert_eq!(Money::from_cents(-100).abs().cents(), 100);
        assert!(Money::from_cents(-100).is_negative());
    }
}
