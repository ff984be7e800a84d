//! # Domain Types
//!
//! Rates, time windows and the raw records the engine folds over.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │  Transaction    │   │    Machine      │   │ ProcessorAssignment │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  machine_id     │──►│  id             │◄──│  machine_id         │   │
//! │  │  occurred_at    │   │  location_id?   │   │  processor_id       │   │
//! │  │  qty            │   │  processor_id?  │   │  effective window   │   │
//! │  │  unit_price     │   └─────────────────┘   └─────────────────────┘   │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │  BasisPoints    │   │     Period      │   │ SettlementStatement │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  bps (u32)      │   │  [start, end)   │   │  processor_id       │   │
//! │  │  290 = 2.90%    │   │  reporting span │   │  gross/fees/net     │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Time Convention
//! Every window in the engine is half-open `[start, end)`. The only closed
//! interval is a settlement statement's reported `[period_start, period_end]`,
//! because that is how processors print them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

/// Seconds in the 30-day reference month used for proration.
pub const REFERENCE_MONTH_SECONDS: i64 = 30 * SECONDS_PER_DAY;

/// Seconds per day.
pub const SECONDS_PER_DAY: i64 = 86_400;

// =============================================================================
// Basis Points
// =============================================================================

/// A percentage represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 290 bps = 2.90% (a typical card-present processor rate)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export)]
pub struct BasisPoints(u32);

impl BasisPoints {
    /// Creates a rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        BasisPoints(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero rate.
    #[inline]
    pub const fn zero() -> Self {
        BasisPoints(0)
    }

    /// Checks if the rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// Period
// =============================================================================

/// A reporting period `[start, end)` in UTC.
///
/// Deserialized periods are not trusted: every engine entry point calls
/// [`Period::validate`] before folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Period {
    #[ts(as = "String")]
    pub start: DateTime<Utc>,
    #[ts(as = "String")]
    pub end: DateTime<Utc>,
}

impl Period {
    /// Creates a validated period.
    ///
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use vendops_core::types::Period;
    ///
    /// let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    /// let end = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
    /// assert!(Period::new(start, end).is_ok());
    /// assert!(Period::new(end, start).is_err());
    /// assert!(Period::new(start, start).is_err());
    /// ```
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        let period = Period { start, end };
        period.validate()?;
        Ok(period)
    }

    /// Rejects zero-length and inverted periods.
    pub fn validate(&self) -> CoreResult<()> {
        if self.start >= self.end {
            return Err(CoreError::InvalidPeriod {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Checks if a timestamp falls inside `[start, end)`.
    #[inline]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Length of the period in whole seconds.
    pub fn seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }

    /// Intersection of two periods, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Period) -> Option<Period> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Period { start, end })
    }
}

// =============================================================================
// Effective Window
// =============================================================================

/// The half-open validity window of a versioned record.
///
/// Records are superseded by inserting a new version with a later
/// `effective_start`, never by editing the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveWindow {
    pub start: DateTime<Utc>,
    /// `None` = open-ended.
    pub end: Option<DateTime<Utc>>,
}

impl EffectiveWindow {
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        EffectiveWindow { start, end }
    }

    /// Checks if the window is active at `at`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && self.end.map_or(true, |end| at < end)
    }

    /// Clips the window to a period.
    pub fn clip(&self, period: &Period) -> Option<Period> {
        let start = self.start.max(period.start);
        let end = self.end.map_or(period.end, |end| end.min(period.end));
        (start < end).then_some(Period { start, end })
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A single vend recorded by a machine.
///
/// Append-only: the engine never mutates a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub machine_id: String,
    pub occurred_at: DateTime<Utc>,
    pub qty: i64,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub unit_cost_cents: i64,
}

impl Transaction {
    /// Line total (`qty × unit_price`): the gross the fee and commission
    /// are computed on.
    pub fn line_total(&self) -> CoreResult<Money> {
        Money::from_cents(self.unit_price_cents).checked_mul_quantity(self.qty)
    }

    /// Line cost (`qty × unit_cost`).
    pub fn line_cost(&self) -> CoreResult<Money> {
        Money::from_cents(self.unit_cost_cents).checked_mul_quantity(self.qty)
    }
}

// =============================================================================
// Machine
// =============================================================================

/// A vending machine and its current placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    /// Fallback processor link, used when no [`ProcessorAssignment`] is
    /// active at a transaction's timestamp.
    #[serde(default)]
    pub processor_id: Option<String>,
}

/// A time-versioned link from a machine to its card processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorAssignment {
    pub machine_id: String,
    pub processor_id: String,
    pub effective_start: DateTime<Utc>,
    #[serde(default)]
    pub effective_end: Option<DateTime<Utc>>,
}

impl ProcessorAssignment {
    pub fn window(&self) -> EffectiveWindow {
        EffectiveWindow::new(self.effective_start, self.effective_end)
    }
}

// =============================================================================
// Settlement Statement
// =============================================================================

/// A processor-reported payout summary. Reconciliation ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementStatement {
    pub id: String,
    pub processor_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub gross_cents: i64,
    pub fees_cents: i64,
    pub net_cents: i64,
}

impl SettlementStatement {
    /// Checks whether the closed statement range `[period_start, period_end]`
    /// overlaps the half-open `period`.
    pub fn overlaps(&self, period: &Period) -> bool {
        self.period_start < period.end && self.period_end >= period.start
    }

    /// `gross - fees` as the processor should have reported it.
    pub fn expected_net(&self) -> CoreResult<Money> {
        Money::from_cents(self.gross_cents).checked_sub(Money::from_cents(self.fees_cents))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_basis_points() {
        let rate = BasisPoints::from_bps(290);
        assert_eq!(rate.bps(), 290);
        assert!(!rate.is_zero());
        assert!(BasisPoints::default().is_zero());
    }

    #[test]
    fn test_period_is_half_open() {
        let period = Period::new(ts(1), ts(16)).unwrap();
        assert!(period.contains(ts(1)));
        assert!(period.contains(ts(15)));
        assert!(!period.contains(ts(16)));
        assert_eq!(period.seconds(), 15 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_invalid_period() {
        assert!(matches!(
            Period::new(ts(5), ts(5)),
            Err(CoreError::InvalidPeriod { .. })
        ));
        assert!(matches!(
            Period::new(ts(6), ts(5)),
            Err(CoreError::InvalidPeriod { .. })
        ));
    }

    #[test]
    fn test_period_intersect() {
        let a = Period::new(ts(1), ts(10)).unwrap();
        let b = Period::new(ts(5), ts(20)).unwrap();
        assert_eq!(a.intersect(&b), Some(Period::new(ts(5), ts(10)).unwrap()));

        let c = Period::new(ts(10), ts(20)).unwrap();
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_effective_window() {
        let open = EffectiveWindow::new(ts(5), None);
        assert!(!open.contains(ts(4)));
        assert!(open.contains(ts(5)));
        assert!(open.contains(ts(30)));

        let closed = EffectiveWindow::new(ts(5), Some(ts(10)));
        assert!(closed.contains(ts(9)));
        assert!(!closed.contains(ts(10)));

        let period = Period::new(ts(1), ts(8)).unwrap();
        assert_eq!(closed.clip(&period), Some(Period::new(ts(5), ts(8)).unwrap()));
        assert_eq!(
            EffectiveWindow::new(ts(20), None).clip(&period),
            None
        );
    }

    #[test]
    fn test_line_total() {
        let tx = Transaction {
            id: "tx-1".to_string(),
            machine_id: "vm-1".to_string(),
            occurred_at: ts(3),
            qty: 2,
            unit_price_cents: 175,
            unit_cost_cents: 60,
        };
        assert_eq!(tx.line_total().unwrap().cents(), 350);
        assert_eq!(tx.line_cost().unwrap().cents(), 120);
    }

    #[test]
    fn test_statement_overlap_is_closed_on_both_ends() {
        let stmt = SettlementStatement {
            id: "st-1".to_string(),
            processor_id: "p".to_string(),
            period_start: ts(1),
            period_end: ts(10),
            gross_cents: 1000,
            fees_cents: 30,
            net_cents: 970,
        };
        // Statement ends exactly where the period starts: still overlaps.
        assert!(stmt.overlaps(&Period::new(ts(10), ts(20)).unwrap()));
        assert!(!stmt.overlaps(&Period::new(ts(11), ts(20)).unwrap()));
        // Period ends exactly where the statement starts: half-open, no overlap.
        assert!(!stmt.overlaps(
            &Period::new(Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap(), ts(1)).unwrap()
        ));
        assert_eq!(stmt.expected_net().unwrap().cents(), 970);
    }
}
