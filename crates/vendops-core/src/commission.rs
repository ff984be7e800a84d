//! # Commission Calculator
//!
//! Computes what a location is owed for a period under its commission
//! agreement.
//!
//! ## Segmenting
//! A period can straddle several versions of a location's policy. The period
//! is cut at every version boundary and each segment is priced with the
//! version active in it:
//!
//! ```text
//!   period      [───────────────────────────────────────────)
//!   policy v1   [──────────────)
//!   policy v2                        [──────────────────────────── …
//!
//!   segments    [──── v1 ─────)[ gap )[────────── v2 ────────)
//!                                 │
//!                                 └── NoCommissionPolicy warning, 0¢
//! ```
//!
//! ## Per-Segment Formula
//! ```text
//! percent  = round_half_up(gross × pct_bps / 10000)
//! flat     = round_half_up(flat_cents × seconds / 30 days)
//! floor    = round_half_up(min_cents × seconds / 30 days)   (min_cents > 0)
//! cents    = max(percent + flat, floor)
//! ```
//!
//! The floor is enforced even when the segment has no sales.
//!
//! Transactions are read once: each is bucketed into the segment whose span
//! contains it, however many policy versions the period crosses.

use serde::Serialize;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::aggregator::{Aggregation, TransactionAggregator, DEFAULT_CHUNK_SIZE};
use crate::budget::BudgetGuard;
use crate::directory::MachineDirectory;
use crate::error::CoreResult;
use crate::money::Money;
use crate::policy::{CommissionModel, CommissionPolicy};
use crate::types::{Period, Transaction, REFERENCE_MONTH_SECONDS};
use crate::validation::validate_id;
use crate::warning::{canonicalize, Warning};

// =============================================================================
// Result Types
// =============================================================================

/// One span of the period priced under a single policy version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct CommissionSegment {
    pub period: Period,
    /// `None` when no policy covered the span.
    pub model: Option<CommissionModel>,
    pub tx_count: u64,
    pub gross: Money,
    pub percent_component: Money,
    pub flat_component: Money,
    /// Prorated minimum for the span (zero when no minimum applies).
    pub floor_cents: Money,
    /// Top-up paid because the computed amount fell below the floor.
    pub floor_adjustment: Money,
    pub cents: Money,
}

/// Totals behind a commission figure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct CommissionBreakdown {
    pub gross: Money,
    pub percent_component: Money,
    pub flat_component: Money,
    pub floor_adjustment: Money,
    pub segments: Vec<CommissionSegment>,
}

/// Commission owed to one location for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct CommissionResult {
    pub location_id: String,
    pub period: Period,
    pub cents: Money,
    pub breakdown: CommissionBreakdown,
    pub warnings: Vec<Warning>,
}

// =============================================================================
// Calculator
// =============================================================================

/// Prices a location's sales against its commission policy versions.
#[derive(Debug, Clone)]
pub struct CommissionCalculator<'a> {
    directory: &'a MachineDirectory<'a>,
    policies: &'a [CommissionPolicy],
    transactions: &'a [Transaction],
    guard: Option<&'a BudgetGuard>,
    chunk_size: usize,
}

impl<'a> CommissionCalculator<'a> {
    pub fn new(
        directory: &'a MachineDirectory<'a>,
        policies: &'a [CommissionPolicy],
        transactions: &'a [Transaction],
    ) -> Self {
        CommissionCalculator {
            directory,
            policies,
            transactions,
            guard: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_budget(mut self, guard: &'a BudgetGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Computes the commission owed to `location_id` over `period`.
    ///
    /// ## Example
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use vendops_core::commission::CommissionCalculator;
    /// use vendops_core::directory::MachineDirectory;
    /// use vendops_core::policy::{CommissionPolicy, CommissionPolicyRecord};
    /// use vendops_core::types::Period;
    ///
    /// let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    /// let policies = vec![CommissionPolicy::try_from(CommissionPolicyRecord {
    ///     location_id: "loc-1".to_string(),
    ///     model: "none".to_string(),
    ///     pct_bps: 0,
    ///     flat_cents: 0,
    ///     min_cents: 5_000,
    ///     effective_start: start,
    ///     effective_end: None,
    /// })
    /// .unwrap()];
    ///
    /// let directory = MachineDirectory::new(&[], &[]);
    /// let calculator = CommissionCalculator::new(&directory, &policies, &[]);
    /// let period = Period::new(start, Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()).unwrap();
    ///
    /// // No sales, but the monthly minimum still applies.
    /// let result = calculator.compute("loc-1", &period).unwrap();
    /// assert_eq!(result.cents.cents(), 5_000);
    /// ```
    pub fn compute(&self, location_id: &str, period: &Period) -> CoreResult<CommissionResult> {
        period.validate()?;
        validate_id("location_id", location_id)?;

        let policies: Vec<&CommissionPolicy> = self
            .policies
            .iter()
            .filter(|p| p.location_id == location_id)
            .collect();

        let spans = segment(period, &policies);
        let partials = self.bucket(location_id, period, &spans)?;

        let mut breakdown = CommissionBreakdown::default();
        let mut warnings = Vec::new();

        for ((span, policy), aggregation) in spans.into_iter().zip(partials) {
            let aggregation = aggregation.finish();
            let totals = aggregation.totals()?;
            warnings.extend(aggregation.all_warnings());

            if policy.is_none() {
                warn!(
                    location_id = %location_id,
                    start = %span.start,
                    end = %span.end,
                    "No commission policy active"
                );
                warnings.push(Warning::NoCommissionPolicy {
                    location_id: location_id.to_string(),
                    start: span.start,
                    end: span.end,
                });
            }

            let segment = price_segment(span, policy, totals.tx_count, totals.gross)?;
            debug!(
                location_id = %location_id,
                start = %span.start,
                end = %span.end,
                model = ?segment.model.map(|m| m.tag()),
                gross = %segment.gross,
                cents = %segment.cents,
                "Priced commission segment"
            );

            breakdown.gross = breakdown.gross.checked_add(segment.gross)?;
            breakdown.percent_component = breakdown
                .percent_component
                .checked_add(segment.percent_component)?;
            breakdown.flat_component = breakdown.flat_component.checked_add(segment.flat_component)?;
            breakdown.floor_adjustment = breakdown
                .floor_adjustment
                .checked_add(segment.floor_adjustment)?;
            breakdown.segments.push(segment);
        }

        let cents = Money::checked_sum(breakdown.segments.iter().map(|s| s.cents))?;
        canonicalize(&mut warnings);

        info!(
            location_id = %location_id,
            segments = breakdown.segments.len(),
            gross = %breakdown.gross,
            cents = %cents,
            warnings = warnings.len(),
            "Computed commission"
        );

        Ok(CommissionResult {
            location_id: location_id.to_string(),
            period: *period,
            cents,
            breakdown,
            warnings,
        })
    }

    /// One pass over the transactions, folding each into the span that
    /// contains it. `spans` must be contiguous and cover `period`.
    fn bucket(
        &self,
        location_id: &str,
        period: &Period,
        spans: &[(Period, Option<&CommissionPolicy>)],
    ) -> CoreResult<Vec<Aggregation>> {
        let aggregators: Vec<TransactionAggregator> = spans
            .iter()
            .map(|(span, _)| {
                TransactionAggregator::new(*span, self.directory).for_location(location_id)
            })
            .collect();
        let mut partials = vec![Aggregation::default(); spans.len()];

        for chunk in self.transactions.chunks(self.chunk_size) {
            if let Some(guard) = self.guard {
                guard.check_time()?;
            }
            for tx in chunk {
                if !period.contains(tx.occurred_at) {
                    continue;
                }
                let idx = spans
                    .partition_point(|(span, _)| span.start <= tx.occurred_at)
                    .saturating_sub(1);
                if let (Some(aggregator), Some(acc)) =
                    (aggregators.get(idx), partials.get_mut(idx))
                {
                    aggregator.fold(acc, tx)?;
                }
            }
        }

        Ok(partials)
    }
}

/// Cuts `period` at every policy boundary and pairs each span with the
/// version active in it. Adjacent spans under the same version are joined.
fn segment<'p>(
    period: &Period,
    policies: &[&'p CommissionPolicy],
) -> Vec<(Period, Option<&'p CommissionPolicy>)> {
    let mut cuts = vec![period.start, period.end];
    for policy in policies {
        cuts.push(policy.window.start);
        cuts.extend(policy.window.end);
    }
    cuts.retain(|t| period.start <= *t && *t <= period.end);
    cuts.sort();
    cuts.dedup();

    let mut spans: Vec<(Period, Option<usize>)> = Vec::new();
    for pair in cuts.windows(2) {
        let span = Period {
            start: pair[0],
            end: pair[1],
        };
        let active = policies
            .iter()
            .enumerate()
            .filter(|(_, p)| p.window.contains(span.start))
            .max_by_key(|(idx, p)| (p.window.start, *idx))
            .map(|(idx, _)| idx);

        match spans.last_mut() {
            Some((last, last_active)) if *last_active == active => last.end = span.end,
            _ => spans.push((span, active)),
        }
    }

    spans
        .into_iter()
        .map(|(span, active)| (span, active.map(|idx| policies[idx])))
        .collect()
}

fn price_segment(
    span: Period,
    policy: Option<&CommissionPolicy>,
    tx_count: u64,
    gross: Money,
) -> CoreResult<CommissionSegment> {
    let seconds = span.seconds();
    let model = policy.map(|p| p.model);

    let percent_component = match model.and_then(|m| m.pct_bps()) {
        Some(rate) => gross.apply_bps(rate)?,
        None => Money::zero(),
    };
    let flat_component = match model.and_then(|m| m.flat_cents()) {
        Some(flat) => flat.prorate(seconds, REFERENCE_MONTH_SECONDS)?,
        None => Money::zero(),
    };
    let subtotal = percent_component.checked_add(flat_component)?;

    let floor_cents = match policy {
        Some(p) if p.min_cents.is_positive() => p.min_cents.prorate(seconds, REFERENCE_MONTH_SECONDS)?,
        _ => Money::zero(),
    };
    let floor_adjustment = if floor_cents > subtotal {
        floor_cents.checked_sub(subtotal)?
    } else {
        Money::zero()
    };

    Ok(CommissionSegment {
        period: span,
        model,
        tx_count,
        gross,
        percent_component,
        flat_component,
        floor_cents,
        floor_adjustment,
        cents: subtotal.checked_add(floor_adjustment)?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
