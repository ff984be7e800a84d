//! # Reconciliation Engine
//!
//! Compares what we computed from raw vends against what each card
//! processor says it settled, per processor, for one period.
//!
//! ## Report Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  processor     calc_gross  calc_fees  stmt_gross  stmt_fees  var_fees  │
//! │  ───────────   ──────────  ─────────  ──────────  ─────────  ────────  │
//! │  square           100000       500      100000       480        20 ⚑  │
//! │  stripe            40000       300       40000       300         0    │
//! │  (unmapped)         1200         0           0         0         0    │
//! │                                                                         │
//! │  var_x = calc_x - stmt_x                                                │
//! │  ⚑ flagged when |var_fees| > threshold                                 │
//! │  rows sorted by |var_fees| desc, then processor id                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Statement Overlap
//! Statements cover the closed range `[period_start, period_end]`; one is
//! counted when that range touches the requested half-open period at all.
//! Statements that straddle the period boundary are counted whole.
//!
//! ## Streaming
//! [`ReconciliationEngine::reconcile_stream`] takes transactions from any
//! iterator (a database cursor, a line-by-line export reader) and folds them
//! without holding the whole month in memory.

use std::borrow::Borrow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::aggregator::{GroupTotals, TransactionAggregator, DEFAULT_CHUNK_SIZE};
use crate::budget::BudgetGuard;
use crate::directory::MachineDirectory;
use crate::error::{CoreError, CoreResult};
use crate::fees::FeeRuleResolver;
use crate::money::Money;
use crate::types::{Period, SettlementStatement, Transaction};
use crate::validation::{validate_id, validate_non_negative_cents};
use crate::warning::{canonicalize, RecordKind, Warning};

/// Row id for transactions whose machine has no processor.
pub const UNMAPPED_PROCESSOR: &str = "(unmapped)";

/// Default variance tolerance in cents.
pub const DEFAULT_VARIANCE_THRESHOLD_CENTS: i64 = 1;

// =============================================================================
// Types
// =============================================================================

/// Which processors a report covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "scope", content = "processor_id", rename_all = "snake_case")]
pub enum ReconcileScope {
    #[default]
    All,
    Processor(String),
}

impl ReconcileScope {
    fn includes(&self, processor_id: &str) -> bool {
        match self {
            ReconcileScope::All => true,
            ReconcileScope::Processor(id) => id == processor_id,
        }
    }
}

/// Calculated vs reported figures for one processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct ReconciliationRow {
    pub processor_id: String,
    pub calc_gross: Money,
    pub calc_fees: Money,
    pub calc_net: Money,
    pub stmt_gross: Money,
    pub stmt_fees: Money,
    pub stmt_net: Money,
    pub var_gross: Money,
    pub var_fees: Money,
    pub var_net: Money,
    pub tx_count: u64,
    pub stmt_count: u64,
    pub flagged: bool,
    pub warnings: Vec<Warning>,
}

/// Column sums over every row of a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct ReconciliationTotals {
    pub calc_gross: Money,
    pub calc_fees: Money,
    pub calc_net: Money,
    pub stmt_gross: Money,
    pub stmt_fees: Money,
    pub stmt_net: Money,
    pub var_gross: Money,
    pub var_fees: Money,
    pub var_net: Money,
    pub tx_count: u64,
    pub stmt_count: u64,
    pub flagged_rows: u64,
    /// Malformed transactions in the window, reported as warnings.
    pub excluded_transactions: u64,
    /// Statements with an inverted period, reported as warnings.
    pub excluded_statements: u64,
}

/// The terminal output of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct ReconciliationReport {
    pub period: Period,
    pub scope: ReconcileScope,
    pub threshold_cents: Money,
    pub rows: Vec<ReconciliationRow>,
    pub totals: ReconciliationTotals,
    /// Warnings not tied to a single processor.
    pub warnings: Vec<Warning>,
}

impl ReconciliationReport {
    pub fn flagged(&self) -> impl Iterator<Item = &ReconciliationRow> {
        self.rows.iter().filter(|r| r.flagged)
    }

    pub fn row(&self, processor_id: &str) -> Option<&ReconciliationRow> {
        self.rows.iter().find(|r| r.processor_id == processor_id)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Builds variance reports from transactions, fee rules and statements.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine<'a> {
    directory: &'a MachineDirectory<'a>,
    fees: &'a FeeRuleResolver<'a>,
    transactions: &'a [Transaction],
    statements: &'a [SettlementStatement],
    threshold: Money,
    guard: Option<&'a BudgetGuard>,
    chunk_size: usize,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(
        directory: &'a MachineDirectory<'a>,
        fees: &'a FeeRuleResolver<'a>,
        transactions: &'a [Transaction],
        statements: &'a [SettlementStatement],
    ) -> Self {
        ReconciliationEngine {
            directory,
            fees,
            transactions,
            statements,
            threshold: Money::from_cents(DEFAULT_VARIANCE_THRESHOLD_CENTS),
            guard: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the `|var_fees|` tolerance above which a row is flagged.
    pub fn with_threshold(mut self, threshold: Money) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_budget(mut self, guard: &'a BudgetGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Reconciles `period` for the processors in `scope`.
    pub fn reconcile(
        &self,
        period: &Period,
        scope: &ReconcileScope,
    ) -> CoreResult<ReconciliationReport> {
        self.reconcile_stream(period, scope, self.transactions)
    }

    /// Like [`reconcile`](Self::reconcile), but reads transactions from
    /// `transactions` instead of the slice given to [`new`](Self::new).
    pub fn reconcile_stream<I>(
        &self,
        period: &Period,
        scope: &ReconcileScope,
        transactions: I,
    ) -> CoreResult<ReconciliationReport>
    where
        I: IntoIterator,
        I::Item: Borrow<Transaction>,
    {
        period.validate()?;
        validate_non_negative_cents("variance_threshold_cents", self.threshold.cents())?;
        if let ReconcileScope::Processor(id) = scope {
            validate_id("processor_id", id)?;
        }

        let aggregator = TransactionAggregator::new(*period, self.directory)
            .with_fees(self.fees)
            .with_chunk_size(self.chunk_size);
        let aggregation = match self.guard {
            Some(guard) => aggregator.with_budget(guard),
            None => aggregator,
        }
        .ingest_iter(transactions)?;

        let mut rows: BTreeMap<String, ReconciliationRow> = BTreeMap::new();
        let mut report_warnings = Vec::new();
        let mut totals = ReconciliationTotals {
            excluded_transactions: aggregation.excluded,
            ..ReconciliationTotals::default()
        };

        for (processor, calc) in aggregation.by_processor()? {
            let processor_id = processor.unwrap_or_else(|| UNMAPPED_PROCESSOR.to_string());
            if scope.includes(&processor_id) {
                add_calculated(row_for(&mut rows, &processor_id), &calc);
            }
        }

        for (key, tally) in aggregation.tallies {
            let processor_id = key.processor_id().unwrap_or(UNMAPPED_PROCESSOR).to_string();
            if let Some(row) = rows.get_mut(&processor_id) {
                row.warnings.push(tally.into_warning(key));
            }
        }
        report_warnings.extend(aggregation.warnings);

        for statement in self.statements {
            if !scope.includes(&statement.processor_id) {
                continue;
            }
            if statement.processor_id == UNMAPPED_PROCESSOR {
                warn!(statement_id = %statement.id, "Excluding statement for reserved processor id");
                totals.excluded_statements += 1;
                report_warnings.push(Warning::ExcludedRecord {
                    record: RecordKind::SettlementStatement,
                    id: statement.id.clone(),
                    reason: format!("processor_id '{}' is reserved", UNMAPPED_PROCESSOR),
                });
                continue;
            }
            if statement.period_start > statement.period_end {
                warn!(statement_id = %statement.id, "Excluding statement with inverted period");
                totals.excluded_statements += 1;
                report_warnings.push(Warning::ExcludedRecord {
                    record: RecordKind::SettlementStatement,
                    id: statement.id.clone(),
                    reason: "period_start is after period_end".to_string(),
                });
                continue;
            }
            if !statement.overlaps(period) {
                continue;
            }

            let Ok(expected_net) = statement.expected_net() else {
                totals.excluded_statements += 1;
                report_warnings.push(Warning::ExcludedRecord {
                    record: RecordKind::SettlementStatement,
                    id: statement.id.clone(),
                    reason: "gross - fees overflows".to_string(),
                });
                continue;
            };

            let row = row_for(&mut rows, &statement.processor_id);
            add_statement(row, statement)?;

            if expected_net.cents() != statement.net_cents {
                warn!(
                    statement_id = %statement.id,
                    expected_net = expected_net.cents(),
                    reported_net = statement.net_cents,
                    "Statement does not balance"
                );
                row.warnings.push(Warning::StatementImbalance {
                    statement_id: statement.id.clone(),
                    processor_id: statement.processor_id.clone(),
                    expected_net_cents: expected_net.cents(),
                    reported_net_cents: statement.net_cents,
                });
            }
        }

        let threshold = self.threshold.cents().unsigned_abs();
        let mut rows: Vec<ReconciliationRow> = rows.into_values().collect();
        for row in &mut rows {
            row.calc_net = row.calc_gross.checked_sub(row.calc_fees)?;
            row.var_gross = row.calc_gross.checked_sub(row.stmt_gross)?;
            row.var_fees = row.calc_fees.checked_sub(row.stmt_fees)?;
            row.var_net = row.calc_net.checked_sub(row.stmt_net)?;
            row.flagged = row.var_fees.cents().unsigned_abs() > threshold;
            canonicalize(&mut row.warnings);
            add_to_totals(&mut totals, row)?;
        }
        rows.sort_by(|a, b| {
            b.var_fees
                .cents()
                .unsigned_abs()
                .cmp(&a.var_fees.cents().unsigned_abs())
                .then_with(|| a.processor_id.cmp(&b.processor_id))
        });
        canonicalize(&mut report_warnings);

        for row in rows.iter().filter(|r| r.flagged) {
            debug!(
                processor_id = %row.processor_id,
                var_fees = row.var_fees.cents(),
                "Fee variance above threshold"
            );
        }
        info!(
            start = %period.start,
            end = %period.end,
            rows = rows.len(),
            flagged = totals.flagged_rows,
            tx_count = totals.tx_count,
            excluded = totals.excluded_transactions,
            "Reconciled settlements"
        );

        Ok(ReconciliationReport {
            period: *period,
            scope: scope.clone(),
            threshold_cents: self.threshold,
            rows,
            totals,
            warnings: report_warnings,
        })
    }
}

fn row_for<'r>(
    rows: &'r mut BTreeMap<String, ReconciliationRow>,
    processor_id: &str,
) -> &'r mut ReconciliationRow {
    rows.entry(processor_id.to_string())
        .or_insert_with(|| ReconciliationRow {
            processor_id: processor_id.to_string(),
            ..ReconciliationRow::default()
        })
}

fn add_calculated(row: &mut ReconciliationRow, calc: &GroupTotals) {
    row.calc_gross = calc.gross;
    row.calc_fees = calc.fees;
    row.tx_count = calc.tx_count;
}

fn add_statement(row: &mut ReconciliationRow, statement: &SettlementStatement) -> CoreResult<()> {
    row.stmt_gross = row
        .stmt_gross
        .checked_add(Money::from_cents(statement.gross_cents))?;
    row.stmt_fees = row
        .stmt_fees
        .checked_add(Money::from_cents(statement.fees_cents))?;
    row.stmt_net = row
        .stmt_net
        .checked_add(Money::from_cents(statement.net_cents))?;
    row.stmt_count += 1;
    Ok(())
}

fn add_to_totals(totals: &mut ReconciliationTotals, row: &ReconciliationRow) -> CoreResult<()> {
    totals.calc_gross = totals.calc_gross.checked_add(row.calc_gross)?;
    totals.calc_fees = totals.calc_fees.checked_add(row.calc_fees)?;
    totals.calc_net = totals.calc_net.checked_add(row.calc_net)?;
    totals.stmt_gross = totals.stmt_gross.checked_add(row.stmt_gross)?;
    totals.stmt_fees = totals.stmt_fees.checked_add(row.stmt_fees)?;
    totals.stmt_net = totals.stmt_net.checked_add(row.stmt_net)?;
    totals.var_gross = totals.var_gross.checked_add(row.var_gross)?;
    totals.var_fees = totals.var_fees.checked_add(row.var_fees)?;
    totals.var_net = totals.var_net.checked_add(row.var_net)?;
    totals.tx_count = totals
        .tx_count
        .checked_add(row.tx_count)
        .ok_or_else(|| CoreError::overflow("reconciled transaction count"))?;
    totals.stmt_count += row.stmt_count;
    if row.flagged {
        totals.flagged_rows += 1;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
