//! # Transaction Aggregator
//!
//! Groups raw vends into per-machine, per-day totals for a reporting window.
//!
//! ## Fold Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each transaction in a chunk:                                       │
//! │                                                                         │
//! │  outside [start, end)?  ──────────────────────────────► skip           │
//! │  not at the requested location?  ─────────────────────► skip           │
//! │  qty ≤ 0 / negative price / line overflow?  ──────────► ExcludedRecord │
//! │  machine missing from snapshot?  ──► UnknownMachine tally, no fee      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  key = (machine, location, processor at occurred_at, UTC day)          │
//! │  groups[key] += {1 tx, qty, gross, cost, fee}                          │
//! │  no fee rule?  ───────────────────► MissingFeeRule tally per machine   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Unknown-machine and missing-rule findings are tallied per machine (count
//! plus lowest/highest transaction id), so memory is bounded by fleet size
//! however many vends are folded.
//!
//! ## Chunking
//! [`Aggregation::merge`] is associative and commutative and
//! [`Aggregation::finish`] puts warnings in canonical order, so a caller may
//! split the input any way it likes (or fold chunks on several threads) and
//! get byte-identical output. [`TransactionAggregator::ingest_iter`] folds
//! straight from an iterator without materializing the input.

use std::borrow::Borrow;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::budget::BudgetGuard;
use crate::directory::MachineDirectory;
use crate::error::{CoreError, CoreResult};
use crate::fees::FeeRuleResolver;
use crate::money::Money;
use crate::types::{Period, Transaction};
use crate::validation::{validate_non_negative_cents, validate_quantity};
use crate::warning::{canonicalize, RecordKind, TallyKey, TransactionTally, Warning};

/// Default number of transactions folded between time-budget checks.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

// =============================================================================
// Group Key / Totals
// =============================================================================

/// Grouping key. `processor_id = None` is the unmapped bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub machine_id: String,
    pub location_id: Option<String>,
    pub processor_id: Option<String>,
    pub day: NaiveDate,
}

/// Running totals for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupTotals {
    pub tx_count: u64,
    pub qty: i64,
    pub gross: Money,
    pub cost: Money,
    pub fees: Money,
}

impl GroupTotals {
    /// Adds another group's totals into this one.
    pub fn merge(&mut self, other: &GroupTotals) -> CoreResult<()> {
        self.tx_count = self
            .tx_count
            .checked_add(other.tx_count)
            .ok_or_else(|| CoreError::overflow("transaction count"))?;
        self.qty = self
            .qty
            .checked_add(other.qty)
            .ok_or_else(|| CoreError::overflow("quantity total"))?;
        self.gross = self.gross.checked_add(other.gross)?;
        self.cost = self.cost.checked_add(other.cost)?;
        self.fees = self.fees.checked_add(other.fees)?;
        Ok(())
    }

    /// `gross - fees`.
    pub fn net(&self) -> CoreResult<Money> {
        self.gross.checked_sub(self.fees)
    }
}

// =============================================================================
// Aggregation
// =============================================================================

/// The result of folding one or more chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub groups: BTreeMap<GroupKey, GroupTotals>,
    /// Per-machine findings, one entry per key.
    pub tallies: BTreeMap<TallyKey, TransactionTally>,
    /// Per-record findings (excluded transactions).
    pub warnings: Vec<Warning>,
    /// Transactions in the window that were counted.
    pub accepted: u64,
    /// Transactions in the window that were excluded as malformed.
    pub excluded: u64,
}

impl Aggregation {
    /// Combines two partial aggregations.
    pub fn merge(mut self, other: Aggregation) -> CoreResult<Aggregation> {
        for (key, totals) in other.groups {
            self.groups.entry(key).or_default().merge(&totals)?;
        }
        for (key, tally) in other.tallies {
            match self.tallies.entry(key) {
                Entry::Occupied(mut entry) => entry.get_mut().merge(tally),
                Entry::Vacant(entry) => {
                    entry.insert(tally);
                }
            }
        }
        self.warnings.extend(other.warnings);
        self.accepted = self
            .accepted
            .checked_add(other.accepted)
            .ok_or_else(|| CoreError::overflow("accepted transaction count"))?;
        self.excluded = self
            .excluded
            .checked_add(other.excluded)
            .ok_or_else(|| CoreError::overflow("excluded transaction count"))?;
        Ok(self)
    }

    /// Puts warnings in canonical order.
    pub fn finish(mut self) -> Aggregation {
        canonicalize(&mut self.warnings);
        self
    }

    /// Counts `transaction_id` under `key`. Returns true for a new key.
    pub fn tally(&mut self, key: TallyKey, transaction_id: &str) -> bool {
        match self.tallies.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().record(transaction_id);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(TransactionTally::new(transaction_id));
                true
            }
        }
    }

    /// Record warnings plus one warning per tally, in canonical order.
    pub fn all_warnings(&self) -> Vec<Warning> {
        let mut warnings = self.warnings.clone();
        warnings.extend(
            self.tallies
                .iter()
                .map(|(key, tally)| tally.clone().into_warning(key.clone())),
        );
        canonicalize(&mut warnings);
        warnings
    }

    /// Totals across every group.
    pub fn totals(&self) -> CoreResult<GroupTotals> {
        let mut sum = GroupTotals::default();
        for totals in self.groups.values() {
            sum.merge(totals)?;
        }
        Ok(sum)
    }

    /// Totals rolled up per processor (`None` = unmapped).
    pub fn by_processor(&self) -> CoreResult<BTreeMap<Option<String>, GroupTotals>> {
        let mut rollup: BTreeMap<Option<String>, GroupTotals> = BTreeMap::new();
        for (key, totals) in &self.groups {
            rollup
                .entry(key.processor_id.clone())
                .or_default()
                .merge(totals)?;
        }
        Ok(rollup)
    }

    /// Totals rolled up per UTC day.
    pub fn by_day(&self) -> CoreResult<BTreeMap<NaiveDate, GroupTotals>> {
        let mut rollup: BTreeMap<NaiveDate, GroupTotals> = BTreeMap::new();
        for (key, totals) in &self.groups {
            rollup.entry(key.day).or_default().merge(totals)?;
        }
        Ok(rollup)
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Folds transactions for one reporting window.
///
/// ## Example
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use vendops_core::aggregator::TransactionAggregator;
/// use vendops_core::directory::MachineDirectory;
/// use vendops_core::types::{Machine, Period, Transaction};
///
/// let machines = vec![Machine {
///     id: "vm-1".to_string(),
///     location_id: Some("loc-1".to_string()),
///     processor_id: None,
/// }];
/// let directory = MachineDirectory::new(&machines, &[]);
/// let period = Period::new(
///     Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
///     Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
/// )
/// .unwrap();
///
/// let txs = vec![Transaction {
///     id: "tx-1".to_string(),
///     machine_id: "vm-1".to_string(),
///     occurred_at: Utc.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap(),
///     qty: 2,
///     unit_price_cents: 150,
///     unit_cost_cents: 60,
/// }];
///
/// let agg = TransactionAggregator::new(period, &directory).ingest(&txs).unwrap();
/// let totals = agg.totals().unwrap();
/// assert_eq!(totals.gross.cents(), 300);
/// assert_eq!(totals.cost.cents(), 120);
/// ```
#[derive(Debug, Clone)]
pub struct TransactionAggregator<'a> {
    period: Period,
    directory: &'a MachineDirectory<'a>,
    fees: Option<&'a FeeRuleResolver<'a>>,
    location_id: Option<&'a str>,
    guard: Option<&'a BudgetGuard>,
    chunk_size: usize,
}

impl<'a> TransactionAggregator<'a> {
    pub fn new(period: Period, directory: &'a MachineDirectory<'a>) -> Self {
        TransactionAggregator {
            period,
            directory,
            fees: None,
            location_id: None,
            guard: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Computes fees while folding. Without a resolver every fee is zero.
    pub fn with_fees(mut self, resolver: &'a FeeRuleResolver<'a>) -> Self {
        self.fees = Some(resolver);
        self
    }

    /// Only counts machines placed at `location_id`.
    pub fn for_location(mut self, location_id: &'a str) -> Self {
        self.location_id = Some(location_id);
        self
    }

    /// Checks the time budget between chunks.
    pub fn with_budget(mut self, guard: &'a BudgetGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn period(&self) -> &Period {
        &self.period
    }

    /// Folds every transaction, chunk by chunk, and finishes the result.
    pub fn ingest(&self, transactions: &[Transaction]) -> CoreResult<Aggregation> {
        self.ingest_iter(transactions)
    }

    /// Folds transactions as they are produced, checking the budget every
    /// `chunk_size` records. Memory use does not grow with the input.
    pub fn ingest_iter<I>(&self, transactions: I) -> CoreResult<Aggregation>
    where
        I: IntoIterator,
        I::Item: Borrow<Transaction>,
    {
        self.period.validate()?;

        let mut acc = Aggregation::default();
        let mut seen: usize = 0;
        for tx in transactions {
            if seen % self.chunk_size == 0 {
                self.check_budget(seen)?;
            }
            seen += 1;
            self.fold(&mut acc, Borrow::<Transaction>::borrow(&tx))?;
        }
        self.check_budget(seen)?;
        let acc = acc.finish();

        debug!(
            start = %self.period.start,
            end = %self.period.end,
            location_id = ?self.location_id,
            seen,
            accepted = acc.accepted,
            excluded = acc.excluded,
            groups = acc.groups.len(),
            tallies = acc.tallies.len(),
            "Aggregated transactions"
        );

        Ok(acc)
    }

    fn check_budget(&self, seen: usize) -> CoreResult<()> {
        if let Some(guard) = self.guard {
            guard.check_size(seen)?;
            guard.check_time()?;
        }
        Ok(())
    }

    /// Folds one chunk into a partial aggregation.
    ///
    /// Partial results are combined with [`Aggregation::merge`] and must be
    /// passed through [`Aggregation::finish`] before use.
    pub fn ingest_chunk(&self, chunk: &[Transaction]) -> CoreResult<Aggregation> {
        let mut acc = Aggregation::default();
        for tx in chunk {
            self.fold(&mut acc, tx)?;
        }
        Ok(acc)
    }

    /// Folds a single transaction into `acc`.
    pub(crate) fn fold(&self, acc: &mut Aggregation, tx: &Transaction) -> CoreResult<()> {
        if !self.period.contains(tx.occurred_at) {
            return Ok(());
        }

        let location_id = self.directory.location_of(&tx.machine_id);
        if let Some(wanted) = self.location_id {
            if location_id != Some(wanted) {
                return Ok(());
            }
        }

        let (gross, cost) = match check_transaction(tx) {
            Ok(amounts) => amounts,
            Err(reason) => {
                warn!(transaction_id = %tx.id, reason = %reason, "Excluding transaction");
                acc.excluded += 1;
                acc.warnings.push(Warning::ExcludedRecord {
                    record: RecordKind::Transaction,
                    id: tx.id.clone(),
                    reason,
                });
                return Ok(());
            }
        };

        let known = self.directory.contains(&tx.machine_id);
        if !known {
            let key = TallyKey::UnknownMachine {
                machine_id: tx.machine_id.clone(),
            };
            if acc.tally(key, &tx.id) {
                warn!(
                    transaction_id = %tx.id,
                    machine_id = %tx.machine_id,
                    "Transactions reference unknown machine"
                );
            }
        }

        let fee = match self.fees {
            Some(resolver) if known => {
                let outcome = resolver.fee(tx)?;
                if outcome.is_missing() {
                    let key = TallyKey::MissingFeeRule {
                        machine_id: tx.machine_id.clone(),
                        processor_id: outcome.resolution.processor_id.clone(),
                    };
                    if acc.tally(key, &tx.id) {
                        warn!(
                            transaction_id = %tx.id,
                            machine_id = %tx.machine_id,
                            processor_id = ?outcome.resolution.processor_id,
                            "No fee rule active; treating fee as zero"
                        );
                    }
                }
                outcome.fee
            }
            _ => Money::zero(),
        };

        let processor_id = if known {
            self.directory.processor_at(&tx.machine_id, tx.occurred_at)
        } else {
            None
        };
        let key = GroupKey {
            machine_id: tx.machine_id.clone(),
            location_id: location_id.map(str::to_string),
            processor_id: processor_id.map(str::to_string),
            day: tx.occurred_at.date_naive(),
        };

        acc.groups.entry(key).or_default().merge(&GroupTotals {
            tx_count: 1,
            qty: tx.qty,
            gross,
            cost,
            fees: fee,
        })?;
        acc.accepted += 1;
        Ok(())
    }
}

/// Per-record checks. Returns `(line total, line cost)` or the exclusion
/// reason.
fn check_transaction(tx: &Transaction) -> Result<(Money, Money), String> {
    validate_quantity(tx.qty).map_err(|e| e.to_string())?;
    validate_non_negative_cents("unit_price_cents", tx.unit_price_cents)
        .map_err(|e| e.to_string())?;
    validate_non_negative_cents("unit_cost_cents", tx.unit_cost_cents)
        .map_err(|e| e.to_string())?;

    let gross = tx
        .line_total()
        .map_err(|_| "line total overflows".to_string())?;
    let cost = tx
        .line_cost()
        .map_err(|_| "line cost overflows".to_string())?;
    Ok((gross, cost))
}

// =============================================================================
// Unit Tests
// =============================================================================
