//! # Warnings
//!
//! Non-fatal findings attached to every result object, so a caller can tell
//! "computed" from "computed with caveats".
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Warning                 Effect on the numbers                          │
//! │  ──────────────────────  ──────────────────────────────────────────     │
//! │  MissingFeeRule          transaction counted with a zero fee            │
//! │  UnknownMachine          transaction counted in the unmapped bucket     │
//! │  ExcludedRecord          record left out of every group                 │
//! │  NoCommissionPolicy      uncovered span contributes zero commission     │
//! │  StatementImbalance      none (informational)                           │
//! │  AmbiguousAllocation     none (informational, allocations summed)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use ts_rs::TS;

/// Kind of record an [`Warning::ExcludedRecord`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Transaction,
    SettlementStatement,
}

/// A non-fatal finding.
///
/// `Ord` gives warnings a canonical order, so reports built from
/// differently chunked input serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// No fee rule was active for `count` transactions of one machine;
    /// their fees were treated as zero. `first_transaction_id` and
    /// `last_transaction_id` are the lowest and highest affected ids.
    MissingFeeRule {
        machine_id: String,
        processor_id: Option<String>,
        count: u64,
        first_transaction_id: String,
        last_transaction_id: String,
    },

    /// `count` transactions reference a machine that is not in the snapshot.
    UnknownMachine {
        machine_id: String,
        count: u64,
        first_transaction_id: String,
        last_transaction_id: String,
    },

    /// A malformed record was left out of its group.
    ExcludedRecord {
        record: RecordKind,
        id: String,
        reason: String,
    },

    /// Part of a commission period had no active policy for the location.
    NoCommissionPolicy {
        location_id: String,
        #[ts(as = "String")]
        start: DateTime<Utc>,
        #[ts(as = "String")]
        end: DateTime<Utc>,
    },

    /// A statement's `net` disagrees with its own `gross - fees`.
    StatementImbalance {
        statement_id: String,
        processor_id: String,
        expected_net_cents: i64,
        reported_net_cents: i64,
    },

    /// More than one allocation applied to the same target and they were
    /// summed.
    AmbiguousAllocation {
        policy_id: String,
        machine_id: Option<String>,
        location_id: Option<String>,
        allocation_ids: Vec<String>,
    },
}

impl Warning {
    /// Informational warnings do not change any computed amount.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            Warning::AmbiguousAllocation { .. } | Warning::StatementImbalance { .. }
        )
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::MissingFeeRule {
                machine_id,
                processor_id,
                count,
                first_transaction_id,
                last_transaction_id,
            } => write!(
                f,
                "no fee rule for machine {} (processor {}) on {} transactions ({}..{}); fee treated as zero",
                machine_id,
                processor_id.as_deref().unwrap_or("none"),
                count,
                first_transaction_id,
                last_transaction_id
            ),
            Warning::UnknownMachine {
                machine_id,
                count,
                first_transaction_id,
                last_transaction_id,
            } => write!(
                f,
                "{} transactions ({}..{}) reference unknown machine {}",
                count, first_transaction_id, last_transaction_id, machine_id
            ),
            Warning::ExcludedRecord { record, id, reason } => {
                write!(f, "excluded {:?} {}: {}", record, id, reason)
            }
            Warning::NoCommissionPolicy {
                location_id,
                start,
                end,
            } => write!(
                f,
                "no commission policy for location {} between {} and {}",
                location_id, start, end
            ),
            Warning::StatementImbalance {
                statement_id,
                expected_net_cents,
                reported_net_cents,
                ..
            } => write!(
                f,
                "statement {} reports net {} but gross - fees = {}",
                statement_id, reported_net_cents, expected_net_cents
            ),
            Warning::AmbiguousAllocation {
                policy_id,
                allocation_ids,
                ..
            } => write!(
                f,
                "{} allocations of policy {} apply to the same target and were summed: {}",
                allocation_ids.len(),
                policy_id,
                allocation_ids.join(", ")
            ),
        }
    }
}

// =============================================================================
// Per-Machine Tallies
// =============================================================================

/// What kind of repeated per-transaction finding a [`TransactionTally`]
/// counts. One entry per machine, so the number of entries is bounded by
/// the fleet size, not the transaction volume.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TallyKey {
    MissingFeeRule {
        machine_id: String,
        processor_id: Option<String>,
    },
    UnknownMachine {
        machine_id: String,
    },
}

impl TallyKey {
    /// The processor whose reconciliation row the finding belongs to
    /// (`None` = unmapped).
    pub fn processor_id(&self) -> Option<&str> {
        match self {
            TallyKey::MissingFeeRule { processor_id, .. } => processor_id.as_deref(),
            TallyKey::UnknownMachine { .. } => None,
        }
    }
}

/// Count plus lowest/highest transaction id of one finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionTally {
    pub count: u64,
    pub first_transaction_id: String,
    pub last_transaction_id: String,
}

impl TransactionTally {
    pub fn new(transaction_id: &str) -> Self {
        TransactionTally {
            count: 1,
            first_transaction_id: transaction_id.to_string(),
            last_transaction_id: transaction_id.to_string(),
        }
    }

    /// Counts one more transaction.
    pub fn record(&mut self, transaction_id: &str) {
        self.count = self.count.saturating_add(1);
        if transaction_id < self.first_transaction_id.as_str() {
            self.first_transaction_id = transaction_id.to_string();
        }
        if transaction_id > self.last_transaction_id.as_str() {
            self.last_transaction_id = transaction_id.to_string();
        }
    }

    /// Combines two tallies of the same key. Associative and commutative.
    pub fn merge(&mut self, other: TransactionTally) {
        self.count = self.count.saturating_add(other.count);
        if other.first_transaction_id < self.first_transaction_id {
            self.first_transaction_id = other.first_transaction_id;
        }
        if other.last_transaction_id > self.last_transaction_id {
            self.last_transaction_id = other.last_transaction_id;
        }
    }

    /// The warning reported for this tally.
    pub fn into_warning(self, key: TallyKey) -> Warning {
        match key {
            TallyKey::MissingFeeRule {
                machine_id,
                processor_id,
            } => Warning::MissingFeeRule {
                machine_id,
                processor_id,
                count: self.count,
                first_transaction_id: self.first_transaction_id,
                last_transaction_id: self.last_transaction_id,
            },
            TallyKey::UnknownMachine { machine_id } => Warning::UnknownMachine {
                machine_id,
                count: self.count,
                first_transaction_id: self.first_transaction_id,
                last_transaction_id: self.last_transaction_id,
            },
        }
    }
}

/// Sorts and de-duplicates a warning list into its canonical form.
pub fn canonicalize(warnings: &mut Vec<Warning>) {
    warnings.sort();
    warnings.dedup();
}
