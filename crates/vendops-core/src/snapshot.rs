//! # Input Snapshot
//!
//! Everything one engine call reads, handed over by the data-access layer
//! as a single immutable value.
//!
//! ## JSON Layout
//! ```text
//! {
//!   "transactions":          [ { id, machine_id, occurred_at, qty, … } ],
//!   "machines":              [ { id, location_id?, processor_id? } ],
//!   "processor_assignments": [ { machine_id, processor_id, effective_start, … } ],
//!   "fee_rules":             [ { processor_id, machine_id?, percent_bps, … } ],
//!   "commission_policies":   [ { location_id, model, pct_bps, flat_cents, … } ],
//!   "cost_policies":         [ { id, name, base_cents } ],
//!   "cost_allocations":      [ { id, policy_id, level, target_id?, method, … } ],
//!   "settlement_statements": [ { id, processor_id, period_start, … } ]
//! }
//! ```
//!
//! Every list is optional. Policy, rule and allocation records are read in
//! their wire form and converted afterwards, so a bad `model` / `level` /
//! `method` tag fails the whole snapshot with its own [`CoreError`]
//! variant. Processor assignments must have a well-formed window, and no
//! record may claim the reserved `(unmapped)` processor id.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::policy::{
    CommissionPolicy, CommissionPolicyRecord, CostAllocation, CostAllocationRecord, CostPolicy,
    ProcessorFeeRule, ProcessorFeeRuleRecord,
};
use crate::types::{Machine, ProcessorAssignment, SettlementStatement, Transaction};
use crate::validation::{validate_id, validate_processor_id, validate_window};

/// An immutable view of the operational data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotRecord")]
pub struct Snapshot {
    pub transactions: Vec<Transaction>,
    pub machines: Vec<Machine>,
    pub processor_assignments: Vec<ProcessorAssignment>,
    pub fee_rules: Vec<ProcessorFeeRule>,
    pub commission_policies: Vec<CommissionPolicy>,
    pub cost_policies: Vec<CostPolicy>,
    pub cost_allocations: Vec<CostAllocation>,
    pub settlement_statements: Vec<SettlementStatement>,
}

/// Wire form of [`Snapshot`]: versioned records still unchecked.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotRecord {
    pub transactions: Vec<Transaction>,
    pub machines: Vec<Machine>,
    pub processor_assignments: Vec<ProcessorAssignment>,
    pub fee_rules: Vec<ProcessorFeeRuleRecord>,
    pub commission_policies: Vec<CommissionPolicyRecord>,
    pub cost_policies: Vec<CostPolicy>,
    pub cost_allocations: Vec<CostAllocationRecord>,
    pub settlement_statements: Vec<SettlementStatement>,
}

impl TryFrom<SnapshotRecord> for Snapshot {
    type Error = CoreError;

    fn try_from(record: SnapshotRecord) -> CoreResult<Self> {
        for machine in &record.machines {
            validate_id("machine_id", &machine.id)?;
            if let Some(processor_id) = &machine.processor_id {
                validate_processor_id("processor_id", processor_id)?;
            }
        }

        for assignment in &record.processor_assignments {
            validate_id("machine_id", &assignment.machine_id)?;
            validate_processor_id("processor_id", &assignment.processor_id)?;
            validate_window(
                "processor assignment",
                assignment.effective_start,
                assignment.effective_end,
            )?;
        }

        for statement in &record.settlement_statements {
            validate_processor_id("processor_id", &statement.processor_id)?;
        }

        Ok(Snapshot {
            fee_rules: convert_all(record.fee_rules)?,
            commission_policies: convert_all(record.commission_policies)?,
            cost_allocations: convert_all(record.cost_allocations)?,
            transactions: record.transactions,
            machines: record.machines,
            processor_assignments: record.processor_assignments,
            cost_policies: record.cost_policies,
            settlement_statements: record.settlement_statements,
        })
    }
}

fn convert_all<R, T>(records: Vec<R>) -> CoreResult<Vec<T>>
where
    T: TryFrom<R, Error = CoreError>,
{
    records.into_iter().map(T::try_from).collect()
}

impl Snapshot {
    /// Parses a snapshot from JSON.
    ///
    /// Malformed JSON is [`CoreError::InvalidSnapshot`]; a well-formed
    /// document with a bad record fails with that record's error
    /// (e.g. [`CoreError::UnknownPolicyModel`]).
    pub fn from_json(json: &str) -> CoreResult<Snapshot> {
        let record: SnapshotRecord =
            serde_json::from_str(json).map_err(|e| CoreError::InvalidSnapshot(e.to_string()))?;
        Snapshot::try_from(record)
    }

    /// Serializes the snapshot back to JSON.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(|e| CoreError::InvalidSnapshot(e.to_string()))
    }
}
