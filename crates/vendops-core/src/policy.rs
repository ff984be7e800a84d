//! # Versioned Rules and Policies
//!
//! Fee rules, commission policies and cost allocations. All three are
//! versioned by effective window and converted from their wire form at
//! deserialization time.
//!
//! ## Wire Form vs Engine Form
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  JSON record                          Engine type                       │
//! │  ─────────────────────────────        ──────────────────────────────    │
//! │  { "model": "hybrid",          ──►    CommissionModel::Hybrid {         │
//! │    "pct_bps": 500,                        pct_bps: 500 bps,             │
//! │    "flat_cents": 10000 }                  flat_cents: $100.00 }         │
//! │                                                                         │
//! │  { "level": "machine",         ──►    AllocationLevel::Machine("vm-7")  │
//! │    "target_id": "vm-7" }                                                │
//! │                                                                         │
//! │  { "model": "tiered" }         ──►    CoreError::UnknownPolicyModel     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Unknown tags never reach a calculation: a snapshot containing one fails
//! to load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{BasisPoints, EffectiveWindow};
use crate::validation::{
    validate_bps, validate_id, validate_non_negative_cents, validate_processor_id, validate_window,
};

// =============================================================================
// Processor Fee Rule
// =============================================================================

/// A processor's per-transaction fee schedule.
///
/// `machine_id = None` is the processor default; `Some` is a machine-level
/// override that wins over the default while both are active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProcessorFeeRuleRecord", into = "ProcessorFeeRuleRecord")]
pub struct ProcessorFeeRule {
    pub processor_id: String,
    pub machine_id: Option<String>,
    pub percent_bps: BasisPoints,
    pub fixed_cents: Money,
    pub window: EffectiveWindow,
}

/// Wire form of [`ProcessorFeeRule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorFeeRuleRecord {
    pub processor_id: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub percent_bps: u32,
    #[serde(default)]
    pub fixed_cents: i64,
    pub effective_start: DateTime<Utc>,
    #[serde(default)]
    pub effective_end: Option<DateTime<Utc>>,
}

impl TryFrom<ProcessorFeeRuleRecord> for ProcessorFeeRule {
    type Error = CoreError;

    fn try_from(record: ProcessorFeeRuleRecord) -> CoreResult<Self> {
        validate_processor_id("processor_id", &record.processor_id)?;
        if let Some(machine_id) = &record.machine_id {
            validate_id("machine_id", machine_id)?;
        }
        validate_bps("percent_bps", record.percent_bps)?;
        validate_non_negative_cents("fixed_cents", record.fixed_cents)?;
        validate_window("fee rule", record.effective_start, record.effective_end)?;

        Ok(ProcessorFeeRule {
            processor_id: record.processor_id,
            machine_id: record.machine_id,
            percent_bps: BasisPoints::from_bps(record.percent_bps),
            fixed_cents: Money::from_cents(record.fixed_cents),
            window: EffectiveWindow::new(record.effective_start, record.effective_end),
        })
    }
}

impl From<ProcessorFeeRule> for ProcessorFeeRuleRecord {
    fn from(rule: ProcessorFeeRule) -> Self {
        ProcessorFeeRuleRecord {
            processor_id: rule.processor_id,
            machine_id: rule.machine_id,
            percent_bps: rule.percent_bps.bps(),
            fixed_cents: rule.fixed_cents.cents(),
            effective_start: rule.window.start,
            effective_end: rule.window.end,
        }
    }
}

// =============================================================================
// Commission Model
// =============================================================================

/// How a location is paid. Exactly one model applies per policy version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CommissionModel {
    /// No commission (floor may still apply).
    None,
    /// A share of gross sales.
    PercentGross { pct_bps: BasisPoints },
    /// A fixed monthly amount, prorated by day.
    FlatMonth { flat_cents: Money },
    /// Percent-of-gross plus flat monthly, each computed independently.
    Hybrid {
        pct_bps: BasisPoints,
        flat_cents: Money,
    },
}

impl CommissionModel {
    /// Builds a model from its wire tag and parameters.
    ///
    /// Parameters the model does not use are ignored.
    pub fn from_parts(tag: &str, pct_bps: u32, flat_cents: i64) -> CoreResult<Self> {
        let model = match tag {
            "none" => CommissionModel::None,
            "percent_gross" => CommissionModel::PercentGross {
                pct_bps: BasisPoints::from_bps(pct_bps),
            },
            "flat_month" => CommissionModel::FlatMonth {
                flat_cents: Money::from_cents(flat_cents),
            },
            "hybrid" => CommissionModel::Hybrid {
                pct_bps: BasisPoints::from_bps(pct_bps),
                flat_cents: Money::from_cents(flat_cents),
            },
            other => return Err(CoreError::UnknownPolicyModel(other.to_string())),
        };

        if let Some(pct) = model.pct_bps() {
            validate_bps("pct_bps", pct.bps())?;
        }
        if let Some(flat) = model.flat_cents() {
            validate_non_negative_cents("flat_cents", flat.cents())?;
        }

        Ok(model)
    }

    /// Wire tag.
    pub fn tag(&self) -> &'static str {
        match self {
            CommissionModel::None => "none",
            CommissionModel::PercentGross { .. } => "percent_gross",
            CommissionModel::FlatMonth { .. } => "flat_month",
            CommissionModel::Hybrid { .. } => "hybrid",
        }
    }

    /// The percent-of-gross parameter, if the model has one.
    pub fn pct_bps(&self) -> Option<BasisPoints> {
        match self {
            CommissionModel::PercentGross { pct_bps } | CommissionModel::Hybrid { pct_bps, .. } => {
                Some(*pct_bps)
            }
            _ => None,
        }
    }

    /// The flat monthly parameter, if the model has one.
    pub fn flat_cents(&self) -> Option<Money> {
        match self {
            CommissionModel::FlatMonth { flat_cents }
            | CommissionModel::Hybrid { flat_cents, .. } => Some(*flat_cents),
            _ => None,
        }
    }
}

impl fmt::Display for CommissionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// =============================================================================
// Commission Policy
// =============================================================================

/// One version of a location's commission agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CommissionPolicyRecord", into = "CommissionPolicyRecord")]
pub struct CommissionPolicy {
    pub location_id: String,
    pub model: CommissionModel,
    /// Monthly floor, prorated like `flat_month`. Zero disables it.
    pub min_cents: Money,
    pub window: EffectiveWindow,
}

/// Wire form of [`CommissionPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionPolicyRecord {
    pub location_id: String,
    pub model: String,
    #[serde(default)]
    pub pct_bps: u32,
    #[serde(default)]
    pub flat_cents: i64,
    #[serde(default)]
    pub min_cents: i64,
    pub effective_start: DateTime<Utc>,
    #[serde(default)]
    pub effective_end: Option<DateTime<Utc>>,
}

impl TryFrom<CommissionPolicyRecord> for CommissionPolicy {
    type Error = CoreError;

    fn try_from(record: CommissionPolicyRecord) -> CoreResult<Self> {
        validate_id("location_id", &record.location_id)?;
        let model = CommissionModel::from_parts(&record.model, record.pct_bps, record.flat_cents)?;
        validate_non_negative_cents("min_cents", record.min_cents)?;
        validate_window("commission policy", record.effective_start, record.effective_end)?;

        Ok(CommissionPolicy {
            location_id: record.location_id,
            model,
            min_cents: Money::from_cents(record.min_cents),
            window: EffectiveWindow::new(record.effective_start, record.effective_end),
        })
    }
}

impl From<CommissionPolicy> for CommissionPolicyRecord {
    fn from(policy: CommissionPolicy) -> Self {
        CommissionPolicyRecord {
            location_id: policy.location_id,
            model: policy.model.tag().to_string(),
            pct_bps: policy.model.pct_bps().map_or(0, |r| r.bps()),
            flat_cents: policy.model.flat_cents().map_or(0, |m| m.cents()),
            min_cents: policy.min_cents.cents(),
            effective_start: policy.window.start,
            effective_end: policy.window.end,
        }
    }
}

// =============================================================================
// Cost Policy
// =============================================================================

/// A shared recurring cost to be spread across the hierarchy
/// (e.g. the fleet insurance premium).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostPolicy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// The amount percentage allocations are taken from.
    pub base_cents: i64,
}

// =============================================================================
// Cost Allocation
// =============================================================================

/// Where in the hierarchy an allocation applies.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, TS)]
#[ts(export)]
#[serde(tag = "level", content = "target_id", rename_all = "snake_case")]
pub enum AllocationLevel {
    Global,
    Location(String),
    Machine(String),
}

impl AllocationLevel {
    /// Builds a level from its wire tag and optional target.
    pub fn from_parts(
        allocation_id: &str,
        tag: &str,
        target_id: Option<String>,
    ) -> CoreResult<Self> {
        let missing = |level: &str| CoreError::MissingAllocationTarget {
            allocation_id: allocation_id.to_string(),
            level: level.to_string(),
        };

        match tag {
            "global" => Ok(AllocationLevel::Global),
            "location" => target_id
                .map(AllocationLevel::Location)
                .ok_or_else(|| missing("location")),
            "machine" => target_id
                .map(AllocationLevel::Machine)
                .ok_or_else(|| missing("machine")),
            other => Err(CoreError::UnknownAllocationLevel(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            AllocationLevel::Global => "global",
            AllocationLevel::Location(_) => "location",
            AllocationLevel::Machine(_) => "machine",
        }
    }

    pub fn target_id(&self) -> Option<&str> {
        match self {
            AllocationLevel::Global => None,
            AllocationLevel::Location(id) | AllocationLevel::Machine(id) => Some(id),
        }
    }
}

/// How an allocation turns the cost base into an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(tag = "method", content = "value", rename_all = "snake_case")]
pub enum AllocationMethod {
    /// A share of the policy's base amount.
    Percentage(BasisPoints),
    /// A fixed amount, independent of the base.
    Flat(Money),
}

impl AllocationMethod {
    /// Builds a method from its wire tag and raw value (bps or cents).
    pub fn from_parts(tag: &str, value: i64) -> CoreResult<Self> {
        match tag {
            "percentage" => {
                let bps = u32::try_from(value).map_err(|_| ValidationError::OutOfRange {
                    field: "value".to_string(),
                    min: 0,
                    max: crate::money::BPS_DENOMINATOR,
                })?;
                validate_bps("value", bps)?;
                Ok(AllocationMethod::Percentage(BasisPoints::from_bps(bps)))
            }
            "flat" => {
                validate_non_negative_cents("value", value)?;
                Ok(AllocationMethod::Flat(Money::from_cents(value)))
            }
            other => Err(CoreError::UnknownAllocationMethod(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            AllocationMethod::Percentage(_) => "percentage",
            AllocationMethod::Flat(_) => "flat",
        }
    }

    /// The raw wire value (bps or cents).
    pub fn raw_value(&self) -> i64 {
        match self {
            AllocationMethod::Percentage(bps) => i64::from(bps.bps()),
            AllocationMethod::Flat(cents) => cents.cents(),
        }
    }
}

/// One version of a cost allocation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CostAllocationRecord", into = "CostAllocationRecord")]
pub struct CostAllocation {
    pub id: String,
    pub policy_id: String,
    pub level: AllocationLevel,
    pub method: AllocationMethod,
    pub window: EffectiveWindow,
}

/// Wire form of [`CostAllocation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAllocationRecord {
    pub id: String,
    pub policy_id: String,
    pub level: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub method: String,
    pub value: i64,
    pub effective_start: DateTime<Utc>,
    #[serde(default)]
    pub effective_end: Option<DateTime<Utc>>,
}

impl TryFrom<CostAllocationRecord> for CostAllocation {
    type Error = CoreError;

    fn try_from(record: CostAllocationRecord) -> CoreResult<Self> {
        validate_id("id", &record.id)?;
        validate_id("policy_id", &record.policy_id)?;
        let level = AllocationLevel::from_parts(&record.id, &record.level, record.target_id)?;
        let method = AllocationMethod::from_parts(&record.method, record.value)?;
        validate_window("cost allocation", record.effective_start, record.effective_end)?;

        Ok(CostAllocation {
            id: record.id,
            policy_id: record.policy_id,
            level,
            method,
            window: EffectiveWindow::new(record.effective_start, record.effective_end),
        })
    }
}

impl From<CostAllocation> for CostAllocationRecord {
    fn from(allocation: CostAllocation) -> Self {
        CostAllocationRecord {
            target_id: allocation.level.target_id().map(str::to_string),
            level: allocation.level.tag().to_string(),
            method: allocation.method.tag().to_string(),
            value: allocation.method.raw_value(),
            id: allocation.id,
            policy_id: allocation.policy_id,
            effective_start: allocation.window.start,
            effective_end: allocation.window.end,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
