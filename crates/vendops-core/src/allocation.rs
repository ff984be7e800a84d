//! # Cost Allocation Engine
//!
//! Spreads a shared recurring cost (insurance, software licences, a
//! warehouse lease) onto a machine or location.
//!
//! ## Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  target = { machine: vm-7, location: loc-2 }        as_of = t          │
//! │                                                                         │
//! │  allocation active at t and …                                          │
//! │    level = global                      ──► applies                     │
//! │    level = location, target = loc-2    ──► applies                     │
//! │    level = machine,  target = vm-7     ──► applies                     │
//! │    anything else                       ──► ignored                     │
//! │                                                                         │
//! │  cents = Σ contribution                                                 │
//! │    percentage → round_half_up(base × value / 10000)                    │
//! │    flat       → value                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every applicable allocation is summed; none shadows another. When more
//! than one contributes, the result carries an informational
//! [`Warning::AmbiguousAllocation`] listing them, so the operator can see
//! that e.g. a location share and a machine surcharge were both charged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ts_rs::TS;

use crate::directory::MachineDirectory;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::policy::{AllocationLevel, AllocationMethod, CostAllocation, CostPolicy};
use crate::validation::validate_non_negative_cents;
use crate::warning::{canonicalize, Warning};

// =============================================================================
// Types
// =============================================================================

/// What a cost is being allocated to.
///
/// When only a machine is given, its location is looked up so that
/// location-level allocations still apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AllocationTarget {
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
}

impl AllocationTarget {
    pub fn machine(machine_id: impl Into<String>) -> Self {
        AllocationTarget {
            machine_id: Some(machine_id.into()),
            location_id: None,
        }
    }

    pub fn location(location_id: impl Into<String>) -> Self {
        AllocationTarget {
            machine_id: None,
            location_id: Some(location_id.into()),
        }
    }
}

/// One allocation's share of the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct AllocationContribution {
    pub allocation_id: String,
    pub level: AllocationLevel,
    pub method: AllocationMethod,
    pub cents: Money,
}

/// The sum of a set of allocations with its audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationSum {
    pub cents: Money,
    pub contributions: Vec<AllocationContribution>,
}

/// Cost allocated to one target under one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct AllocationResult {
    pub policy_id: String,
    #[ts(as = "String")]
    pub as_of: DateTime<Utc>,
    /// The target as resolved (location filled in from the machine).
    pub target: AllocationTarget,
    pub base_cents: Money,
    pub cents: Money,
    pub contributions: Vec<AllocationContribution>,
    pub warnings: Vec<Warning>,
}

// =============================================================================
// Engine
// =============================================================================

/// Resolves and combines cost allocations.
#[derive(Debug, Clone)]
pub struct CostAllocationEngine<'a> {
    directory: &'a MachineDirectory<'a>,
    policies: &'a [CostPolicy],
    allocations: &'a [CostAllocation],
}

impl<'a> CostAllocationEngine<'a> {
    pub fn new(
        directory: &'a MachineDirectory<'a>,
        policies: &'a [CostPolicy],
        allocations: &'a [CostAllocation],
    ) -> Self {
        CostAllocationEngine {
            directory,
            policies,
            allocations,
        }
    }

    /// Every allocation (of any policy) that applies to the target at
    /// `as_of`, ordered global → location → machine, then by id.
    pub fn resolve(
        &self,
        machine_id: Option<&str>,
        location_id: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Vec<&'a CostAllocation> {
        let mut matched: Vec<&'a CostAllocation> = self
            .allocations
            .iter()
            .filter(|a| a.window.contains(as_of))
            .filter(|a| match &a.level {
                AllocationLevel::Global => true,
                AllocationLevel::Location(id) => location_id == Some(id.as_str()),
                AllocationLevel::Machine(id) => machine_id == Some(id.as_str()),
            })
            .collect();

        matched.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.id.cmp(&b.id)));
        matched
    }

    /// Sums the contribution of each allocation against `base`.
    pub fn combine(allocations: &[&CostAllocation], base: Money) -> CoreResult<AllocationSum> {
        let mut sum = AllocationSum::default();

        for allocation in allocations {
            let cents = match allocation.method {
                AllocationMethod::Percentage(rate) => base.apply_bps(rate)?,
                AllocationMethod::Flat(amount) => amount,
            };
            sum.cents = sum.cents.checked_add(cents)?;
            sum.contributions.push(AllocationContribution {
                allocation_id: allocation.id.clone(),
                level: allocation.level.clone(),
                method: allocation.method,
                cents,
            });
        }

        Ok(sum)
    }

    /// Allocates cost policy `policy_id` to `target` as of `as_of`.
    ///
    /// ## Example
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use vendops_core::allocation::{AllocationTarget, CostAllocationEngine};
    /// use vendops_core::directory::MachineDirectory;
    /// use vendops_core::policy::{CostAllocation, CostAllocationRecord, CostPolicy};
    ///
    /// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    /// let policies = vec![CostPolicy {
    ///     id: "insurance".to_string(),
    ///     name: "Fleet insurance".to_string(),
    ///     base_cents: 120_000,
    /// }];
    /// let allocations = vec![CostAllocation::try_from(CostAllocationRecord {
    ///     id: "alloc-1".to_string(),
    ///     policy_id: "insurance".to_string(),
    ///     level: "global".to_string(),
    ///     target_id: None,
    ///     method: "percentage".to_string(),
    ///     value: 2_500,
    ///     effective_start: start,
    ///     effective_end: None,
    /// })
    /// .unwrap()];
    ///
    /// let directory = MachineDirectory::new(&[], &[]);
    /// let engine = CostAllocationEngine::new(&directory, &policies, &allocations);
    /// let result = engine
    ///     .allocate_costs("insurance", start, &AllocationTarget::location("loc-1"))
    ///     .unwrap();
    /// assert_eq!(result.cents.cents(), 30_000);
    /// ```
    pub fn allocate_costs(
        &self,
        policy_id: &str,
        as_of: DateTime<Utc>,
        target: &AllocationTarget,
    ) -> CoreResult<AllocationResult> {
        let policy = self
            .policies
            .iter()
            .find(|p| p.id == policy_id)
            .ok_or_else(|| CoreError::UnknownCostPolicy(policy_id.to_string()))?;
        validate_non_negative_cents("base_cents", policy.base_cents)?;
        let base = Money::from_cents(policy.base_cents);

        let machine_id = target.machine_id.as_deref();
        let location_id = target
            .location_id
            .as_deref()
            .or_else(|| machine_id.and_then(|m| self.directory.location_of(m)));

        let resolved: Vec<&CostAllocation> = self
            .resolve(machine_id, location_id, as_of)
            .into_iter()
            .filter(|a| a.policy_id == policy_id)
            .collect();
        debug!(
            policy_id = %policy_id,
            machine_id = ?machine_id,
            location_id = ?location_id,
            resolved = resolved.len(),
            "Resolved cost allocations"
        );

        let sum = Self::combine(&resolved, base)?;

        let mut warnings = Vec::new();
        if sum.contributions.len() > 1 {
            warnings.push(Warning::AmbiguousAllocation {
                policy_id: policy_id.to_string(),
                machine_id: machine_id.map(str::to_string),
                location_id: location_id.map(str::to_string),
                allocation_ids: sum
                    .contributions
                    .iter()
                    .map(|c| c.allocation_id.clone())
                    .collect(),
            });
        }
        canonicalize(&mut warnings);

        info!(
            policy_id = %policy_id,
            base = %base,
            cents = %sum.cents,
            contributions = sum.contributions.len(),
            "Allocated cost"
        );

        Ok(AllocationResult {
            policy_id: policy_id.to_string(),
            as_of,
            target: AllocationTarget {
                machine_id: machine_id.map(str::to_string),
                location_id: location_id.map(str::to_string),
            },
            base_cents: base,
            cents: sum.cents,
            contributions: sum.contributions,
            warnings,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
