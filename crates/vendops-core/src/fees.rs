//! # Fee Rule Resolver
//!
//! Resolves which processor fee schedule applies to a machine at a point in
//! time, and computes the fee on a transaction.
//!
//! ## Precedence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  resolve(machine, t)                                                    │
//! │                                                                         │
//! │  processor = directory.processor_at(machine, t)                        │
//! │       │                                                                 │
//! │       ├── none ─────────────────────────────────► Missing (zero fee)   │
//! │       │                                                                 │
//! │       ├── rule{processor, machine_id = machine} active at t            │
//! │       │       └── found ───────────────────────► MachineOverride       │
//! │       │                                                                 │
//! │       ├── rule{processor, machine_id = null} active at t               │
//! │       │       └── found ───────────────────────► ProcessorDefault      │
//! │       │                                                                 │
//! │       └── otherwise ────────────────────────────► Missing (zero fee)   │
//! │                                                                         │
//! │  Ties within a tier: latest effective_start, then later record.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fee Formula
//! `fee = round_half_up(line_total × percent_bps / 10000) + fixed_cents`
//!
//! The percentage applies to the **line total** (`qty × unit_price`), and
//! the fixed part is charged once per transaction, not per unit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;
use ts_rs::TS;

use crate::directory::MachineDirectory;
use crate::error::CoreResult;
use crate::money::Money;
use crate::policy::ProcessorFeeRule;
use crate::types::{BasisPoints, Transaction};

/// Which tier a resolved fee came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FeeSource {
    MachineOverride,
    ProcessorDefault,
    Missing,
}

/// The fee schedule in effect for one machine at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct FeeResolution {
    pub processor_id: Option<String>,
    pub percent_bps: BasisPoints,
    pub fixed_cents: Money,
    pub source: FeeSource,
}

impl FeeResolution {
    fn missing(processor_id: Option<&str>) -> Self {
        FeeResolution {
            processor_id: processor_id.map(str::to_string),
            percent_bps: BasisPoints::zero(),
            fixed_cents: Money::zero(),
            source: FeeSource::Missing,
        }
    }

    fn from_rule(rule: &ProcessorFeeRule, source: FeeSource) -> Self {
        FeeResolution {
            processor_id: Some(rule.processor_id.clone()),
            percent_bps: rule.percent_bps,
            fixed_cents: rule.fixed_cents,
            source,
        }
    }
}

/// The fee charged on one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeOutcome {
    pub gross: Money,
    pub fee: Money,
    pub resolution: FeeResolution,
}

impl FeeOutcome {
    /// No rule applied; the fee is zero and callers should warn.
    pub fn is_missing(&self) -> bool {
        self.resolution.source == FeeSource::Missing
    }
}

/// Resolves processor fee rules against a machine directory.
#[derive(Debug, Clone)]
pub struct FeeRuleResolver<'a> {
    directory: &'a MachineDirectory<'a>,
    rules_by_processor: HashMap<&'a str, Vec<&'a ProcessorFeeRule>>,
}

impl<'a> FeeRuleResolver<'a> {
    pub fn new(directory: &'a MachineDirectory<'a>, rules: &'a [ProcessorFeeRule]) -> Self {
        let mut rules_by_processor: HashMap<&'a str, Vec<&'a ProcessorFeeRule>> = HashMap::new();
        for rule in rules {
            rules_by_processor
                .entry(rule.processor_id.as_str())
                .or_default()
                .push(rule);
        }

        FeeRuleResolver {
            directory,
            rules_by_processor,
        }
    }

    /// The fee schedule for `machine_id` at `at`.
    pub fn resolve(&self, machine_id: &str, at: DateTime<Utc>) -> FeeResolution {
        let Some(processor_id) = self.directory.processor_at(machine_id, at) else {
            return FeeResolution::missing(None);
        };

        let Some(rules) = self.rules_by_processor.get(processor_id) else {
            return FeeResolution::missing(Some(processor_id));
        };

        let latest_active = |matches: &dyn Fn(&ProcessorFeeRule) -> bool| {
            rules
                .iter()
                .enumerate()
                .filter(|(_, rule)| rule.window.contains(at) && matches(rule))
                .max_by_key(|(idx, rule)| (rule.window.start, *idx))
                .map(|(_, rule)| *rule)
        };

        if let Some(rule) = latest_active(&|r| r.machine_id.as_deref() == Some(machine_id)) {
            return FeeResolution::from_rule(rule, FeeSource::MachineOverride);
        }
        if let Some(rule) = latest_active(&|r| r.machine_id.is_none()) {
            return FeeResolution::from_rule(rule, FeeSource::ProcessorDefault);
        }

        FeeResolution::missing(Some(processor_id))
    }

    /// Fee on one transaction's line total.
    ///
    /// A missing rule is reported through [`FeeOutcome::is_missing`];
    /// callers tally those per machine instead of per transaction.
    ///
    /// ## Example
    /// 290 bps + 10¢ on a 200¢ vend: `round(5.8) + 10 = 16¢`.
    pub fn fee(&self, tx: &Transaction) -> CoreResult<FeeOutcome> {
        let gross = tx.line_total()?;
        let resolution = self.resolve(&tx.machine_id, tx.occurred_at);

        let fee = gross
            .apply_bps(resolution.percent_bps)?
            .checked_add(resolution.fixed_cents)?;

        if resolution.source == FeeSource::Missing {
            trace!(
                transaction_id = %tx.id,
                machine_id = %tx.machine_id,
                processor_id = ?resolution.processor_id,
                "No fee rule active"
            );
        }

        Ok(FeeOutcome {
            gross,
            fee,
            resolution,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ProcessorFeeRuleRecord;
    use crate::types::{Machine, ProcessorAssignment};
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    fn rule(
        processor: &str,
        machine: Option<&str>,
        bps: u32,
        fixed: i64,
        start: u32,
        end: Option<u32>,
    ) -> ProcessorFeeRule {
        ProcessorFeeRule::try_from(ProcessorFeeRuleRecord {
            processor_id: processor.to_string(),
            machine_id: machine.map(str::to_string),
            percent_bps: bps,
            fixed_cents: fixed,
            effective_start: ts(start),
            effective_end: end.map(ts),
        })
        .unwrap()
    }

    fn machines() -> Vec<Machine> {
        vec![
            Machine {
                id: "vm-1".to_string(),
                location_id: Some("loc-1".to_string()),
                processor_id: Some("square".to_string()),
            },
            Machine {
                id: "vm-2".to_string(),
                location_id: Some("loc-1".to_string()),
                processor_id: Some("square".to_string()),
            },
            Machine {
                id: "vm-cash".to_string(),
                location_id: Some("loc-1".to_string()),
                processor_id: None,
            },
        ]
    }

    fn tx(machine: &str, day: u32, qty: i64, price: i64) -> Transaction {
        Transaction {
            id: format!("tx-{}-{}", machine, day),
            machine_id: machine.to_string(),
            occurred_at: ts(day),
            qty,
            unit_price_cents: price,
            unit_cost_cents: 0,
        }
    }

    #[test]
    fn test_fee_on_line_total() {
        let machines = machines();
        let dir = MachineDirectory::new(&machines, &[]);
        let rules = vec![rule("square", None, 290, 10, 1, None)];
        let resolver = FeeRuleResolver::new(&dir, &rules);

        let outcome = resolver.fee(&tx("vm-1", 3, 1, 200)).unwrap();
        assert_eq!(outcome.gross.cents(), 200);
        assert_eq!(outcome.fee.cents(), 16); // round(5.8) + 10
        assert_eq!(outcome.resolution.source, FeeSource::ProcessorDefault);
        assert!(!outcome.is_missing());

        // Percent on the line total, fixed fee once per transaction.
        let outcome = resolver.fee(&tx("vm-1", 3, 4, 200)).unwrap();
        assert_eq!(outcome.gross.cents(), 800);
        assert_eq!(outcome.fee.cents(), 23 + 10); // round(23.2) + 10
    }

    #[test]
    fn test_machine_override_wins() {
        let machines = machines();
        let dir = MachineDirectory::new(&machines, &[]);
        let rules = vec![
            rule("square", None, 290, 10, 1, None),
            rule("square", Some("vm-2"), 150, 0, 1, None),
        ];
        let resolver = FeeRuleResolver::new(&dir, &rules);

        let r1 = resolver.resolve("vm-1", ts(5));
        assert_eq!(r1.source, FeeSource::ProcessorDefault);
        assert_eq!(r1.percent_bps.bps(), 290);

        let r2 = resolver.resolve("vm-2", ts(5));
        assert_eq!(r2.source, FeeSource::MachineOverride);
        assert_eq!(r2.percent_bps.bps(), 150);
        assert_eq!(r2.fixed_cents, Money::zero());
    }

    #[test]
    fn test_expired_override_falls_back_to_default() {
        let machines = machines();
        let dir = MachineDirectory::new(&machines, &[]);
        let rules = vec![
            rule("square", None, 290, 10, 1, None),
            rule("square", Some("vm-2"), 150, 0, 1, Some(10)),
        ];
        let resolver = FeeRuleResolver::new(&dir, &rules);

        assert_eq!(resolver.resolve("vm-2", ts(9)).source, FeeSource::MachineOverride);
        assert_eq!(resolver.resolve("vm-2", ts(10)).source, FeeSource::ProcessorDefault);
    }

    #[test]
    fn test_rule_versions_by_effective_date() {
        let machines = machines();
        let dir = MachineDirectory::new(&machines, &[]);
        let rules = vec![
            rule("square", None, 275, 10, 1, Some(15)),
            rule("square", None, 290, 10, 15, None),
        ];
        let resolver = FeeRuleResolver::new(&dir, &rules);

        assert_eq!(resolver.resolve("vm-1", ts(14)).percent_bps.bps(), 275);
        assert_eq!(resolver.resolve("vm-1", ts(15)).percent_bps.bps(), 290);
    }

    #[test]
    fn test_missing_rule_is_zero_fee() {
        let machines = machines();
        let dir = MachineDirectory::new(&machines, &[]);
        let rules = vec![rule("square", None, 290, 10, 10, None)];
        let resolver = FeeRuleResolver::new(&dir, &rules);

        // Before the only rule starts.
        let outcome = resolver.fee(&tx("vm-1", 2, 1, 200)).unwrap();
        assert_eq!(outcome.fee, Money::zero());
        assert!(outcome.is_missing());
        assert_eq!(outcome.resolution.processor_id.as_deref(), Some("square"));

        // Machine with no processor at all.
        let outcome = resolver.fee(&tx("vm-cash", 12, 1, 200)).unwrap();
        assert_eq!(outcome.fee, Money::zero());
        assert!(outcome.is_missing());
        assert_eq!(outcome.resolution.processor_id, None);
    }

    #[test]
    fn test_resolution_follows_processor_assignment() {
        let machines = machines();
        let assignments = vec![ProcessorAssignment {
            machine_id: "vm-1".to_string(),
            processor_id: "stripe".to_string(),
            effective_start: ts(20),
            effective_end: None,
        }];
        let dir = MachineDirectory::new(&machines, &assignments);
        let rules = vec![
            rule("square", None, 290, 10, 1, None),
            rule("stripe", None, 300, 30, 1, None),
        ];
        let resolver = FeeRuleResolver::new(&dir, &rules);

        assert_eq!(resolver.fee(&tx("vm-1", 19, 1, 1000)).unwrap().fee.cents(), 39);
        assert_eq!(resolver.fee(&tx("vm-1", 20, 1, 1000)).unwrap().fee.cents(), 60);
    }
}
