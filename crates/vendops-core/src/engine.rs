//! # Settlement Engine
//!
//! The facade callers use: one snapshot, three operations.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Snapshot ──► SettlementEngine                                          │
//! │                  │                                                      │
//! │                  ├── compute_commission(location, period)               │
//! │                  │      └── CommissionCalculator ─► TransactionAggregator│
//! │                  │                                                      │
//! │                  ├── allocate_costs(policy, as_of, target)              │
//! │                  │      └── CostAllocationEngine                        │
//! │                  │                                                      │
//! │                  └── reconcile(period, scope)                           │
//! │                         └── ReconciliationEngine ─► FeeRuleResolver     │
//! │                                                  └► TransactionAggregator│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each call starts its own [`BudgetGuard`], so one engine can serve many
//! calls (from many threads: the engine only holds shared references).

use std::borrow::Borrow;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::aggregator::DEFAULT_CHUNK_SIZE;
use crate::allocation::{AllocationResult, AllocationTarget, CostAllocationEngine};
use crate::budget::{Budget, BudgetGuard};
use crate::commission::{CommissionCalculator, CommissionResult};
use crate::directory::MachineDirectory;
use crate::error::CoreResult;
use crate::fees::FeeRuleResolver;
use crate::money::Money;
use crate::reconciliation::{
    ReconcileScope, ReconciliationEngine, ReconciliationReport, DEFAULT_VARIANCE_THRESHOLD_CENTS,
};
use crate::snapshot::Snapshot;
use crate::types::{Period, Transaction};

/// Tunables for an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Rows with `|var_fees|` above this are flagged.
    pub variance_threshold_cents: i64,
    /// Transactions folded between time-budget checks.
    pub chunk_size: usize,
    pub budget: Budget,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            variance_threshold_cents: DEFAULT_VARIANCE_THRESHOLD_CENTS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            budget: Budget::unlimited(),
        }
    }
}

impl EngineOptions {
    pub fn with_max_transactions(mut self, max: usize) -> Self {
        self.budget.max_transactions = Some(max);
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.budget.time_limit = Some(limit);
        self
    }
}

/// Runs commission, allocation and reconciliation over one snapshot.
#[derive(Debug, Clone)]
pub struct SettlementEngine<'a> {
    snapshot: &'a Snapshot,
    directory: MachineDirectory<'a>,
    options: EngineOptions,
}

impl<'a> SettlementEngine<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self::with_options(snapshot, EngineOptions::default())
    }

    pub fn with_options(snapshot: &'a Snapshot, options: EngineOptions) -> Self {
        SettlementEngine {
            snapshot,
            directory: MachineDirectory::new(&snapshot.machines, &snapshot.processor_assignments),
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn start_guard(&self) -> CoreResult<BudgetGuard> {
        let guard = BudgetGuard::start(self.options.budget);
        guard.check_size(self.snapshot.transactions.len())?;
        Ok(guard)
    }

    /// Commission owed to `location_id` for `period`.
    pub fn compute_commission(
        &self,
        location_id: &str,
        period: &Period,
    ) -> CoreResult<CommissionResult> {
        let guard = self.start_guard()?;
        debug!(location_id = %location_id, "compute_commission");

        CommissionCalculator::new(
            &self.directory,
            &self.snapshot.commission_policies,
            &self.snapshot.transactions,
        )
        .with_budget(&guard)
        .with_chunk_size(self.options.chunk_size)
        .compute(location_id, period)
    }

    /// Share of cost policy `policy_id` charged to `target` at `as_of`.
    pub fn allocate_costs(
        &self,
        policy_id: &str,
        as_of: DateTime<Utc>,
        target: &AllocationTarget,
    ) -> CoreResult<AllocationResult> {
        debug!(policy_id = %policy_id, "allocate_costs");

        CostAllocationEngine::new(
            &self.directory,
            &self.snapshot.cost_policies,
            &self.snapshot.cost_allocations,
        )
        .allocate_costs(policy_id, as_of, target)
    }

    /// Variance report of calculated vs reported settlements.
    pub fn reconcile(
        &self,
        period: &Period,
        scope: &ReconcileScope,
    ) -> CoreResult<ReconciliationReport> {
        let guard = self.start_guard()?;
        debug!(scope = ?scope, "reconcile");

        let fees = FeeRuleResolver::new(&self.directory, &self.snapshot.fee_rules);
        ReconciliationEngine::new(
            &self.directory,
            &fees,
            &self.snapshot.transactions,
            &self.snapshot.settlement_statements,
        )
        .with_threshold(Money::from_cents(self.options.variance_threshold_cents))
        .with_budget(&guard)
        .with_chunk_size(self.options.chunk_size)
        .reconcile(period, scope)
    }

    /// [`reconcile`](Self::reconcile) over transactions read from an
    /// iterator; the snapshot's own transaction list is ignored. The size
    /// budget is enforced as records arrive.
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
        let guard = BudgetGuard::start(self.options.budget);
        debug!(scope = ?scope, "reconcile_stream");

        let fees = FeeRuleResolver::new(&self.directory, &self.snapshot.fee_rules);
        ReconciliationEngine::new(
            &self.directory,
            &fees,
            &[],
            &self.snapshot.settlement_statements,
        )
        .with_threshold(Money::from_cents(self.options.variance_threshold_cents))
        .with_budget(&guard)
        .with_chunk_size(self.options.chunk_size)
        .reconcile_stream(period, scope, transactions)
    }
}
