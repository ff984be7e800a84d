//! # vendops-core: Settlement Engine for VendOps
//!
//! Commission, cost-allocation and settlement-reconciliation logic for a
//! vending fleet, as pure functions over an immutable snapshot.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      VendOps Settlement Flow                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Data access (DB, exports, apps/settle-cli)             │   │
//! │  │    loads transactions, machines, policies, statements           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Snapshot                               │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ vendops-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────┐   ┌────────────┐   ┌──────────────────────┐   │   │
//! │  │   │ aggregator │◄──│ commission │   │     allocation       │   │   │
//! │  │   │  by day /  │   │  segments, │   │  global / location / │   │   │
//! │  │   │  machine   │   │  floors    │   │  machine, summed     │   │   │
//! │  │   └─────▲──────┘   └────────────┘   └──────────────────────┘   │   │
//! │  │         │                                                       │   │
//! │  │   ┌─────┴──────┐   ┌────────────┐                              │   │
//! │  │   │   fees     │◄──│reconciliation                             │   │
//! │  │   │  resolver  │   │  variances │                              │   │
//! │  │   └────────────┘   └────────────┘                              │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ results + warnings (JSON / TS types)   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 Presentation (dashboards, exports)              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Integer-cent `Money` and the single rounding rule
//! - [`types`] - Periods, windows, transactions, machines, statements
//! - [`policy`] - Fee rules, commission policies, cost allocations
//! - [`directory`] - Machine → location / processor lookups
//! - [`aggregator`] - Chunkable per-machine, per-day fold
//! - [`fees`] - Processor fee rule resolution
//! - [`commission`] - Location commission with proration and floors
//! - [`allocation`] - Hierarchical cost allocation
//! - [`reconciliation`] - Calculated vs reported settlement variances
//! - [`engine`] - The `SettlementEngine` facade
//! - [`warning`] / [`error`] - Non-fatal findings and fatal errors
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: same snapshot in, byte-identical result out
//! 2. **No I/O**: the caller loads data and renders results
//! 3. **Integer Money**: cents (i64) and basis points (u32), rounded once
//! 4. **Partial Results**: a bad record becomes a warning, not a failed run
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use vendops_core::{Period, ReconcileScope, SettlementEngine, Snapshot};
//!
//! let snapshot = Snapshot::from_json(r#"{
//!     "machines": [{"id": "vm-1", "location_id": "loc-1", "processor_id": "square"}],
//!     "transactions": [{"id": "tx-1", "machine_id": "vm-1",
//!                       "occurred_at": "2024-06-03T10:00:00Z",
//!                       "qty": 1, "unit_price_cents": 200}],
//!     "fee_rules": [{"processor_id": "square", "percent_bps": 290, "fixed_cents": 10,
//!                    "effective_start": "2024-01-01T00:00:00Z"}]
//! }"#).unwrap();
//!
//! let period = Period::new(
//!     Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
//! ).unwrap();
//!
//! let report = SettlementEngine::new(&snapshot)
//!     .reconcile(&period, &ReconcileScope::All)
//!     .unwrap();
//!
//! // 290 bps of $2.00 is 5.8¢ → 6¢, plus the 10¢ fixed fee.
//! assert_eq!(report.rows[0].calc_fees.cents(), 16);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod aggregator;
pub mod allocation;
pub mod budget;
pub mod commission;
pub mod directory;
pub mod engine;
pub mod error;
pub mod fees;
pub mod money;
pub mod policy;
pub mod reconciliation;
pub mod snapshot;
pub mod types;
pub mod validation;
pub mod warning;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use vendops_core::Money` instead of
// `use vendops_core::money::Money`

pub use allocation::{AllocationResult, AllocationTarget};
pub use budget::Budget;
pub use commission::CommissionResult;
pub use engine::{EngineOptions, SettlementEngine};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use reconciliation::{ReconcileScope, ReconciliationReport, UNMAPPED_PROCESSOR};
pub use snapshot::Snapshot;
pub use types::*;
pub use warning::Warning;
