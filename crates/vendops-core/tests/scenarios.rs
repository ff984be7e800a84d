// End-to-end settlement scenarios through the SettlementEngine facade.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use vendops_core::allocation::AllocationTarget;
use vendops_core::{
    CoreError, EngineOptions, Period, ReconcileScope, SettlementEngine, Snapshot, ValidationError,
    Warning, UNMAPPED_PROCESSOR,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const FLEET: &str = r#"{
    "machines": [
        {"id": "vm-lobby",  "location_id": "loc-hq",   "processor_id": "square"},
        {"id": "vm-gym",    "location_id": "loc-gym",  "processor_id": "square"},
        {"id": "vm-cash",   "location_id": "loc-gym"}
    ],
    "processor_assignments": [
        {"machine_id": "vm-gym", "processor_id": "stripe",
         "effective_start": "2024-06-16T00:00:00Z"}
    ],
    "fee_rules": [
        {"processor_id": "square", "percent_bps": 290, "fixed_cents": 10,
         "effective_start": "2024-01-01T00:00:00Z"},
        {"processor_id": "stripe", "percent_bps": 250, "fixed_cents": 0,
         "effective_start": "2024-01-01T00:00:00Z"}
    ],
    "commission_policies": [
        {"location_id": "loc-hq", "model": "percent_gross", "pct_bps": 1000,
         "effective_start": "2024-01-01T00:00:00Z"},
        {"location_id": "loc-gym", "model": "flat_month", "flat_cents": 25000,
         "effective_start": "2024-01-01T00:00:00Z"},
        {"location_id": "loc-empty", "model": "percent_gross", "pct_bps": 500,
         "min_cents": 5000, "effective_start": "2024-01-01T00:00:00Z"}
    ],
    "cost_policies": [
        {"id": "insurance", "name": "Fleet insurance", "base_cents": 240000}
    ],
    "cost_allocations": [
        {"id": "ins-hq", "policy_id": "insurance", "level": "location", "target_id": "loc-hq",
         "method": "percentage", "value": 5000, "effective_start": "2024-01-01T00:00:00Z"},
        {"id": "ins-lobby", "policy_id": "insurance", "level": "machine", "target_id": "vm-lobby",
         "method": "percentage", "value": 5000, "effective_start": "2024-01-01T00:00:00Z"}
    ],
    "transactions": [
        {"id": "t-01", "machine_id": "vm-lobby", "occurred_at": "2024-06-02T09:00:00Z",
         "qty": 1, "unit_price_cents": 60000},
        {"id": "t-02", "machine_id": "vm-lobby", "occurred_at": "2024-06-20T09:00:00Z",
         "qty": 2, "unit_price_cents": 20000},
        {"id": "t-03", "machine_id": "vm-gym", "occurred_at": "2024-06-10T18:30:00Z",
         "qty": 1, "unit_price_cents": 200},
        {"id": "t-04", "machine_id": "vm-gym", "occurred_at": "2024-06-18T18:30:00Z",
         "qty": 1, "unit_price_cents": 400},
        {"id": "t-05", "machine_id": "vm-cash", "occurred_at": "2024-06-11T12:00:00Z",
         "qty": 3, "unit_price_cents": 150},
        {"id": "t-06", "machine_id": "vm-lobby", "occurred_at": "2024-07-01T00:00:00Z",
         "qty": 1, "unit_price_cents": 99999}
    ],
    "settlement_statements": [
        {"id": "sq-june", "processor_id": "square", "period_start": "2024-06-01T00:00:00Z",
         "period_end": "2024-06-30T23:59:59Z", "gross_cents": 100200, "fees_cents": 2940,
         "net_cents": 97260},
        {"id": "st-june", "processor_id": "stripe", "period_start": "2024-06-16T00:00:00Z",
         "period_end": "2024-06-30T23:59:59Z", "gross_cents": 400, "fees_cents": 10,
         "net_cents": 390}
    ]
}"#;

fn fleet() -> Snapshot {
    Snapshot::from_json(FLEET).unwrap()
}

fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).unwrap()
}

fn june() -> Period {
    Period::new(at(6, 1), at(7, 1)).unwrap()
}

// ---------------------------------------------------------------------------
// Commission
// ---------------------------------------------------------------------------

#[test]
fn percent_gross_commission() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);

    // 60000 + 2 × 20000 = 100000 gross; t-06 falls on the exclusive end.
    let result = engine.compute_commission("loc-hq", &june()).unwrap();
    assert_eq!(result.breakdown.gross.cents(), 100_000);
    assert_eq!(result.cents.cents(), 10_000);
    assert!(result.warnings.is_empty());
}

#[test]
fn flat_month_commission_prorated_over_half_month() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);
    let first_half = Period::new(at(6, 1), at(6, 16)).unwrap();

    let result = engine.compute_commission("loc-gym", &first_half).unwrap();
    assert_eq!(result.cents.cents(), 12_500);
    assert_eq!(result.breakdown.percent_component.cents(), 0);
}

#[test]
fn floor_enforced_with_no_sales() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);
    let thirty_days = Period::new(at(6, 1), at(7, 1)).unwrap();

    let result = engine.compute_commission("loc-empty", &thirty_days).unwrap();
    assert_eq!(result.cents.cents(), 5_000);
    assert_eq!(result.breakdown.floor_adjustment.cents(), 5_000);
    assert_eq!(result.breakdown.segments[0].tx_count, 0);
}

#[test]
fn unknown_location_warns() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);

    let result = engine.compute_commission("loc-nowhere", &june()).unwrap();
    assert_eq!(result.cents.cents(), 0);
    assert!(matches!(
        result.warnings.as_slice(),
        [Warning::NoCommissionPolicy { .. }]
    ));
}

#[test]
fn inverted_period_rejected() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);
    let inverted = Period {
        start: at(6, 30),
        end: at(6, 1),
    };

    assert!(matches!(
        engine.compute_commission("loc-hq", &inverted),
        Err(CoreError::InvalidPeriod { .. })
    ));
    assert!(matches!(
        engine.reconcile(&inverted, &ReconcileScope::All),
        Err(CoreError::InvalidPeriod { .. })
    ));
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

#[test]
fn overlapping_half_allocations_cover_whole_premium() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);

    let result = engine
        .allocate_costs("insurance", at(6, 15), &AllocationTarget::machine("vm-lobby"))
        .unwrap();
    assert_eq!(result.cents.cents(), 240_000);
    assert_eq!(result.contributions.len(), 2);
    assert!(result.warnings.iter().all(Warning::is_informational));
}

#[test]
fn allocation_for_other_machine_only_sees_its_location() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);

    let result = engine
        .allocate_costs("insurance", at(6, 15), &AllocationTarget::machine("vm-gym"))
        .unwrap();
    assert_eq!(result.cents.cents(), 0);
    assert_eq!(result.target.location_id.as_deref(), Some("loc-gym"));
}

#[test]
fn unknown_cost_policy_is_fatal() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);

    assert!(matches!(
        engine.allocate_costs("rent", at(6, 15), &AllocationTarget::default()),
        Err(CoreError::UnknownCostPolicy(_))
    ));
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[test]
fn reconciliation_report() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);
    let report = engine.reconcile(&june(), &ReconcileScope::All).unwrap();

    // square: t-01 (60000 → 1740+10), t-02 (40000 → 1160+10), t-03 (200 → 6+10)
    let square = report.row("square").unwrap();
    assert_eq!(square.tx_count, 3);
    assert_eq!(square.calc_gross.cents(), 100_200);
    assert_eq!(square.calc_fees.cents(), 1_750 + 1_170 + 16);
    assert_eq!(square.var_fees.cents(), 2_936 - 2_940);
    assert!(square.flagged);

    // stripe: t-04 after the reassignment (400 → 10)
    let stripe = report.row("stripe").unwrap();
    assert_eq!(stripe.tx_count, 1);
    assert_eq!(stripe.calc_fees.cents(), 10);
    assert!(!stripe.flagged);

    // vm-cash has no processor
    let unmapped = report.row(UNMAPPED_PROCESSOR).unwrap();
    assert_eq!(unmapped.tx_count, 1);
    assert_eq!(unmapped.calc_gross.cents(), 450);

    assert_eq!(report.totals.tx_count, 5);
    assert_eq!(report.rows[0].processor_id, "square");
}

#[test]
fn fee_variance_of_twenty_cents_is_flagged() {
    let snapshot = Snapshot::from_json(
        r#"{
        "machines": [{"id": "vm-1", "processor_id": "square"}],
        "fee_rules": [{"processor_id": "square", "percent_bps": 500, "fixed_cents": 0,
                       "effective_start": "2024-01-01T00:00:00Z"}],
        "transactions": [{"id": "t-1", "machine_id": "vm-1",
                          "occurred_at": "2024-06-05T00:00:00Z",
                          "qty": 1, "unit_price_cents": 10000}],
        "settlement_statements": [{"id": "s-1", "processor_id": "square",
                                   "period_start": "2024-06-01T00:00:00Z",
                                   "period_end": "2024-06-30T00:00:00Z",
                                   "gross_cents": 10000, "fees_cents": 480,
                                   "net_cents": 9520}]
    }"#,
    )
    .unwrap();

    let report = SettlementEngine::new(&snapshot)
        .reconcile(&june(), &ReconcileScope::All)
        .unwrap();
    let row = report.row("square").unwrap();
    assert_eq!(row.calc_fees.cents(), 500);
    assert_eq!(row.stmt_fees.cents(), 480);
    assert_eq!(row.var_fees.cents(), 20);
    assert!(row.flagged);
}

#[test]
fn configurable_variance_threshold() {
    let snapshot = fleet();
    let options = EngineOptions {
        variance_threshold_cents: 5,
        ..EngineOptions::default()
    };
    let report = SettlementEngine::with_options(&snapshot, options)
        .reconcile(&june(), &ReconcileScope::All)
        .unwrap();
    assert_eq!(report.flagged().count(), 0);
}

#[test]
fn unmapped_scope_reports_only_processorless_sales() {
    let snapshot = fleet();
    let report = SettlementEngine::new(&snapshot)
        .reconcile(&june(), &ReconcileScope::Processor(UNMAPPED_PROCESSOR.to_string()))
        .unwrap();

    assert_eq!(report.rows.len(), 1);
    let unmapped = &report.rows[0];
    assert_eq!(unmapped.processor_id, UNMAPPED_PROCESSOR);
    assert_eq!(unmapped.tx_count, 1);
    assert_eq!(unmapped.calc_gross.cents(), 450);
    assert_eq!(unmapped.calc_fees.cents(), 0);
    assert_eq!(unmapped.stmt_count, 0);
    assert_eq!(
        unmapped.warnings,
        vec![Warning::MissingFeeRule {
            machine_id: "vm-cash".to_string(),
            processor_id: None,
            count: 1,
            first_transaction_id: "t-05".to_string(),
            last_transaction_id: "t-05".to_string(),
        }]
    );
    assert_eq!(report.totals.tx_count, 1);
    assert_eq!(report.totals.stmt_count, 0);
}

#[test]
fn streamed_reconciliation_matches_snapshot_run() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);

    let from_snapshot = engine.reconcile(&june(), &ReconcileScope::All).unwrap();
    let streamed = engine
        .reconcile_stream(&june(), &ReconcileScope::All, snapshot.transactions.iter())
        .unwrap();
    assert_eq!(from_snapshot, streamed);
}

#[test]
fn high_volume_cash_machine_keeps_one_warning() {
    let snapshot = fleet();
    let engine = SettlementEngine::new(&snapshot);
    let template = snapshot
        .transactions
        .iter()
        .find(|tx| tx.id == "t-05")
        .cloned()
        .unwrap();
    let vends = (0..50_000).map(|i| vendops_core::Transaction {
        id: format!("cash-{:05}", i),
        ..template.clone()
    });

    let report = engine
        .reconcile_stream(&june(), &ReconcileScope::All, vends)
        .unwrap();
    let unmapped = report.row(UNMAPPED_PROCESSOR).unwrap();
    assert_eq!(unmapped.tx_count, 50_000);
    assert_eq!(unmapped.warnings.len(), 1);
    assert!(matches!(
        &unmapped.warnings[0],
        Warning::MissingFeeRule { count: 50_000, .. }
    ));
}

// ---------------------------------------------------------------------------
// Fatal errors
// ---------------------------------------------------------------------------

#[test]
fn statement_sums_overflowing_i64_fail_the_run() {
    let snapshot = Snapshot::from_json(
        r#"{
        "machines": [{"id": "vm-1", "processor_id": "square"}],
        "settlement_statements": [
            {"id": "s-1", "processor_id": "square",
             "period_start": "2024-06-01T00:00:00Z", "period_end": "2024-06-15T00:00:00Z",
             "gross_cents": 5000000000000000000, "fees_cents": 0,
             "net_cents": 5000000000000000000},
            {"id": "s-2", "processor_id": "square",
             "period_start": "2024-06-15T00:00:00Z", "period_end": "2024-06-30T00:00:00Z",
             "gross_cents": 5000000000000000000, "fees_cents": 0,
             "net_cents": 5000000000000000000}
        ]
    }"#,
    )
    .unwrap();

    assert!(matches!(
        SettlementEngine::new(&snapshot).reconcile(&june(), &ReconcileScope::All),
        Err(CoreError::ArithmeticOverflow { .. })
    ));
}

#[test]
fn fixed_fee_overflow_fails_the_run() {
    let snapshot = Snapshot::from_json(
        r#"{
        "machines": [{"id": "vm-1", "processor_id": "square"}],
        "fee_rules": [{"processor_id": "square", "percent_bps": 290,
                       "fixed_cents": 9223372036854775807,
                       "effective_start": "2024-01-01T00:00:00Z"}],
        "transactions": [{"id": "t-1", "machine_id": "vm-1",
                          "occurred_at": "2024-06-05T00:00:00Z",
                          "qty": 1, "unit_price_cents": 200}]
    }"#,
    )
    .unwrap();

    assert!(matches!(
        SettlementEngine::new(&snapshot).reconcile(&june(), &ReconcileScope::All),
        Err(CoreError::ArithmeticOverflow { .. })
    ));
}

#[test]
fn inverted_processor_assignment_rejects_snapshot() {
    let result = Snapshot::from_json(
        r#"{
        "machines": [{"id": "vm-gym", "location_id": "loc-gym", "processor_id": "square"}],
        "processor_assignments": [
            {"machine_id": "vm-gym", "processor_id": "stripe",
             "effective_start": "2024-06-16T00:00:00Z",
             "effective_end": "2024-06-01T00:00:00Z"}
        ]
    }"#,
    );

    assert!(matches!(
        result,
        Err(CoreError::Validation(ValidationError::InvalidFormat { .. }))
    ));
}

#[test]
fn unknown_commission_model_rejects_snapshot() {
    let json = FLEET.replace("\"model\": \"flat_month\"", "\"model\": \"tiered\"");
    assert_ne!(json, FLEET);

    assert!(matches!(
        Snapshot::from_json(&json),
        Err(CoreError::UnknownPolicyModel(ref model)) if model == "tiered"
    ));
}

// ---------------------------------------------------------------------------
// Determinism & concurrency
// ---------------------------------------------------------------------------

#[test]
fn identical_snapshot_gives_identical_bytes() {
    let first = serde_json::to_string(
        &SettlementEngine::new(&fleet())
            .reconcile(&june(), &ReconcileScope::All)
            .unwrap(),
    )
    .unwrap();
    let second = serde_json::to_string(
        &SettlementEngine::new(&fleet())
            .reconcile(&june(), &ReconcileScope::All)
            .unwrap(),
    )
    .unwrap();
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_agree() {
    let snapshot = Arc::new(fleet());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let snapshot = Arc::clone(&snapshot);
            tokio::task::spawn_blocking(move || {
                let engine = SettlementEngine::new(&snapshot);
                let report = engine.reconcile(&june(), &ReconcileScope::All).unwrap();
                let commission = engine.compute_commission("loc-hq", &june()).unwrap();
                (
                    serde_json::to_string(&report).unwrap(),
                    commission.cents.cents(),
                )
            })
        })
        .collect();

    let mut outputs = Vec::new();
    for handle in handles {
        outputs.push(handle.await.unwrap());
    }
    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(outputs[0].1, 10_000);
}
