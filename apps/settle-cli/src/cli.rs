//! Command-line surface of `vendops-settle`.
//!
//! ```text
//! vendops-settle [--config FILE] <command>
//!
//!   commission --snapshot S --location L --start T --end T
//!   allocate   --snapshot S --policy P --as-of T [--machine M] [--location L]
//!   reconcile  --snapshot S --start T --end T [--processor P]
//! ```
//!
//! Every command prints one JSON document on stdout.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use vendops_core::{AllocationTarget, Period, ReconcileScope, SettlementEngine, Snapshot};

use crate::config::SettleConfig;
use crate::error::{CliError, CliResult};

#[derive(Debug, Parser)]
#[command(name = "vendops-settle", version, about = "Settle a VendOps snapshot")]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "VENDOPS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Commission owed to a location over a period
    Commission {
        /// Snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        location: String,
        /// Inclusive start (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_timestamp)]
        start: DateTime<Utc>,
        /// Exclusive end (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_timestamp)]
        end: DateTime<Utc>,
    },

    /// Share of a cost policy charged to a machine or location
    Allocate {
        /// Snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        policy: String,
        #[arg(long, value_parser = parse_timestamp)]
        as_of: DateTime<Utc>,
        #[arg(long)]
        machine: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },

    /// Calculated vs reported settlements per processor
    Reconcile {
        /// Snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long, value_parser = parse_timestamp)]
        start: DateTime<Utc>,
        #[arg(long, value_parser = parse_timestamp)]
        end: DateTime<Utc>,
        /// Restrict the report to one processor
        #[arg(long)]
        processor: Option<String>,
    },
}

/// Accepts RFC 3339 timestamps or bare dates (midnight UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got '{}'", value))
}

/// Runs one command and returns the JSON it produced.
pub fn run(cli: Cli) -> CliResult<String> {
    let config = SettleConfig::load(cli.config)?;

    match cli.command {
        Command::Commission {
            snapshot,
            location,
            start,
            end,
        } => {
            let snapshot = read_snapshot(&snapshot)?;
            let engine = SettlementEngine::with_options(&snapshot, config.engine_options());
            let period = Period::new(start, end)?;
            let result = engine.compute_commission(&location, &period)?;
            info!(location_id = %location, cents = result.cents.cents(), "Commission computed");
            render(&result, config.output.pretty)
        }

        Command::Allocate {
            snapshot,
            policy,
            as_of,
            machine,
            location,
        } => {
            let snapshot = read_snapshot(&snapshot)?;
            let engine = SettlementEngine::with_options(&snapshot, config.engine_options());
            let target = AllocationTarget {
                machine_id: machine,
                location_id: location,
            };
            let result = engine.allocate_costs(&policy, as_of, &target)?;
            info!(policy_id = %policy, cents = result.cents.cents(), "Costs allocated");
            render(&result, config.output.pretty)
        }

        Command::Reconcile {
            snapshot,
            start,
            end,
            processor,
        } => {
            let snapshot = read_snapshot(&snapshot)?;
            let engine = SettlementEngine::with_options(&snapshot, config.engine_options());
            let period = Period::new(start, end)?;
            let scope = processor.map_or(ReconcileScope::All, ReconcileScope::Processor);
            let report = engine.reconcile(&period, &scope)?;
            info!(
                rows = report.rows.len(),
                flagged = report.totals.flagged_rows,
                "Reconciliation complete"
            );
            render(&report, config.output.pretty)
        }
    }
}

fn read_snapshot(path: &Path) -> CliResult<Snapshot> {
    debug!(?path, "Reading snapshot");
    let json = std::fs::read_to_string(path).map_err(|source| CliError::ReadSnapshot {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot = Snapshot::from_json(&json)?;
    debug!(
        transactions = snapshot.transactions.len(),
        machines = snapshot.machines.len(),
        "Snapshot loaded"
    );
    Ok(snapshot)
}

fn render<T: Serialize>(value: &T, pretty: bool) -> CliResult<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vendops_core::CoreError;

    const SNAPSHOT: &str = r#"{
        "machines": [
            { "id": "vm-1", "location_id": "loc-1", "processor_id": "square" }
        ],
        "fee_rules": [
            { "processor_id": "square", "percent_bps": 290, "fixed_cents": 10,
              "effective_start": "2024-01-01T00:00:00Z" }
        ],
        "commission_policies": [
            { "location_id": "loc-1", "model": "percent_gross", "pct_bps": 1000,
              "effective_start": "2024-01-01T00:00:00Z" }
        ],
        "cost_policies": [
            { "id": "rent", "base_cents": 10000 }
        ],
        "cost_allocations": [
            { "id": "a-1", "policy_id": "rent", "level": "location", "target_id": "loc-1",
              "method": "percentage", "value": 2500,
              "effective_start": "2024-01-01T00:00:00Z" }
        ],
        "transactions": [
            { "id": "t-1", "machine_id": "vm-1", "occurred_at": "2024-06-10T12:00:00Z",
              "qty": 1, "unit_price_cents": 200 }
        ],
        "settlement_statements": [
            { "id": "sq-june", "processor_id": "square",
              "period_start": "2024-06-01T00:00:00Z", "period_end": "2024-06-30T23:59:59Z",
              "gross_cents": 200, "fees_cents": 36, "net_cents": 164 }
        ]
    }"#;

    fn write_snapshot(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("snapshot.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SNAPSHOT.as_bytes()).unwrap();
        path
    }

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("settle.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn cli(dir: &tempfile::TempDir, args: &[&str]) -> Cli {
        let config = write_config(dir, "[output]\npretty = false\n");
        let mut argv = vec![
            "vendops-settle".to_string(),
            "--config".to_string(),
            config.display().to_string(),
        ];
        argv.extend(args.iter().map(|s| s.to_string()));
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp("2024-06-01").unwrap(),
            parse_timestamp("2024-06-01T00:00:00Z").unwrap()
        );
        assert_eq!(
            parse_timestamp("2024-06-01T02:00:00+02:00").unwrap(),
            parse_timestamp("2024-06-01").unwrap()
        );
        assert!(parse_timestamp("June 1st").is_err());
    }

    #[test]
    fn test_commission_command() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = write_snapshot(&dir);
        let cli = cli(
            &dir,
            &[
                "commission",
                "--snapshot",
                snapshot.to_str().unwrap(),
                "--location",
                "loc-1",
                "--start",
                "2024-06-01",
                "--end",
                "2024-07-01",
            ],
        );

        let json: serde_json::Value = serde_json::from_str(&run(cli).unwrap()).unwrap();
        assert_eq!(json["cents"], 20);
        assert_eq!(json["location_id"], "loc-1");
    }

    #[test]
    fn test_allocate_command() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = write_snapshot(&dir);
        let cli = cli(
            &dir,
            &[
                "allocate",
                "--snapshot",
                snapshot.to_str().unwrap(),
                "--policy",
                "rent",
                "--as-of",
                "2024-06-15",
                "--machine",
                "vm-1",
            ],
        );

        let json: serde_json::Value = serde_json::from_str(&run(cli).unwrap()).unwrap();
        assert_eq!(json["cents"], 2500);
    }

    #[test]
    fn test_reconcile_command() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = write_snapshot(&dir);
        let cli = cli(
            &dir,
            &[
                "reconcile",
                "--snapshot",
                snapshot.to_str().unwrap(),
                "--start",
                "2024-06-01",
                "--end",
                "2024-07-01",
                "--processor",
                "square",
            ],
        );

        let output = run(cli).unwrap();
        assert!(!output.contains('\n'));
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        let row = &json["rows"][0];
        assert_eq!(row["processor_id"], "square");
        // 200 * 2.9% = 5.8 -> 6, plus 10 fixed.
        assert_eq!(row["calc_fees"], 16);
        assert_eq!(row["var_fees"], -20);
        assert_eq!(row["flagged"], true);
    }

    #[test]
    fn test_inverted_period_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = write_snapshot(&dir);
        let cli = cli(
            &dir,
            &[
                "reconcile",
                "--snapshot",
                snapshot.to_str().unwrap(),
                "--start",
                "2024-07-01",
                "--end",
                "2024-06-01",
            ],
        );

        assert!(matches!(
            run(cli),
            Err(CliError::Engine(CoreError::InvalidPeriod { .. }))
        ));
    }

    #[test]
    fn test_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        let cli = cli(
            &dir,
            &[
                "commission",
                "--snapshot",
                missing.to_str().unwrap(),
                "--location",
                "loc-1",
                "--start",
                "2024-06-01",
                "--end",
                "2024-07-01",
            ],
        );

        assert!(matches!(run(cli), Err(CliError::ReadSnapshot { .. })));
    }

    #[test]
    fn test_malformed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "transactions": 7 }"#).unwrap();
        let cli = cli(
            &dir,
            &[
                "reconcile",
                "--snapshot",
                path.to_str().unwrap(),
                "--start",
                "2024-06-01",
                "--end",
                "2024-07-01",
            ],
        );

        assert!(matches!(
            run(cli),
            Err(CliError::Engine(CoreError::InvalidSnapshot(_)))
        ));
    }
}
