//! # vendops-settle
//!
//! Batch front end for the VendOps settlement engine.
//!
//! ## Run Sequence
//! ```text
//! 1. Initialize tracing (logs go to stderr)
//! 2. Parse arguments
//! 3. Load settle.toml + VENDOPS_* overrides
//! 4. Read the snapshot JSON
//! 5. Run commission / allocate / reconcile
//! 6. Print the result JSON on stdout
//! ```
//!
//! ## Environment Variables
//! - `RUST_LOG`: log filter (default `info` plus `debug` for the VendOps crates)
//! - `VENDOPS_CONFIG`: config file path
//! - `VENDOPS_*`: engine overrides, see [`config`]

mod cli;
mod config;
mod error;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let output = cli::run(cli).context("vendops-settle failed")?;
    println!("{}", output);

    Ok(())
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - Set `RUST_LOG=debug` for verbose output
/// - Set `RUST_LOG=vendops_core=trace` for engine internals
/// - Default: INFO, DEBUG for VendOps crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vendops_core=debug,vendops_settle=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
