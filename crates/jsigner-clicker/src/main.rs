//! jsigner-clicker - native certificate dialog helper
//!
//! Waits for the operating system's certificate-selection dialog, selects
//! the row matching the given certificate and accepts it. Prints one JSON
//! line `{"found": bool, "selected": bool}` on stdout and exits with 0
//! (selected), 1 (no dialog or no matching row) or 2 (failure). Diagnostics
//! go to stderr.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use jsigner_core::certs::SelectionFilter;
use jsigner_core::dialog::StrategyOutcome;
use jsigner_core::dialog::helper::{EXIT_ERROR, EXIT_NOT_FOUND, EXIT_SELECTED};
use jsigner_core::dialog::native::pick_certificate;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// jsigner-clicker - accepts the native certificate-selection dialog
#[derive(Parser, Debug)]
#[command(name = "jsigner-clicker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Serial number of the certificate (may be empty)
    #[arg(long, default_value = "")]
    serial: String,

    /// Subject common name
    #[arg(long)]
    cn: String,

    /// Issuer common name
    #[arg(long, default_value = "")]
    issuer_cn: String,

    /// Seconds to wait for the dialog
    #[arg(long, default_value = "10")]
    timeout: f64,

    /// Log level for stderr diagnostics
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let (outcome, code) = match run(&args) {
        Ok(outcome) if outcome.selected => (outcome, EXIT_SELECTED),
        Ok(outcome) => (outcome, EXIT_NOT_FOUND),
        Err(e) => {
            error!("{e:#}");
            (StrategyOutcome::default(), EXIT_ERROR)
        },
    };

    match serde_json::to_string(&outcome) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("cannot encode result: {e}"),
    }
    ExitCode::from(u8::try_from(code).unwrap_or(2))
}

fn run(args: &Args) -> Result<StrategyOutcome> {
    let timeout = Duration::try_from_secs_f64(args.timeout)
        .with_context(|| format!("invalid timeout {}", args.timeout))?;

    let mut filter = SelectionFilter::new(args.cn.trim(), args.issuer_cn.trim());
    if !args.serial.trim().is_empty() {
        filter = filter.with_serial(args.serial.trim());
    }
    debug!(?filter, ?timeout, "waiting for certificate dialog");

    pick_certificate(&filter, timeout).context("native dialog automation failed")
}
