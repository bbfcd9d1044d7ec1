//! Prepaid ledger CLI
//!
//! Replays a CSV script of ledger commands against an in-memory ledger.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- script.csv > cards.csv
//! cargo run -- --statement 1 script.csv > statement.csv
//! LEDGER_OPERATION_TIMEOUT_MS=500 cargo run -- --worker-threads 4 script.csv
//! RUST_LOG=prepaid_ledger=debug cargo run -- script.csv
//! ```
//!
//! The report CSV goes to stdout; logs go to stderr.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (file not found, unreadable input, cancelled run, unknown statement card)

use prepaid_ledger::{cli, run_file};
use std::process;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::parse_args();
    let config = args.to_config();

    let stdout = std::io::stdout();
    let mut output = stdout.lock();
    if let Err(e) = run_file(&config, &args.input_file, args.statement, &mut output) {
        error!(error = %e, "ledger run failed");
        process::exit(1);
    }
}
