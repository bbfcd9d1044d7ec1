use crate::config::LedgerConfig;
use crate::types::CardId;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Replay a prepaid-card ledger script and report balances
#[derive(Parser, Debug)]
#[command(name = "prepaid-ledger")]
#[command(about = "Replay a prepaid-card ledger script and report balances", long_about = None)]
pub struct CliArgs {
    /// Input CSV file path containing ledger commands
    #[arg(value_name = "INPUT", help = "Path to the input CSV script")]
    pub input_file: PathBuf,

    /// Number of script rows read per batch
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        env = "LEDGER_BATCH_SIZE",
        help = "Number of script rows read per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Tokio worker threads
    #[arg(
        long = "worker-threads",
        value_name = "COUNT",
        env = "LEDGER_WORKER_THREADS",
        help = "Number of runtime worker threads (default: CPU cores)"
    )]
    pub worker_threads: Option<usize>,

    /// Row lock wait bound in milliseconds
    #[arg(
        long = "lock-wait-ms",
        value_name = "MS",
        env = "LEDGER_LOCK_WAIT_MS",
        help = "How long an operation waits for a row lock (default: 5000)"
    )]
    pub lock_wait_ms: Option<u64>,

    /// Per-operation deadline in milliseconds
    #[arg(
        long = "operation-timeout-ms",
        value_name = "MS",
        env = "LEDGER_OPERATION_TIMEOUT_MS",
        help = "Deadline for a single operation (default: none)"
    )]
    pub operation_timeout_ms: Option<u64>,

    /// Print this card's statement instead of all balances
    #[arg(
        long = "statement",
        value_name = "CARD",
        env = "LEDGER_STATEMENT",
        help = "Write the statement of CARD instead of the balance report"
    )]
    pub statement: Option<CardId>,
}

impl CliArgs {
    /// Build the process configuration from CLI arguments
    ///
    /// Missing values take their defaults; zero values fall back to defaults
    /// with a warning (see [`LedgerConfig::new`]).
    pub fn to_config(&self) -> LedgerConfig {
        let default = LedgerConfig::default();
        LedgerConfig::new(
            self.batch_size.unwrap_or(default.batch_size),
            self.worker_threads.unwrap_or(default.worker_threads),
            self.lock_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(default.lock_wait_timeout),
            self.operation_timeout_ms.map(Duration::from_millis),
        )
    }
}
