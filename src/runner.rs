//! Command-script replay
//!
//! Replays a CSV script of ledger commands against a fresh in-memory ledger and
//! reports the resulting card balances, or one card's statement.
//!
//! # Architecture
//!
//! ```text
//! run_file
//!     ├── LedgerConfig (batch size, workers, lock wait, deadline)
//!     ├── AsyncReader (batch CSV reading)
//!     ├── ScriptRunner (sequential command application)
//!     └── LedgerEngine<MemoryStore>
//! ```
//!
//! Commands are applied one at a time in file order, so store-assigned IDs are
//! deterministic and a script can refer to the cards, merchants and
//! authorizations it created earlier. Rejected commands are logged and counted;
//! only I/O failures and cancellation end a run early.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use futures::io::AsyncRead;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::core::{LedgerEngine, LedgerStore};
use crate::io::{write_cards_csv, write_statement_csv, AsyncReader, LedgerCommand};
use crate::store::MemoryStore;
use crate::types::{AdjustmentKind, CardId, LedgerError};

/// Counts from one script replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Commands that committed
    pub applied: u64,
    /// Commands the ledger refused
    pub rejected: u64,
    /// Rows that could not be parsed into a command
    pub skipped: u64,
}

/// Applies script commands to a ledger engine
#[derive(Debug, Clone)]
pub struct ScriptRunner<S: LedgerStore> {
    engine: LedgerEngine<S>,
}

impl<S: LedgerStore> ScriptRunner<S> {
    pub fn new(engine: LedgerEngine<S>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &LedgerEngine<S> {
        &self.engine
    }

    /// Apply one command
    ///
    /// # Returns
    ///
    /// * `Ok(i64)` - ID of the row the command created
    /// * `Err(LedgerError)` - Whatever the engine rejected the command with
    pub async fn apply(
        &self,
        command: &LedgerCommand,
        cancel: &CancellationToken,
    ) -> Result<i64, LedgerError> {
        match command {
            LedgerCommand::CreateCard { name } => self.engine.create_card(name, cancel).await,
            LedgerCommand::CreateMerchant { name } => {
                self.engine.create_merchant(name, name, cancel).await
            }
            LedgerCommand::Load { card, amount } => self.engine.load(*card, *amount, cancel).await,
            LedgerCommand::Authorize {
                merchant,
                card,
                amount,
                text,
            } => {
                self.engine
                    .authorize(*merchant, *card, *amount, text, cancel)
                    .await
            }
            LedgerCommand::Adjust { kind, txn, amount } => match kind {
                AdjustmentKind::Capture => {
                    self.engine.capture(*txn, *amount, cancel).await
                }
                AdjustmentKind::Reverse => {
                    self.engine.reverse(*txn, *amount, cancel).await
                }
                AdjustmentKind::Refund => {
                    self.engine.refund(*txn, *amount, cancel).await
                }
            },
        }
    }

    /// Replay every command from `reader`
    ///
    /// # Arguments
    ///
    /// * `reader` - Async source of script CSV
    /// * `batch_size` - Rows read per batch
    /// * `cancel` - Stops the replay before the next command once cancelled
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - If the whole script was read
    /// * `Err(LedgerError::Cancelled)` - If the replay was cancelled
    pub async fn run<R>(
        &self,
        reader: R,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, LedgerError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut reader = AsyncReader::new(reader);
        let mut summary = RunSummary::default();

        loop {
            let batch = reader.read_batch(batch_size).await;
            if batch.is_empty() {
                break;
            }

            for command in &batch {
                if cancel.is_cancelled() {
                    return Err(LedgerError::cancelled("script"));
                }
                match self.apply(command, cancel).await {
                    Ok(id) => {
                        debug!(command = command.name(), id, "command applied");
                        summary.applied += 1;
                    }
                    Err(e @ LedgerError::Cancelled { .. }) => return Err(e),
                    Err(e) if e.is_internal() => {
                        warn!(command = command.name(), error = %e, "command failed");
                        summary.rejected += 1;
                    }
                    Err(e) => {
                        debug!(
                            command = command.name(),
                            kind = e.kind().as_str(),
                            error = %e,
                            "command rejected"
                        );
                        summary.rejected += 1;
                    }
                }
            }
        }

        summary.skipped = reader.skipped();
        Ok(summary)
    }

    /// Write the report: every card's balances, or one card's statement
    pub async fn report(
        &self,
        statement: Option<CardId>,
        output: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<(), LedgerError> {
        match statement {
            Some(card_id) => {
                let lines = self.engine.statement(card_id, cancel).await?;
                write_statement_csv(&lines, output)
            }
            None => {
                let cards = self.engine.list_cards(cancel).await?;
                write_cards_csv(&cards, output)
            }
        }
    }
}

/// Replay a script file and write the report to `output`
///
/// Builds a multi-threaded tokio runtime sized by `config.worker_threads` and a
/// fresh [`MemoryStore`]. Ctrl-C cancels the run.
///
/// # Arguments
///
/// * `config` - Process configuration
/// * `input_path` - Path to the script CSV
/// * `statement` - Report this card's statement instead of all balances
/// * `output` - Where the report CSV goes
///
/// # Returns
///
/// * `Ok(RunSummary)` - If the script was replayed and the report written
/// * `Err(LedgerError)` - On a fatal error (missing file, I/O, cancellation,
///   unknown statement card)
pub fn run_file(
    config: &LedgerConfig,
    input_path: &Path,
    statement: Option<CardId>,
    output: &mut dyn Write,
) -> Result<RunSummary, LedgerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .map_err(|e| LedgerError::internal(format!("failed to create tokio runtime: {}", e)))?;

    runtime.block_on(async {
        let store = Arc::new(MemoryStore::new(config.lock_wait_timeout));
        let runner = ScriptRunner::new(LedgerEngine::new(store, config.engine_config()));

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling replay");
                    cancel.cancel();
                }
            })
        };

        let file = tokio::fs::File::open(input_path)
            .await
            .map_err(|e| LedgerError::Io {
                message: format!("failed to open '{}': {}", input_path.display(), e),
            })?;

        let outcome = async {
            let summary = runner
                .run(file.compat(), config.batch_size, &cancel)
                .await?;
            runner.report(statement, output, &cancel).await?;
            Ok::<_, LedgerError>(summary)
        }
        .await;
        interrupt.abort();

        let summary = outcome?;
        info!(
            applied = summary.applied,
            rejected = summary.rejected,
            skipped = summary.skipped,
            "script replayed"
        );
        Ok(summary)
    })
}
