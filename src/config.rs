//! Runtime configuration
//!
//! `LedgerConfig` gathers every tunable of a ledger process. Zero values are
//! never meaningful here, so each one falls back to its default with a
//! warning instead of failing.

use std::time::Duration;

use tracing::warn;

use crate::core::EngineConfig;
use crate::store::DEFAULT_LOCK_WAIT_TIMEOUT;

/// Default number of script rows read per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Configuration for a ledger process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Number of script rows read per batch
    pub batch_size: usize,

    /// Tokio worker threads
    pub worker_threads: usize,

    /// How long a transaction waits for a row lock before giving up
    pub lock_wait_timeout: Duration,

    /// Upper bound on a single operation; `None` for no bound
    pub operation_timeout: Option<Duration>,

    /// Put internal diagnostics in error responses
    pub expose_internal_errors: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            worker_threads: num_cpus::get(),
            lock_wait_timeout: DEFAULT_LOCK_WAIT_TIMEOUT,
            operation_timeout: None,
            expose_internal_errors: false,
        }
    }
}

impl LedgerConfig {
    /// Create a new LedgerConfig with custom values
    ///
    /// Zero `batch_size`, `worker_threads` or `lock_wait_timeout` fall back to
    /// their defaults; a zero `operation_timeout` means no bound.
    pub fn new(
        batch_size: usize,
        worker_threads: usize,
        lock_wait_timeout: Duration,
        operation_timeout: Option<Duration>,
    ) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            warn!(
                batch_size,
                default = default.batch_size,
                "invalid batch size, using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        let worker_threads = if worker_threads == 0 {
            warn!(
                worker_threads,
                default = default.worker_threads,
                "invalid worker thread count, using default"
            );
            default.worker_threads
        } else {
            worker_threads
        };

        let lock_wait_timeout = if lock_wait_timeout.is_zero() {
            warn!(
                default = ?default.lock_wait_timeout,
                "invalid lock wait timeout, using default"
            );
            default.lock_wait_timeout
        } else {
            lock_wait_timeout
        };

        let operation_timeout = match operation_timeout {
            Some(limit) if limit.is_zero() => {
                warn!("zero operation timeout, running without one");
                None
            }
            other => other,
        };

        Self {
            batch_size,
            worker_threads,
            lock_wait_timeout,
            operation_timeout,
            expose_internal_errors: default.expose_internal_errors,
        }
    }

    /// Same configuration with internal error exposure set
    pub fn with_expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    /// The part of the configuration the engine consumes
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            operation_timeout: self.operation_timeout,
        }
    }
}
