//! Ledger store implementations
//!
//! - `memory` - In-process store with row locks and atomic commits

pub mod memory;

pub use memory::{MemoryStore, MemoryTxn, DEFAULT_LOCK_WAIT_TIMEOUT};
