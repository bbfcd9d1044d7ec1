//! Core business logic module
//!
//! This module contains the ledger's rules and their orchestration:
//! - `traits` - The store and transaction seam the engine drives
//! - `engine` - Operation orchestration (lock, re-derive, validate, insert, commit)
//! - `card_account` - Card balance rules
//! - `lifecycle` - Authorization capture/reverse/refund rules

pub mod card_account;
pub mod engine;
pub mod lifecycle;
pub mod traits;

pub use engine::{EngineConfig, LedgerEngine};
pub use traits::{LedgerStore, LedgerTxn};
