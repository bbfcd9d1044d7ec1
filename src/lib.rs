//! Prepaid Ledger Library
//! # Overview
//!
//! This library provides a prepaid-card ledger: cards are loaded with funds,
//! merchants authorize spends against them, and each authorization is later
//! captured, reversed or refunded in parts.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Amount, CardSummary, Authorization, errors)
//! - [`core`] - Business logic components:
//!   - [`core::engine`] - Operation orchestration under row locks
//!   - [`core::card_account`] - Card balance rules
//!   - [`core::lifecycle`] - Authorization sub-ledger rules
//!   - [`core::traits`] - The store seam
//! - [`store`] - In-memory transactional store
//! - [`api`] - Request handling with status codes and rendered bodies
//! - [`io`] - CSV script parsing and report output
//! - [`runner`] - Script replay driving the engine
//! - [`config`] and [`cli`] - Process configuration and argument parsing
//!
//! # Balances
//!
//! Cards never store balances. Each operation re-derives them from child rows
//! while holding the card's lock:
//! - `loaded`: Sum of all loads
//! - `blocked`: Sum over authorizations of `amount - reversed`
//! - `available`: `loaded - blocked`
//!
//! # Authorization Lifecycle
//!
//! - **Capture**: Settle part of the blocked amount (`captured + reversed <= amount`)
//! - **Reverse**: Release part of the blocked amount back to the card
//! - **Refund**: Return part of the captured amount (`refunded <= captured`)

pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod runner;
pub mod store;
pub mod types;

pub use api::{JsonRenderer, LedgerApi, Rendered, Renderer};
pub use config::LedgerConfig;
pub use core::{EngineConfig, LedgerEngine, LedgerStore, LedgerTxn};
pub use runner::{run_file, RunSummary, ScriptRunner};
pub use store::MemoryStore;
pub use types::{
    AdjustmentKind, Amount, CardId, CardSummary, ErrorKind, LedgerError, MerchantId, StoreError,
    TxnId,
};
