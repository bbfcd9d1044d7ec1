//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `amount`: Validated fixed-point monetary amounts
//! - `card`: Card balances, summaries and paging
//! - `authorization`: Authorizations, their sub-ledger totals and statement lines
//! - `merchant`: Merchant records
//! - `error`: Error types for the ledger

pub mod amount;
pub mod authorization;
pub mod card;
pub mod error;
pub mod merchant;

pub use amount::{Amount, MINOR_UNIT_SCALE};
pub use authorization::{
    AdjustmentKind, Authorization, AuthorizationDetail, AuthorizationState, AuthorizationTotals,
    NewAuthorization, StatementLine,
};
pub use card::{CardBalance, CardPage, CardSummary, PageRequest};
pub use error::{ErrorKind, LedgerError, StoreError};
pub use merchant::Merchant;

/// Card identifier (store-assigned, positive)
pub type CardId = i64;

/// Merchant identifier (store-assigned, positive)
pub type MerchantId = i64;

/// Authorization identifier, called `TxnID` on the merchant surface
pub type TxnId = i64;

/// Load identifier
pub type LoadId = i64;

/// Identifier of a capture, refund or reverse row
pub type AdjustmentId = i64;

/// Capture identifier
pub type CaptureId = AdjustmentId;

/// Refund identifier
pub type RefundId = AdjustmentId;

/// Reverse identifier
pub type ReverseId = AdjustmentId;
