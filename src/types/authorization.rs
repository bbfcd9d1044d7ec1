//! Authorization-related types for the prepaid ledger
//!
//! An authorization (a "transaction" on the merchant surface) is written once.
//! Captures, refunds and reverses are child rows appended against it; the totals
//! below are their sums.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{Amount, CardId, LedgerError, MerchantId, TxnId};

/// Child row kinds appended against an authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentKind {
    /// Settle part of the blocked amount
    Capture,

    /// Return part of the captured amount out-of-band
    Refund,

    /// Release part of the blocked amount back to the card
    Reverse,
}

impl AdjustmentKind {
    /// Lowercase operation name used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentKind::Capture => "capture",
            AdjustmentKind::Refund => "refund",
            AdjustmentKind::Reverse => "reverse",
        }
    }
}

/// Fields supplied when creating an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuthorization {
    pub merchant_id: MerchantId,
    pub card_id: CardId,
    pub amount: Amount,
    pub text: String,
}

/// A stored authorization row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Authorization {
    #[serde(rename = "TxnID")]
    pub txn_id: TxnId,
    #[serde(rename = "MerchantID")]
    pub merchant_id: MerchantId,
    #[serde(rename = "CardID")]
    pub card_id: CardId,
    pub amount: Amount,
    pub text: String,
    pub create_time: DateTime<Utc>,
}

/// Lifecycle position of an authorization, derived from its totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationState {
    /// Nothing captured or reversed yet
    Open,

    /// Some funds captured, some still blocked
    PartiallyCaptured,

    /// Nothing captured, some reversed, some still blocked
    PartiallyReversed,

    /// Captures and reverses have consumed the whole amount
    Closed,
}

/// Sub-ledger sums for one authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorizationTotals {
    #[serde(rename = "TxnID")]
    pub txn_id: TxnId,
    pub amount: Decimal,
    pub captured: Decimal,
    pub refunded: Decimal,
    pub reversed: Decimal,
}

impl AuthorizationTotals {
    /// Funds still blocked: `amount - captured - reversed`
    pub fn wait_capture(&self) -> Result<Decimal, LedgerError> {
        self.amount
            .checked_sub(self.captured)
            .and_then(|rest| rest.checked_sub(self.reversed))
            .ok_or_else(|| LedgerError::arithmetic_overflow("wait capture amount"))
    }

    /// Funds that can still be refunded: `captured - refunded`
    pub fn refundable(&self) -> Result<Decimal, LedgerError> {
        self.captured
            .checked_sub(self.refunded)
            .ok_or_else(|| LedgerError::arithmetic_overflow("refundable amount"))
    }

    /// Current lifecycle position
    pub fn state(&self) -> Result<AuthorizationState, LedgerError> {
        let wait = self.wait_capture()?;
        Ok(if wait <= Decimal::ZERO {
            AuthorizationState::Closed
        } else if self.captured > Decimal::ZERO {
            AuthorizationState::PartiallyCaptured
        } else if self.reversed > Decimal::ZERO {
            AuthorizationState::PartiallyReversed
        } else {
            AuthorizationState::Open
        })
    }
}

/// Authorization with its totals, as returned by the read operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorizationDetail {
    pub authorization: Authorization,
    pub totals: AuthorizationTotals,
}

/// One line of a card statement: date, memo, merchant name, authorized amount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementLine {
    pub date: NaiveDate,
    pub text: String,
    pub location: String,
    pub amount: Decimal,
}
