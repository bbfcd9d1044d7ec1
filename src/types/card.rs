//! Card-related types for the prepaid ledger
//!
//! A card never stores its balances; [`CardBalance`] is re-derived from the
//! append-only load and authorization rows every time it is needed.

use rust_decimal::Decimal;
use serde::Serialize;

use super::{CardId, LedgerError};

/// Aggregates for a single card, derived from its child rows
///
/// `blocked` counts every authorized amount that has not been reversed,
/// including the captured part, since captured funds have left the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardBalance {
    /// The card these aggregates belong to
    pub card_id: CardId,

    /// Sum of all loads
    pub loaded: Decimal,

    /// Sum over authorizations of `amount - reversed`
    pub blocked: Decimal,
}

impl CardBalance {
    /// Funds not held by any authorization: `loaded - blocked`
    pub fn available(&self) -> Result<Decimal, LedgerError> {
        self.loaded
            .checked_sub(self.blocked)
            .ok_or_else(|| LedgerError::arithmetic_overflow("available balance"))
    }
}

/// Card as returned by the read operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CardSummary {
    /// Store-assigned card identity
    #[serde(rename = "CardID")]
    pub card_id: CardId,

    /// Display name
    pub name: String,

    /// `loaded - blocked` at read time
    pub available_balance: Decimal,

    /// Authorized and not reversed at read time; captured funds stay included
    pub blocked_amount: Decimal,
}

impl CardSummary {
    /// Build a summary from a name and freshly derived aggregates
    pub fn new(name: impl Into<String>, balance: CardBalance) -> Result<Self, LedgerError> {
        Ok(CardSummary {
            card_id: balance.card_id,
            name: name.into(),
            available_balance: balance.available()?,
            blocked_amount: balance.blocked,
        })
    }
}

/// Keyset page request for card listings
///
/// Cards are listed in ascending ID order starting strictly after `after`.
/// `limit: None` returns everything that remains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Last card ID of the previous page
    pub after: Option<CardId>,

    /// Maximum number of cards to return
    pub limit: Option<usize>,
}

impl PageRequest {
    /// First page of at most `limit` cards
    pub fn first(limit: usize) -> Self {
        PageRequest {
            after: None,
            limit: Some(limit),
        }
    }
}

/// One page of a card listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CardPage {
    /// Cards in ascending ID order
    pub cards: Vec<CardSummary>,

    /// Pass as `after` to fetch the next page; `None` when exhausted
    pub next_after: Option<CardId>,
}
