//! Monetary amounts for the prepaid ledger
//!
//! Every amount that enters the ledger goes through [`Amount`], which guarantees
//! a strictly positive value with at most [`MINOR_UNIT_SCALE`] fractional digits.
//! Aggregates derived from stored rows stay plain `Decimal` because they may be
//! zero.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::LedgerError;

/// Number of fractional digits in one minor unit (cents)
pub const MINOR_UNIT_SCALE: u32 = 2;

/// A strictly positive monetary amount in whole cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Validate a raw decimal as a ledger amount
    ///
    /// # Returns
    ///
    /// * `Ok(Amount)` - If the value is positive and representable in cents
    /// * `Err(LedgerError::InvalidAmount)` - Otherwise
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value <= Decimal::ZERO || value.normalize().scale() > MINOR_UNIT_SCALE {
            return Err(LedgerError::invalid_amount(value));
        }
        Ok(Amount(value))
    }

    /// Build an amount from a count of cents
    pub fn from_cents(cents: i64) -> Result<Self, LedgerError> {
        Self::new(Decimal::new(cents, MINOR_UNIT_SCALE))
    }

    /// The underlying exact value
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = Decimal::from_str(trimmed).map_err(|_| LedgerError::invalid_amount(trimmed))?;
        Amount::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
