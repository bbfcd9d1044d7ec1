//! Card account rules
//!
//! Pure invariant checks for a single card, evaluated by the engine against a
//! balance it derived under the card's row lock.

use rust_decimal::Decimal;

use crate::types::{Amount, CardBalance, LedgerError};

/// Check that a card can take a new authorization of `amount`
///
/// The available balance must be strictly greater than the amount, so an
/// authorization for exactly the available balance is rejected.
///
/// # Returns
///
/// * `Ok(Decimal)` - The available balance the decision was made against
/// * `Err(LedgerError::InsufficientFunds)` - If `available <= amount`
pub fn check_authorize(balance: &CardBalance, amount: Amount) -> Result<Decimal, LedgerError> {
    let available = balance.available()?;
    if available > amount.value() {
        Ok(available)
    } else {
        Err(LedgerError::insufficient_funds(
            balance.card_id,
            available,
            amount.value(),
        ))
    }
}

/// Balance after a load of `amount` has been appended
pub fn apply_load(balance: &CardBalance, amount: Amount) -> Result<CardBalance, LedgerError> {
    let loaded = balance
        .loaded
        .checked_add(amount.value())
        .ok_or_else(|| LedgerError::arithmetic_overflow("load"))?;
    Ok(CardBalance { loaded, ..*balance })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn balance(loaded: i64, blocked: i64) -> CardBalance {
        CardBalance {
            card_id: 1,
            loaded: Decimal::new(loaded, 0),
            blocked: Decimal::new(blocked, 0),
        }
    }

    #[rstest]
    #[case::well_below(balance(100, 0), 40, true)]
    #[case::one_cent_below(balance(100, 0), 9999, true)]
    #[case::exactly_available(balance(100, 0), 10000, false)]
    #[case::above_available(balance(100, 40), 6100, false)]
    #[case::nothing_loaded(balance(0, 0), 1, false)]
    fn test_check_authorize(
        #[case] balance: CardBalance,
        #[case] cents: i64,
        #[case] allowed: bool,
    ) {
        let amount = Amount::from_cents(cents).unwrap();
        let result = check_authorize(&balance, amount);
        assert_eq!(result.is_ok(), allowed, "{:?}", result);
        if !allowed {
            assert!(matches!(result, Err(LedgerError::InsufficientFunds { card: 1, .. })));
        }
    }

    #[test]
    fn test_apply_load_increases_available() {
        let after = apply_load(&balance(10, 4), Amount::from_cents(250).unwrap()).unwrap();
        assert_eq!(after.loaded, Decimal::new(1250, 2));
        assert_eq!(after.available().unwrap(), Decimal::new(850, 2));
    }
}
