//! Authorization lifecycle rules
//!
//! An authorization moves from open towards closed as captures and reverses
//! consume its blocked amount. Refunds run alongside, bounded by what has been
//! captured. Nothing ever moves back.

use rust_decimal::Decimal;

use crate::types::{AdjustmentKind, Amount, AuthorizationTotals, LedgerError};

/// Check that an adjustment of `amount` fits the authorization's current totals
///
/// - Capture and Reverse must not exceed `amount - captured - reversed`
/// - Refund must not exceed `captured - refunded`
///
/// # Returns
///
/// * `Ok(AuthorizationTotals)` - Totals as they will be once the row is appended
/// * `Err(LedgerError::InsufficientAuthorizedFunds)` - Capture/Reverse over the blocked amount
/// * `Err(LedgerError::InsufficientCapturedFunds)` - Refund over the refundable amount
pub fn check_adjustment(
    kind: AdjustmentKind,
    totals: &AuthorizationTotals,
    amount: Amount,
) -> Result<AuthorizationTotals, LedgerError> {
    let requested = amount.value();
    let mut next = *totals;

    match kind {
        AdjustmentKind::Capture | AdjustmentKind::Reverse => {
            let blocked = totals.wait_capture()?;
            if requested > blocked {
                return Err(LedgerError::insufficient_authorized_funds(
                    totals.txn_id,
                    blocked,
                    requested,
                    kind.as_str(),
                ));
            }
            if kind == AdjustmentKind::Capture {
                next.captured = add(totals.captured, requested, kind)?;
            } else {
                next.reversed = add(totals.reversed, requested, kind)?;
            }
        }
        AdjustmentKind::Refund => {
            let refundable = totals.refundable()?;
            if requested > refundable {
                return Err(LedgerError::insufficient_captured_funds(
                    totals.txn_id,
                    refundable,
                    requested,
                ));
            }
            next.refunded = add(totals.refunded, requested, kind)?;
        }
    }

    Ok(next)
}

fn add(current: Decimal, amount: Decimal, kind: AdjustmentKind) -> Result<Decimal, LedgerError> {
    current
        .checked_add(amount)
        .ok_or_else(|| LedgerError::arithmetic_overflow(kind.as_str()))
}
