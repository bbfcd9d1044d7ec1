//! Error types for the prepaid ledger
//!
//! This module defines every failure an engine operation can return, split the
//! same way callers need to treat them:
//!
//! # Error Categories
//!
//! - **Validation Errors**: invalid or malformed amounts
//! - **Lookup Errors**: unknown card, authorization or merchant
//! - **Business-Rule Errors**: insufficient available, authorized or captured funds
//! - **Credential Errors**: missing or unknown merchant token
//! - **Internal Errors**: store faults, cancellation, arithmetic overflow, I/O
//!
//! Business-rule and lookup failures are expected outcomes and carry a stable
//! [`ErrorKind`]. Everything else collapses to [`ErrorKind::Internal`].

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use super::{CardId, MerchantId, TxnId};

/// Failure reported by the ledger store collaborator
///
/// The engine never inspects these beyond [`StoreError::is_retryable`]; they are
/// surfaced to callers as [`LedgerError::Store`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store cannot be reached or refused the request
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Waiting for a row lock exceeded the configured timeout
    #[error("lock wait timeout on {entity}")]
    LockTimeout {
        /// Human-readable row identity, e.g. `card 7`
        entity: String,
    },

    /// The store failed to make the transaction durable
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// A constraint outside the ledger invariants was violated (foreign key, uniqueness)
    #[error("constraint violation: {0}")]
    Constraint(String),
}

impl StoreError {
    /// Whether repeating the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout { .. } | StoreError::CommitFailed(_)
        )
    }
}

/// Stable, machine-checkable failure kind
///
/// This is what a request layer should branch on; the `Display` text of
/// [`LedgerError`] is for humans and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidAmount,
    CardNotFound,
    TxnNotFound,
    MerchantNotFound,
    InsufficientFunds,
    InsufficientAuthorizedFunds,
    InsufficientCapturedFunds,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    /// Snake-case identifier used in responses
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::CardNotFound => "card_not_found",
            ErrorKind::TxnNotFound => "txn_not_found",
            ErrorKind::MerchantNotFound => "merchant_not_found",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::InsufficientAuthorizedFunds => "insufficient_authorized_funds",
            ErrorKind::InsufficientCapturedFunds => "insufficient_captured_funds",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP-equivalent status for this kind
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidAmount => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::InsufficientFunds
            | ErrorKind::InsufficientAuthorizedFunds
            | ErrorKind::InsufficientCapturedFunds => 403,
            ErrorKind::CardNotFound | ErrorKind::TxnNotFound | ErrorKind::MerchantNotFound => 404,
            ErrorKind::Internal => 500,
        }
    }
}

/// Main error type for the prepaid ledger
///
/// Each variant carries enough context to diagnose the rejection from a log
/// line alone.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Amount is zero, negative, finer than one cent, or not a number
    #[error("Invalid amount '{amount}'")]
    InvalidAmount {
        /// The offending amount as received
        amount: String,
    },

    /// Referenced card does not exist
    #[error("Card {card} not found")]
    CardNotFound {
        /// Card ID that was not found
        card: CardId,
    },

    /// Referenced authorization does not exist (or belongs to another merchant)
    #[error("Transaction {txn} not found")]
    TransactionNotFound {
        /// Authorization ID that was not found
        txn: TxnId,
    },

    /// Referenced merchant does not exist
    #[error("Merchant {merchant} not found")]
    MerchantNotFound {
        /// Merchant ID that was not found
        merchant: MerchantId,
    },

    /// Authorization would not leave the card with a positive available balance
    #[error("Insufficient funds on card {card}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Card ID
        card: CardId,
        /// Available balance observed under the card lock
        available: Decimal,
        /// Requested authorization amount
        requested: Decimal,
    },

    /// Capture or reverse exceeds the amount still blocked on the authorization
    #[error("Cannot {operation} {requested} on transaction {txn}: only {blocked} still blocked")]
    InsufficientAuthorizedFunds {
        /// Authorization ID
        txn: TxnId,
        /// Amount still awaiting capture or reverse
        blocked: Decimal,
        /// Requested amount
        requested: Decimal,
        /// Operation that failed (`capture` or `reverse`)
        operation: String,
    },

    /// Refund exceeds what was captured and not yet refunded
    #[error("Cannot refund {requested} on transaction {txn}: only {refundable} refundable")]
    InsufficientCapturedFunds {
        /// Authorization ID
        txn: TxnId,
        /// Captured minus already refunded
        refundable: Decimal,
        /// Requested amount
        requested: Decimal,
    },

    /// Merchant credential missing or unknown
    #[error("Unauthorized")]
    Unauthorized,

    /// Checked arithmetic on an aggregate overflowed
    #[error("Arithmetic overflow in {operation}")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: String,
    },

    /// Caller cancelled before the operation committed
    #[error("{operation} cancelled before commit")]
    Cancelled {
        /// Operation that was abandoned
        operation: String,
    },

    /// Operation deadline elapsed before commit
    #[error("{operation} exceeded its deadline")]
    DeadlineExceeded {
        /// Operation that timed out
        operation: String,
    },

    /// The ledger store failed; the transaction has been rolled back
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error while reading a script or writing output
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O error
        message: String,
    },

    /// CSV parsing error occurred
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ParseError {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },

    /// An unanticipated fault was caught at the boundary
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail, only shown when configured to do so
        message: String,
    },
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::Io {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        LedgerError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl LedgerError {
    /// Stable kind for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            LedgerError::CardNotFound { .. } => ErrorKind::CardNotFound,
            LedgerError::TransactionNotFound { .. } => ErrorKind::TxnNotFound,
            LedgerError::MerchantNotFound { .. } => ErrorKind::MerchantNotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::InsufficientAuthorizedFunds { .. } => {
                ErrorKind::InsufficientAuthorizedFunds
            }
            LedgerError::InsufficientCapturedFunds { .. } => ErrorKind::InsufficientCapturedFunds,
            LedgerError::Unauthorized => ErrorKind::Unauthorized,
            LedgerError::ArithmeticOverflow { .. }
            | LedgerError::Cancelled { .. }
            | LedgerError::DeadlineExceeded { .. }
            | LedgerError::Store(_)
            | LedgerError::Io { .. }
            | LedgerError::ParseError { .. }
            | LedgerError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this is an internal fault rather than an expected outcome
    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    /// Whether the caller may safely retry the whole operation
    ///
    /// Nothing is observable before commit, so abandoned and timed-out
    /// operations are always safe to repeat.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Store(e) => e.is_retryable(),
            LedgerError::Cancelled { .. } | LedgerError::DeadlineExceeded { .. } => true,
            _ => false,
        }
    }
}

// Helper functions for creating common errors

impl LedgerError {
    /// Create an InvalidAmount error
    pub fn invalid_amount(amount: impl ToString) -> Self {
        LedgerError::InvalidAmount {
            amount: amount.to_string(),
        }
    }

    /// Create a CardNotFound error
    pub fn card_not_found(card: CardId) -> Self {
        LedgerError::CardNotFound { card }
    }

    /// Create a TransactionNotFound error
    pub fn transaction_not_found(txn: TxnId) -> Self {
        LedgerError::TransactionNotFound { txn }
    }

    /// Create a MerchantNotFound error
    pub fn merchant_not_found(merchant: MerchantId) -> Self {
        LedgerError::MerchantNotFound { merchant }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(card: CardId, available: Decimal, requested: Decimal) -> Self {
        LedgerError::InsufficientFunds {
            card,
            available,
            requested,
        }
    }

    /// Create an InsufficientAuthorizedFunds error
    pub fn insufficient_authorized_funds(
        txn: TxnId,
        blocked: Decimal,
        requested: Decimal,
        operation: &str,
    ) -> Self {
        LedgerError::InsufficientAuthorizedFunds {
            txn,
            blocked,
            requested,
            operation: operation.to_string(),
        }
    }

    /// Create an InsufficientCapturedFunds error
    pub fn insufficient_captured_funds(txn: TxnId, refundable: Decimal, requested: Decimal) -> Self {
        LedgerError::InsufficientCapturedFunds {
            txn,
            refundable,
            requested,
        }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str) -> Self {
        LedgerError::ArithmeticOverflow {
            operation: operation.to_string(),
        }
    }

    /// Create a Cancelled error
    pub fn cancelled(operation: &str) -> Self {
        LedgerError::Cancelled {
            operation: operation.to_string(),
        }
    }

    /// Create a DeadlineExceeded error
    pub fn deadline_exceeded(operation: &str) -> Self {
        LedgerError::DeadlineExceeded {
            operation: operation.to_string(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        LedgerError::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal::Decimal;

    #[rstest]
    #[case::invalid_amount(
        LedgerError::InvalidAmount { amount: "-5".to_string() },
        "Invalid amount '-5'"
    )]
    #[case::card_not_found(LedgerError::CardNotFound { card: 7 }, "Card 7 not found")]
    #[case::insufficient_funds(
        LedgerError::InsufficientFunds { card: 1, available: Decimal::new(10000, 2), requested: Decimal::new(10000, 2) },
        "Insufficient funds on card 1: available 100.00, requested 100.00"
    )]
    #[case::insufficient_authorized(
        LedgerError::InsufficientAuthorizedFunds { txn: 3, blocked: Decimal::ZERO, requested: Decimal::ONE, operation: "capture".to_string() },
        "Cannot capture 1 on transaction 3: only 0 still blocked"
    )]
    #[case::insufficient_captured(
        LedgerError::InsufficientCapturedFunds { txn: 3, refundable: Decimal::new(50, 1), requested: Decimal::new(60, 1) },
        "Cannot refund 6.0 on transaction 3: only 5.0 refundable"
    )]
    #[case::parse_error_with_line(
        LedgerError::ParseError { line: Some(42), message: "Invalid field".to_string() },
        "CSV parse error at line 42: Invalid field"
    )]
    #[case::parse_error_without_line(
        LedgerError::ParseError { line: None, message: "Invalid field".to_string() },
        "CSV parse error: Invalid field"
    )]
    #[case::store(
        LedgerError::Store(StoreError::LockTimeout { entity: "card 1".to_string() }),
        "Store error: lock wait timeout on card 1"
    )]
    fn test_error_display(#[case] error: LedgerError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::invalid_amount(LedgerError::invalid_amount("0"), ErrorKind::InvalidAmount, 400)]
    #[case::card(LedgerError::card_not_found(1), ErrorKind::CardNotFound, 404)]
    #[case::txn(LedgerError::transaction_not_found(1), ErrorKind::TxnNotFound, 404)]
    #[case::merchant(LedgerError::merchant_not_found(1), ErrorKind::MerchantNotFound, 404)]
    #[case::funds(
        LedgerError::insufficient_funds(1, Decimal::ZERO, Decimal::ONE),
        ErrorKind::InsufficientFunds,
        403
    )]
    #[case::authorized(
        LedgerError::insufficient_authorized_funds(1, Decimal::ZERO, Decimal::ONE, "reverse"),
        ErrorKind::InsufficientAuthorizedFunds,
        403
    )]
    #[case::captured(
        LedgerError::insufficient_captured_funds(1, Decimal::ZERO, Decimal::ONE),
        ErrorKind::InsufficientCapturedFunds,
        403
    )]
    #[case::unauthorized(LedgerError::Unauthorized, ErrorKind::Unauthorized, 401)]
    #[case::overflow(LedgerError::arithmetic_overflow("load"), ErrorKind::Internal, 500)]
    #[case::cancelled(LedgerError::cancelled("capture"), ErrorKind::Internal, 500)]
    #[case::store(
        LedgerError::from(StoreError::Unavailable("down".to_string())),
        ErrorKind::Internal,
        500
    )]
    fn test_kind_and_status(
        #[case] error: LedgerError,
        #[case] kind: ErrorKind,
        #[case] status: u16,
    ) {
        assert_eq!(error.kind(), kind);
        assert_eq!(error.kind().status_code(), status);
    }

    #[rstest]
    #[case::lock_timeout(LedgerError::Store(StoreError::LockTimeout { entity: "txn 1".to_string() }), true)]
    #[case::commit_failed(LedgerError::Store(StoreError::CommitFailed("io".to_string())), true)]
    #[case::constraint(LedgerError::Store(StoreError::Constraint("fk".to_string())), false)]
    #[case::cancelled(LedgerError::cancelled("load"), true)]
    #[case::deadline(LedgerError::deadline_exceeded("load"), true)]
    #[case::business_rule(LedgerError::insufficient_funds(1, Decimal::ZERO, Decimal::ONE), false)]
    fn test_is_retryable(#[case] error: LedgerError, #[case] retryable: bool) {
        assert_eq!(error.is_retryable(), retryable);
    }

    #[test]
    fn test_kind_identifiers_are_snake_case() {
        assert_eq!(ErrorKind::InsufficientAuthorizedFunds.as_str(), "insufficient_authorized_funds");
        assert_eq!(ErrorKind::TxnNotFound.as_str(), "txn_not_found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let error: LedgerError = io_error.into();
        assert!(matches!(error, LedgerError::Io { .. }));
        assert!(error.is_internal());
    }
}
