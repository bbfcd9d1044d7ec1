//! Core traits for the ledger store collaborator
//!
//! The engine never touches storage directly. It drives a [`LedgerStore`], which
//! hands out [`LedgerTxn`] handles offering row-level locking reads, buffered
//! inserts, and atomic commit/rollback. Any transactional relational store can sit
//! behind these traits; [`crate::store::MemoryStore`] is the in-process reference
//! implementation.

use async_trait::async_trait;

use crate::types::{
    AdjustmentId, AdjustmentKind, Amount, AuthorizationDetail, AuthorizationTotals, CardBalance,
    CardId, CardSummary, LoadId, Merchant, MerchantId, NewAuthorization, PageRequest,
    StatementLine, StoreError, TxnId,
};

/// A transactional store holding the ledger tables
///
/// Reads on this trait take no locks and observe committed state only. They may
/// be stale by the time the caller looks at them and must never feed a write
/// decision.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Transaction handle type
    type Txn: LedgerTxn + 'static;

    /// Open a new transaction
    async fn begin(&self) -> Result<Self::Txn, StoreError>;

    /// Insert a card with no loads, committed immediately
    async fn insert_card(&self, name: &str) -> Result<CardId, StoreError>;

    /// Insert a merchant, committed immediately
    ///
    /// Tokens are unique; a duplicate is a [`StoreError::Constraint`].
    async fn insert_merchant(&self, name: &str, auth_token: &str)
        -> Result<MerchantId, StoreError>;

    /// Read one card with its derived balances
    async fn card(&self, card_id: CardId) -> Result<Option<CardSummary>, StoreError>;

    /// Read cards in ascending ID order
    async fn cards(&self, page: &PageRequest) -> Result<Vec<CardSummary>, StoreError>;

    /// Read one authorization with its totals
    async fn authorization(&self, txn_id: TxnId) -> Result<Option<AuthorizationDetail>, StoreError>;

    /// Resolve a merchant credential
    async fn merchant_by_token(&self, auth_token: &str) -> Result<Option<Merchant>, StoreError>;

    /// Authorizations drawn against a card, joined with merchant names, oldest first
    async fn statement(&self, card_id: CardId) -> Result<Vec<StatementLine>, StoreError>;
}

/// An open store transaction
///
/// Locks acquired through `lock_*` are held until `commit` or `rollback`.
/// Dropping a transaction without finishing it must roll it back and release
/// its locks, so a cancelled caller can never leave a row locked.
#[async_trait]
pub trait LedgerTxn: Send {
    /// Lock a card row exclusively and derive its balance from committed rows
    ///
    /// Returns `None` if the card does not exist.
    async fn lock_card(&mut self, card_id: CardId) -> Result<Option<CardBalance>, StoreError>;

    /// Lock an authorization row exclusively and derive its totals from committed rows
    ///
    /// Returns `None` if the authorization does not exist.
    async fn lock_authorization(
        &mut self,
        txn_id: TxnId,
    ) -> Result<Option<AuthorizationTotals>, StoreError>;

    /// Whether a merchant exists
    async fn merchant_exists(&mut self, merchant_id: MerchantId) -> Result<bool, StoreError>;

    /// Append a load row
    async fn insert_load(&mut self, card_id: CardId, amount: Amount) -> Result<LoadId, StoreError>;

    /// Append an authorization row
    async fn insert_authorization(
        &mut self,
        authorization: NewAuthorization,
    ) -> Result<TxnId, StoreError>;

    /// Append a capture, refund or reverse row
    async fn insert_adjustment(
        &mut self,
        kind: AdjustmentKind,
        txn_id: TxnId,
        amount: Amount,
    ) -> Result<AdjustmentId, StoreError>;

    /// Make every insert visible atomically and release all locks
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every insert and release all locks
    async fn rollback(self) -> Result<(), StoreError>;
}
