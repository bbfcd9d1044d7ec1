//! Ledger operation orchestration
//!
//! This module provides the `LedgerEngine` struct, which runs every ledger
//! operation as an independent unit of work against a [`LedgerStore`].
//!
//! # Design
//!
//! All four authorization-side mutations, and loads, follow one protocol:
//!
//! 1. Begin a store transaction
//! 2. Lock the row being checked (card for authorize/load, authorization for
//!    capture/refund/reverse) and re-derive its aggregate from child rows
//! 3. Validate with the rules in [`card_account`](super::card_account) or
//!    [`lifecycle`](super::lifecycle)
//! 4. Insert the new child row
//! 5. Commit, or roll back and return the typed error
//!
//! # Architecture
//!
//! ```text
//! LedgerEngine
//!     ├── Arc<S: LedgerStore>   (transactions, row locks, committed reads)
//!     └── EngineConfig          (operation deadline)
//! ```
//!
//! # Thread Safety
//!
//! The engine holds no ledger state of its own. Clones share the store and all
//! cross-request coordination happens through the store's row locks, so two
//! authorizations against one card are serialized while different cards
//! proceed in parallel.
//!
//! # Cancellation
//!
//! Every operation takes a `CancellationToken` and races it, plus the optional
//! operation deadline, against the work. Losing the race drops the in-flight
//! transaction, which rolls it back and releases its locks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::card_account::{apply_load, check_authorize};
use super::lifecycle::check_adjustment;
use super::traits::{LedgerStore, LedgerTxn};
use crate::types::{
    AdjustmentId, AdjustmentKind, Amount, AuthorizationDetail, CaptureId, CardId, CardPage,
    CardSummary, LedgerError, LoadId, Merchant, MerchantId, NewAuthorization, PageRequest,
    RefundId, ReverseId, StatementLine, TxnId,
};

/// Engine tuning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on a single operation, lock waits included
    pub operation_timeout: Option<Duration>,
}

/// Ledger operation orchestrator
///
/// `LedgerEngine` is cheap to clone and every clone drives the same store.
pub struct LedgerEngine<S: LedgerStore> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: LedgerStore> Clone for LedgerEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
        }
    }
}

impl<S: LedgerStore> std::fmt::Debug for LedgerEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Create a new LedgerEngine
    ///
    /// # Arguments
    ///
    /// * `store` - Arc-wrapped store shared by every clone of the engine
    /// * `config` - Engine tuning
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Create a card with nothing loaded
    ///
    /// # Returns
    ///
    /// * `Ok(CardId)` - The new card's ID
    /// * `Err(LedgerError::Store)` - If the store is unavailable
    pub async fn create_card(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<CardId, LedgerError> {
        self.run("create_card", cancel, async {
            let card_id = self.store.insert_card(name).await?;
            info!(card = card_id, "card created");
            Ok(card_id)
        })
        .await
    }

    /// Register a merchant and the token it authenticates with
    pub async fn create_merchant(
        &self,
        name: &str,
        auth_token: &str,
        cancel: &CancellationToken,
    ) -> Result<MerchantId, LedgerError> {
        self.run("create_merchant", cancel, async {
            let merchant_id = self.store.insert_merchant(name, auth_token).await?;
            info!(merchant = merchant_id, "merchant created");
            Ok(merchant_id)
        })
        .await
    }

    /// Load funds onto a card
    ///
    /// # Arguments
    ///
    /// * `card_id` - Card to credit
    /// * `amount` - Positive amount with at most two decimal places
    ///
    /// # Returns
    ///
    /// * `Ok(LoadId)` - If the load was committed
    /// * `Err(LedgerError::InvalidAmount)` - If the amount is not a valid positive amount
    /// * `Err(LedgerError::CardNotFound)` - If the card does not exist
    pub async fn load(
        &self,
        card_id: CardId,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<LoadId, LedgerError> {
        let amount = Amount::new(amount)?;
        self.run("load", cancel, async {
            let mut txn = self.store.begin().await?;
            let outcome = Self::load_locked(&mut txn, card_id, amount).await;
            Self::finish(txn, outcome, "load").await
        })
        .await
    }

    async fn load_locked(
        txn: &mut S::Txn,
        card_id: CardId,
        amount: Amount,
    ) -> Result<LoadId, LedgerError> {
        let balance = txn
            .lock_card(card_id)
            .await?
            .ok_or_else(|| LedgerError::card_not_found(card_id))?;
        let after = apply_load(&balance, amount)?;
        let load_id = txn.insert_load(card_id, amount).await?;
        info!(card = card_id, load = load_id, %amount, loaded = %after.loaded, "card loaded");
        Ok(load_id)
    }

    /// Read a card's available balance and blocked amount
    ///
    /// Takes no locks; the result may be stale by the time it is observed.
    ///
    /// # Returns
    ///
    /// * `Ok(CardSummary)` - The card with its derived balances
    /// * `Err(LedgerError::CardNotFound)` - If the card does not exist
    pub async fn balance(
        &self,
        card_id: CardId,
        cancel: &CancellationToken,
    ) -> Result<CardSummary, LedgerError> {
        self.run("balance", cancel, async {
            self.store
                .card(card_id)
                .await?
                .ok_or_else(|| LedgerError::card_not_found(card_id))
        })
        .await
    }

    /// Every card, in ascending ID order
    pub async fn list_cards(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<CardSummary>, LedgerError> {
        self.run("list_cards", cancel, async {
            let cards = self.store.cards(&PageRequest::default()).await?;
            debug!(count = cards.len(), "cards listed");
            Ok(cards)
        })
        .await
    }

    /// One page of cards, keyed by card ID
    ///
    /// `next_after` is set when the page came back full and more cards may
    /// follow; pass it as `after` to fetch the next page.
    pub async fn list_cards_page(
        &self,
        page: PageRequest,
        cancel: &CancellationToken,
    ) -> Result<CardPage, LedgerError> {
        self.run("list_cards_page", cancel, async {
            let cards = self.store.cards(&page).await?;
            let next_after = match page.limit {
                Some(limit) if limit > 0 && cards.len() == limit => {
                    cards.last().map(|card| card.card_id)
                }
                _ => None,
            };
            Ok(CardPage { cards, next_after })
        })
        .await
    }

    /// Place a hold on a card for a merchant purchase
    ///
    /// The availability check and the insert run against the same locked
    /// balance, so concurrent authorizations on one card cannot both spend the
    /// same funds.
    ///
    /// # Returns
    ///
    /// * `Ok(TxnId)` - The new authorization's ID
    /// * `Err(LedgerError::InvalidAmount)` - If the amount is not a valid positive amount
    /// * `Err(LedgerError::MerchantNotFound)` - If the merchant does not exist
    /// * `Err(LedgerError::CardNotFound)` - If the card does not exist
    /// * `Err(LedgerError::InsufficientFunds)` - If `available <= amount`
    pub async fn authorize(
        &self,
        merchant_id: MerchantId,
        card_id: CardId,
        amount: Decimal,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<TxnId, LedgerError> {
        let amount = Amount::new(amount)?;
        let authorization = NewAuthorization {
            merchant_id,
            card_id,
            amount,
            text: text.to_string(),
        };
        self.run("authorize", cancel, async {
            let mut txn = self.store.begin().await?;
            let outcome = Self::authorize_locked(&mut txn, authorization).await;
            Self::finish(txn, outcome, "authorize").await
        })
        .await
    }

    async fn authorize_locked(
        txn: &mut S::Txn,
        authorization: NewAuthorization,
    ) -> Result<TxnId, LedgerError> {
        let merchant_id = authorization.merchant_id;
        let card_id = authorization.card_id;
        let amount = authorization.amount;

        if !txn.merchant_exists(merchant_id).await? {
            return Err(LedgerError::merchant_not_found(merchant_id));
        }
        let balance = txn
            .lock_card(card_id)
            .await?
            .ok_or_else(|| LedgerError::card_not_found(card_id))?;
        let available = check_authorize(&balance, amount)?;

        let txn_id = txn.insert_authorization(authorization).await?;
        info!(
            txn = txn_id,
            card = card_id,
            merchant = merchant_id,
            %amount,
            %available,
            "authorization placed"
        );
        Ok(txn_id)
    }

    /// Settle part or all of an authorization's blocked amount
    ///
    /// # Returns
    ///
    /// * `Ok(CaptureId)` - The new capture's ID
    /// * `Err(LedgerError::TransactionNotFound)` - If the authorization does not exist
    /// * `Err(LedgerError::InsufficientAuthorizedFunds)` - If `amount` exceeds what is still blocked
    pub async fn capture(
        &self,
        txn_id: TxnId,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<CaptureId, LedgerError> {
        self.adjust(AdjustmentKind::Capture, txn_id, amount, cancel)
            .await
    }

    /// Release part or all of an authorization's blocked amount back to the card
    ///
    /// # Returns
    ///
    /// * `Ok(ReverseId)` - The new reverse's ID
    /// * `Err(LedgerError::TransactionNotFound)` - If the authorization does not exist
    /// * `Err(LedgerError::InsufficientAuthorizedFunds)` - If `amount` exceeds what is still blocked
    pub async fn reverse(
        &self,
        txn_id: TxnId,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ReverseId, LedgerError> {
        self.adjust(AdjustmentKind::Reverse, txn_id, amount, cancel)
            .await
    }

    /// Return part or all of an authorization's captured amount
    ///
    /// The card's balances are untouched.
    ///
    /// # Returns
    ///
    /// * `Ok(RefundId)` - The new refund's ID
    /// * `Err(LedgerError::TransactionNotFound)` - If the authorization does not exist
    /// * `Err(LedgerError::InsufficientCapturedFunds)` - If `amount` exceeds `captured - refunded`
    pub async fn refund(
        &self,
        txn_id: TxnId,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<RefundId, LedgerError> {
        self.adjust(AdjustmentKind::Refund, txn_id, amount, cancel)
            .await
    }

    async fn adjust(
        &self,
        kind: AdjustmentKind,
        txn_id: TxnId,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<AdjustmentId, LedgerError> {
        let amount = Amount::new(amount)?;
        self.run(kind.as_str(), cancel, async {
            let mut txn = self.store.begin().await?;
            let outcome = Self::adjust_locked(&mut txn, kind, txn_id, amount).await;
            Self::finish(txn, outcome, kind.as_str()).await
        })
        .await
    }

    async fn adjust_locked(
        txn: &mut S::Txn,
        kind: AdjustmentKind,
        txn_id: TxnId,
        amount: Amount,
    ) -> Result<AdjustmentId, LedgerError> {
        let totals = txn
            .lock_authorization(txn_id)
            .await?
            .ok_or_else(|| LedgerError::transaction_not_found(txn_id))?;
        let next = check_adjustment(kind, &totals, amount)?;

        let adjustment_id = txn.insert_adjustment(kind, txn_id, amount).await?;
        info!(
            txn = txn_id,
            id = adjustment_id,
            kind = kind.as_str(),
            %amount,
            wait_capture = %next.wait_capture()?,
            "authorization adjusted"
        );
        Ok(adjustment_id)
    }

    /// Read an authorization with its captured, refunded and reversed totals
    pub async fn authorization(
        &self,
        txn_id: TxnId,
        cancel: &CancellationToken,
    ) -> Result<AuthorizationDetail, LedgerError> {
        self.run("authorization", cancel, async {
            self.store
                .authorization(txn_id)
                .await?
                .ok_or_else(|| LedgerError::transaction_not_found(txn_id))
        })
        .await
    }

    /// Resolve a merchant credential
    ///
    /// # Returns
    ///
    /// * `Ok(Merchant)` - The merchant owning the token
    /// * `Err(LedgerError::Unauthorized)` - If the token is empty or unknown
    pub async fn authenticate_merchant(
        &self,
        auth_token: &str,
        cancel: &CancellationToken,
    ) -> Result<Merchant, LedgerError> {
        let auth_token = auth_token.trim();
        if auth_token.is_empty() {
            return Err(LedgerError::Unauthorized);
        }
        self.run("authenticate_merchant", cancel, async {
            match self.store.merchant_by_token(auth_token).await? {
                Some(merchant) => Ok(merchant),
                None => {
                    warn!("unknown merchant token");
                    Err(LedgerError::Unauthorized)
                }
            }
        })
        .await
    }

    /// Authorizations drawn against a card, with merchant names, oldest first
    pub async fn statement(
        &self,
        card_id: CardId,
        cancel: &CancellationToken,
    ) -> Result<Vec<StatementLine>, LedgerError> {
        self.run("statement", cancel, async {
            if self.store.card(card_id).await?.is_none() {
                return Err(LedgerError::card_not_found(card_id));
            }
            Ok(self.store.statement(card_id).await?)
        })
        .await
    }

    /// Commit on success; on failure roll back and hand back the original error
    async fn finish<T>(
        txn: S::Txn,
        outcome: Result<T, LedgerError>,
        operation: &str,
    ) -> Result<T, LedgerError> {
        match outcome {
            Ok(value) => {
                txn.commit().await.map_err(|e| {
                    error!(operation, error = %e, retryable = e.is_retryable(), "commit failed");
                    LedgerError::from(e)
                })?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = txn.rollback().await {
                    error!(operation, error = %rollback, "rollback failed");
                }
                if err.is_internal() {
                    error!(operation, error = %err, "operation failed");
                } else {
                    debug!(operation, error = %err, "operation rejected");
                }
                Err(err)
            }
        }
    }

    /// Race `work` against cancellation and the operation deadline
    async fn run<T, F>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        if cancel.is_cancelled() {
            return Err(LedgerError::cancelled(operation));
        }

        let bounded = async {
            match self.config.operation_timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(operation, ?limit, "operation deadline exceeded");
                        Err(LedgerError::deadline_exceeded(operation))
                    }
                },
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(operation, "operation cancelled");
                Err(LedgerError::cancelled(operation))
            }
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{AuthorizationState, ErrorKind};

    fn dec(units: i64) -> Decimal {
        Decimal::new(units, 0)
    }

    fn engine_with(store: MemoryStore, config: EngineConfig) -> LedgerEngine<MemoryStore> {
        LedgerEngine::new(Arc::new(store), config)
    }

    fn engine() -> LedgerEngine<MemoryStore> {
        engine_with(MemoryStore::default(), EngineConfig::default())
    }

    /// Card "Alice" loaded with `units`, plus a merchant
    async fn setup(engine: &LedgerEngine<MemoryStore>, units: i64) -> (CardId, MerchantId) {
        let cancel = CancellationToken::new();
        let card = engine.create_card("Alice", &cancel).await.unwrap();
        let merchant = engine
            .create_merchant("Cafe", "cafe-token", &cancel)
            .await
            .unwrap();
        engine.load(card, dec(units), &cancel).await.unwrap();
        (card, merchant)
    }

    #[test]
    fn test_engine_is_cloneable() {
        let store = Arc::new(MemoryStore::default());
        let engine = LedgerEngine::new(Arc::clone(&store), EngineConfig::default());
        let _clone = engine.clone();
        assert_eq!(Arc::strong_count(&store), 3);
    }

    #[tokio::test]
    async fn test_card_lifecycle_scenario() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let (card, merchant) = setup(&engine, 100).await;

        let summary = engine.balance(card, &cancel).await.unwrap();
        assert_eq!(summary.available_balance, dec(100));
        assert_eq!(summary.blocked_amount, dec(0));

        let txn = engine
            .authorize(merchant, card, dec(40), "coffee", &cancel)
            .await
            .unwrap();
        let summary = engine.balance(card, &cancel).await.unwrap();
        assert_eq!(summary.available_balance, dec(60));
        assert_eq!(summary.blocked_amount, dec(40));

        engine.capture(txn, dec(40), &cancel).await.unwrap();
        let detail = engine.authorization(txn, &cancel).await.unwrap();
        assert_eq!(detail.totals.wait_capture().unwrap(), dec(0));
        assert_eq!(detail.totals.state().unwrap(), AuthorizationState::Closed);

        let over = engine.capture(txn, dec(1), &cancel).await.unwrap_err();
        assert_eq!(over.kind(), ErrorKind::InsufficientAuthorizedFunds);

        engine.refund(txn, dec(40), &cancel).await.unwrap();
        let over = engine.refund(txn, dec(1), &cancel).await.unwrap_err();
        assert_eq!(over.kind(), ErrorKind::InsufficientCapturedFunds);
    }

    #[tokio::test]
    async fn test_authorize_exactly_available_is_rejected() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let (card, merchant) = setup(&engine, 100).await;

        let err = engine
            .authorize(merchant, card, dec(100), "", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        let summary = engine.balance(card, &cancel).await.unwrap();
        assert_eq!(summary.blocked_amount, dec(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_authorizations_never_overspend() {
        let engine = engine();
        let (card, merchant) = setup(&engine, 100).await;

        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                engine.authorize(merchant, card, dec(60), "", &cancel).await
            }));
        }

        let mut successful = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successful += 1,
                Err(LedgerError::InsufficientFunds { .. }) => insufficient += 1,
                Err(e) => panic!("Unexpected error: {:?}", e),
            }
        }
        assert_eq!(successful, 1);
        assert_eq!(insufficient, 1);

        let summary = engine.balance(card, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.available_balance, dec(40));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_small_authorizations_stop_at_balance() {
        let engine = engine();
        let (card, merchant) = setup(&engine, 10).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .authorize(merchant, card, dec(1), "", &CancellationToken::new())
                    .await
            }));
        }
        let mut successful = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successful += 1;
            }
        }

        // Strict check: the last unit can never be authorized
        assert_eq!(successful, 9);
        let summary = engine.balance(card, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.available_balance, dec(1));
        assert!(summary.available_balance >= Decimal::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_adjustments_serialize_per_authorization() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let (card, merchant) = setup(&engine, 100).await;
        let txn = engine
            .authorize(merchant, card, dec(40), "", &cancel)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                if i % 2 == 0 {
                    engine.capture(txn, dec(3), &cancel).await
                } else {
                    engine.reverse(txn, dec(3), &cancel).await
                }
            }));
        }
        let mut successful = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successful += 1,
                Err(LedgerError::InsufficientAuthorizedFunds { .. }) => {}
                Err(e) => panic!("Unexpected error: {:?}", e),
            }
        }
        assert_eq!(successful, 13);

        let totals = engine.authorization(txn, &cancel).await.unwrap().totals;
        assert_eq!(totals.captured + totals.reversed, dec(39));
        assert!(totals.captured + totals.reversed <= totals.amount);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.refund(txn, dec(3), &CancellationToken::new()).await
            }));
        }
        let mut refunds = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => refunds += 1,
                Err(LedgerError::InsufficientCapturedFunds { .. }) => {}
                Err(e) => panic!("Unexpected error: {:?}", e),
            }
        }

        let totals = engine.authorization(txn, &cancel).await.unwrap().totals;
        assert_eq!(totals.refunded, dec(3 * refunds));
        assert_eq!(totals.refunded, totals.captured);

        // One unit is still blocked; a larger reverse must not move anything
        let err = engine.reverse(txn, dec(2), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientAuthorizedFunds);
        let after = engine.authorization(txn, &cancel).await.unwrap().totals;
        assert_eq!(after, totals);
    }

    #[tokio::test]
    async fn test_reverse_releases_funds() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let (card, merchant) = setup(&engine, 100).await;
        let txn = engine
            .authorize(merchant, card, dec(40), "", &cancel)
            .await
            .unwrap();

        engine.capture(txn, dec(25), &cancel).await.unwrap();
        engine.reverse(txn, dec(15), &cancel).await.unwrap();

        let summary = engine.balance(card, &cancel).await.unwrap();
        assert_eq!(summary.blocked_amount, dec(25));
        assert_eq!(summary.available_balance, dec(75));

        let err = engine.reverse(txn, dec(1), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientAuthorizedFunds);
    }

    #[tokio::test]
    async fn test_failed_adjustment_leaves_totals_unchanged() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let (card, merchant) = setup(&engine, 100).await;
        let txn = engine
            .authorize(merchant, card, dec(40), "", &cancel)
            .await
            .unwrap();
        engine.capture(txn, dec(10), &cancel).await.unwrap();

        let before = engine.authorization(txn, &cancel).await.unwrap().totals;
        assert!(engine.capture(txn, dec(31), &cancel).await.is_err());
        assert!(engine.refund(txn, dec(11), &cancel).await.is_err());
        let after = engine.authorization(txn, &cancel).await.unwrap().totals;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_not_found_kinds() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let (card, merchant) = setup(&engine, 100).await;

        let err = engine.load(99, dec(1), &cancel).await.unwrap_err();
        assert_eq!(err, LedgerError::card_not_found(99));

        let err = engine.balance(99, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CardNotFound);

        let err = engine
            .authorize(merchant, 99, dec(1), "", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CardNotFound);

        let err = engine
            .authorize(77, card, dec(1), "", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::merchant_not_found(77));

        for result in [
            engine.capture(5, dec(1), &cancel).await,
            engine.reverse(5, dec(1), &cancel).await,
            engine.refund(5, dec(1), &cancel).await,
        ] {
            assert_eq!(result.unwrap_err(), LedgerError::transaction_not_found(5));
        }
    }

    #[tokio::test]
    async fn test_invalid_amounts_rejected_before_store() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let (card, merchant) = setup(&engine, 100).await;

        for amount in [dec(0), dec(-5), Decimal::new(1001, 3)] {
            let err = engine.load(card, amount, &cancel).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidAmount);
            let err = engine
                .authorize(merchant, card, amount, "", &cancel)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidAmount);
        }
    }

    #[tokio::test]
    async fn test_cancelled_operation_rolls_back_and_releases_lock() {
        let store = MemoryStore::new(Duration::from_secs(5));
        let engine = engine_with(store.clone(), EngineConfig::default());
        let (card, merchant) = setup(&engine, 100).await;

        // Hold the card lock so the authorization has to wait
        let mut holder = store.begin().await.unwrap();
        holder.lock_card(card).await.unwrap();

        let cancel = CancellationToken::new();
        let pending = {
            let engine = engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                engine
                    .authorize(merchant, card, dec(10), "", &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled { .. }));
        assert!(err.is_retryable());
        drop(holder);

        let fresh = CancellationToken::new();
        let summary = engine.balance(card, &fresh).await.unwrap();
        assert_eq!(summary.blocked_amount, dec(0));
        engine
            .authorize(merchant, card, dec(10), "", &fresh)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_token_short_circuits() {
        let engine = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine.create_card("Bob", &cancel).await.unwrap_err();
        assert_eq!(err, LedgerError::cancelled("create_card"));
    }

    #[tokio::test]
    async fn test_deadline_exceeded_while_waiting_for_lock() {
        let store = MemoryStore::new(Duration::from_secs(5));
        let engine = engine_with(
            store.clone(),
            EngineConfig {
                operation_timeout: Some(Duration::from_millis(50)),
            },
        );
        let (card, _) = setup(&engine, 100).await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_card(card).await.unwrap();

        let err = engine
            .load(card, dec(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::deadline_exceeded("load"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_lock_timeout_surfaces_as_retryable_store_error() {
        let store = MemoryStore::new(Duration::from_millis(30));
        let engine = engine_with(store.clone(), EngineConfig::default());
        let (card, _) = setup(&engine, 100).await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_card(card).await.unwrap();

        let err = engine
            .load(card, dec(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        assert!(err.is_internal());
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_no_partial_state() {
        let store = MemoryStore::default();
        let engine = engine_with(store.clone(), EngineConfig::default());
        let cancel = CancellationToken::new();
        let (card, merchant) = setup(&engine, 100).await;

        store.fail_next_commit();
        let err = engine
            .authorize(merchant, card, dec(30), "", &cancel)
            .await
            .unwrap_err();
        assert!(err.is_internal());
        assert!(err.is_retryable());

        let summary = engine.balance(card, &cancel).await.unwrap();
        assert_eq!(summary.blocked_amount, dec(0));
        assert!(engine.statement(card, &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_cards_page_cursor() {
        let engine = engine();
        let cancel = CancellationToken::new();
        for name in ["a", "b", "c"] {
            engine.create_card(name, &cancel).await.unwrap();
        }

        let first = engine
            .list_cards_page(PageRequest::first(2), &cancel)
            .await
            .unwrap();
        assert_eq!(first.cards.len(), 2);
        assert_eq!(first.next_after, Some(2));

        let second = engine
            .list_cards_page(
                PageRequest {
                    after: first.next_after,
                    limit: Some(2),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(second.cards.len(), 1);
        assert_eq!(second.cards[0].name, "c");
        assert_eq!(second.next_after, None);

        assert_eq!(engine.list_cards(&cancel).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_authenticate_merchant() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let (_, merchant) = setup(&engine, 1).await;

        let found = engine
            .authenticate_merchant("cafe-token", &cancel)
            .await
            .unwrap();
        assert_eq!(found.merchant_id, merchant);

        for token in ["", "   ", "nope"] {
            let err = engine
                .authenticate_merchant(token, &cancel)
                .await
                .unwrap_err();
            assert_eq!(err, LedgerError::Unauthorized);
        }
    }

    #[tokio::test]
    async fn test_statement_requires_card() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let (card, merchant) = setup(&engine, 100).await;
        engine
            .authorize(merchant, card, dec(12), "lunch", &cancel)
            .await
            .unwrap();

        let lines = engine.statement(card, &cancel).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "lunch");
        assert_eq!(lines[0].location, "Cafe");

        let err = engine.statement(42, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CardNotFound);
    }
}
