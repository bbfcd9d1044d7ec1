//! In-process ledger store
//!
//! This module provides `MemoryStore`, a reference implementation of the
//! [`LedgerStore`] and [`LedgerTxn`] traits kept entirely in memory.
//!
//! # Design
//!
//! Tables are `DashMap`s keyed by store-assigned IDs handed out by atomic
//! counters. Every card and authorization row owns a `tokio::sync::Mutex`, which
//! plays the part of a `SELECT ... FOR UPDATE` row lock: a transaction holds the
//! owned guard until it commits, rolls back, or is dropped.
//!
//! Inserts are buffered in the transaction and applied at commit under a
//! write barrier. Unlocked readers take the barrier shared, so they see either
//! none or all of a commit.
//!
//! Child rows (loads, captures, refunds, reverses) are append-only vectors on
//! their parent row; nothing is ever updated or removed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::core::traits::{LedgerStore, LedgerTxn};
use crate::types::{
    AdjustmentId, AdjustmentKind, Amount, Authorization, AuthorizationDetail, AuthorizationTotals,
    CardBalance, CardId, CardSummary, LoadId, Merchant, MerchantId, NewAuthorization, PageRequest,
    StatementLine, StoreError, TxnId,
};

/// Default time a transaction waits for a row lock
pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

type RowLock = Arc<Mutex<()>>;

#[derive(Debug)]
struct CardRow {
    name: String,
    lock: RowLock,
    loads: Vec<(LoadId, Decimal)>,
    authorizations: Vec<TxnId>,
}

#[derive(Debug)]
struct AuthorizationRow {
    authorization: Authorization,
    lock: RowLock,
    captures: Vec<(AdjustmentId, Decimal)>,
    refunds: Vec<(AdjustmentId, Decimal)>,
    reverses: Vec<(AdjustmentId, Decimal)>,
}

impl AuthorizationRow {
    fn adjustments_mut(&mut self, kind: AdjustmentKind) -> &mut Vec<(AdjustmentId, Decimal)> {
        match kind {
            AdjustmentKind::Capture => &mut self.captures,
            AdjustmentKind::Refund => &mut self.refunds,
            AdjustmentKind::Reverse => &mut self.reverses,
        }
    }

    fn totals(&self) -> Result<AuthorizationTotals, StoreError> {
        Ok(AuthorizationTotals {
            txn_id: self.authorization.txn_id,
            amount: self.authorization.amount.value(),
            captured: sum(&self.captures)?,
            refunded: sum(&self.refunds)?,
            reversed: sum(&self.reverses)?,
        })
    }
}

fn sum(rows: &[(i64, Decimal)]) -> Result<Decimal, StoreError> {
    rows.iter().try_fold(Decimal::ZERO, |acc, (_, amount)| {
        acc.checked_add(*amount)
            .ok_or_else(|| StoreError::Constraint("aggregate overflow".to_string()))
    })
}

/// Monotonic ID generator starting at 1
#[derive(Debug)]
struct Sequence(AtomicI64);

impl Sequence {
    fn new() -> Self {
        Sequence(AtomicI64::new(1))
    }

    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug)]
enum PendingRow {
    Load {
        load_id: LoadId,
        card_id: CardId,
        amount: Decimal,
    },
    Authorization(Authorization),
    Adjustment {
        kind: AdjustmentKind,
        adjustment_id: AdjustmentId,
        txn_id: TxnId,
        amount: Decimal,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Card(CardId),
    Authorization(TxnId),
}

#[derive(Debug)]
struct Tables {
    cards: DashMap<CardId, CardRow>,
    merchants: DashMap<MerchantId, Merchant>,
    tokens: DashMap<String, MerchantId>,
    authorizations: DashMap<TxnId, AuthorizationRow>,

    card_ids: Sequence,
    merchant_ids: Sequence,
    load_ids: Sequence,
    txn_ids: Sequence,
    capture_ids: Sequence,
    refund_ids: Sequence,
    reverse_ids: Sequence,

    commit_barrier: RwLock<()>,
    fail_next_commit: AtomicBool,
}

impl Tables {
    fn new() -> Self {
        Tables {
            cards: DashMap::new(),
            merchants: DashMap::new(),
            tokens: DashMap::new(),
            authorizations: DashMap::new(),
            card_ids: Sequence::new(),
            merchant_ids: Sequence::new(),
            load_ids: Sequence::new(),
            txn_ids: Sequence::new(),
            capture_ids: Sequence::new(),
            refund_ids: Sequence::new(),
            reverse_ids: Sequence::new(),
            commit_barrier: RwLock::new(()),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    fn read_barrier(&self) -> Result<RwLockReadGuard<'_, ()>, StoreError> {
        self.commit_barrier
            .read()
            .map_err(|_| StoreError::Unavailable("commit barrier poisoned".to_string()))
    }

    fn write_barrier(&self) -> Result<RwLockWriteGuard<'_, ()>, StoreError> {
        self.commit_barrier
            .write()
            .map_err(|_| StoreError::Unavailable("commit barrier poisoned".to_string()))
    }

    fn adjustment_sequence(&self, kind: AdjustmentKind) -> &Sequence {
        match kind {
            AdjustmentKind::Capture => &self.capture_ids,
            AdjustmentKind::Refund => &self.refund_ids,
            AdjustmentKind::Reverse => &self.reverse_ids,
        }
    }

    fn row_lock(&self, key: RowKey) -> Option<RowLock> {
        match key {
            RowKey::Card(id) => self.cards.get(&id).map(|row| Arc::clone(&row.lock)),
            RowKey::Authorization(id) => self
                .authorizations
                .get(&id)
                .map(|row| Arc::clone(&row.lock)),
        }
    }

    /// Derive a card's balance from committed rows; caller holds the barrier
    fn card_balance(&self, card_id: CardId) -> Result<Option<(String, CardBalance)>, StoreError> {
        let (name, loaded, txn_ids) = match self.cards.get(&card_id) {
            Some(row) => (row.name.clone(), sum(&row.loads)?, row.authorizations.clone()),
            None => return Ok(None),
        };

        let mut blocked = Decimal::ZERO;
        for txn_id in txn_ids {
            if let Some(row) = self.authorizations.get(&txn_id) {
                let outstanding = row
                    .authorization
                    .amount
                    .value()
                    .checked_sub(sum(&row.reverses)?)
                    .ok_or_else(|| StoreError::Constraint("aggregate overflow".to_string()))?;
                blocked = blocked
                    .checked_add(outstanding)
                    .ok_or_else(|| StoreError::Constraint("aggregate overflow".to_string()))?;
            }
        }

        Ok(Some((
            name,
            CardBalance {
                card_id,
                loaded,
                blocked,
            },
        )))
    }

    fn card_summary(&self, card_id: CardId) -> Result<Option<CardSummary>, StoreError> {
        match self.card_balance(card_id)? {
            Some((name, balance)) => CardSummary::new(name, balance)
                .map(Some)
                .map_err(|e| StoreError::Constraint(e.to_string())),
            None => Ok(None),
        }
    }

    fn authorization_totals(&self, txn_id: TxnId) -> Result<Option<AuthorizationTotals>, StoreError> {
        match self.authorizations.get(&txn_id) {
            Some(row) => row.totals().map(Some),
            None => Ok(None),
        }
    }

    /// Apply buffered rows; caller holds the barrier exclusively
    fn apply(&self, pending: Vec<PendingRow>) -> Result<(), StoreError> {
        // Validate every foreign key first so a commit applies all or nothing
        for row in &pending {
            let card_id = match row {
                PendingRow::Load { card_id, .. } => *card_id,
                PendingRow::Authorization(a) => a.card_id,
                PendingRow::Adjustment { txn_id, .. } => {
                    if !self.authorizations.contains_key(txn_id)
                        && !pending.iter().any(|p| {
                            matches!(p, PendingRow::Authorization(a) if a.txn_id == *txn_id)
                        })
                    {
                        return Err(StoreError::Constraint(format!(
                            "unknown transaction {}",
                            txn_id
                        )));
                    }
                    continue;
                }
            };
            if !self.cards.contains_key(&card_id) {
                return Err(StoreError::Constraint(format!("unknown card {}", card_id)));
            }
        }

        for row in pending {
            match row {
                PendingRow::Load {
                    load_id,
                    card_id,
                    amount,
                } => {
                    if let Some(mut card) = self.cards.get_mut(&card_id) {
                        card.loads.push((load_id, amount));
                    }
                }
                PendingRow::Authorization(authorization) => {
                    let txn_id = authorization.txn_id;
                    let card_id = authorization.card_id;
                    self.authorizations.insert(
                        txn_id,
                        AuthorizationRow {
                            authorization,
                            lock: Arc::new(Mutex::new(())),
                            captures: Vec::new(),
                            refunds: Vec::new(),
                            reverses: Vec::new(),
                        },
                    );
                    if let Some(mut card) = self.cards.get_mut(&card_id) {
                        card.authorizations.push(txn_id);
                    }
                }
                PendingRow::Adjustment {
                    kind,
                    adjustment_id,
                    txn_id,
                    amount,
                } => {
                    if let Some(mut row) = self.authorizations.get_mut(&txn_id) {
                        row.adjustments_mut(kind).push((adjustment_id, amount));
                    }
                }
            }
        }

        Ok(())
    }

    fn insert_card(&self, name: &str) -> Result<CardId, StoreError> {
        let _barrier = self.write_barrier()?;
        let card_id = self.card_ids.next();
        self.cards.insert(
            card_id,
            CardRow {
                name: name.to_string(),
                lock: Arc::new(Mutex::new(())),
                loads: Vec::new(),
                authorizations: Vec::new(),
            },
        );
        Ok(card_id)
    }

    fn insert_merchant(&self, name: &str, auth_token: &str) -> Result<MerchantId, StoreError> {
        let _barrier = self.write_barrier()?;
        if self.tokens.contains_key(auth_token) {
            return Err(StoreError::Constraint(
                "duplicate merchant auth token".to_string(),
            ));
        }
        let merchant_id = self.merchant_ids.next();
        self.merchants.insert(
            merchant_id,
            Merchant {
                merchant_id,
                name: name.to_string(),
                auth_token: auth_token.to_string(),
            },
        );
        self.tokens.insert(auth_token.to_string(), merchant_id);
        Ok(merchant_id)
    }

    fn cards_page(&self, page: &PageRequest) -> Result<Vec<CardSummary>, StoreError> {
        let _barrier = self.read_barrier()?;
        let mut ids: Vec<CardId> = self
            .cards
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| page.after.map_or(true, |after| *id > after))
            .collect();
        ids.sort_unstable();
        if let Some(limit) = page.limit {
            ids.truncate(limit);
        }

        let mut cards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(summary) = self.card_summary(id)? {
                cards.push(summary);
            }
        }
        Ok(cards)
    }

    fn authorization_detail(&self, txn_id: TxnId) -> Result<Option<AuthorizationDetail>, StoreError> {
        let _barrier = self.read_barrier()?;
        match self.authorizations.get(&txn_id) {
            Some(row) => Ok(Some(AuthorizationDetail {
                authorization: row.authorization.clone(),
                totals: row.totals()?,
            })),
            None => Ok(None),
        }
    }

    fn statement(&self, card_id: CardId) -> Result<Vec<StatementLine>, StoreError> {
        let _barrier = self.read_barrier()?;
        let txn_ids = match self.cards.get(&card_id) {
            Some(card) => card.authorizations.clone(),
            None => return Ok(Vec::new()),
        };

        let mut lines = Vec::with_capacity(txn_ids.len());
        for txn_id in txn_ids {
            let authorization = match self.authorizations.get(&txn_id) {
                Some(row) => row.authorization.clone(),
                None => continue,
            };
            let location = self
                .merchants
                .get(&authorization.merchant_id)
                .map(|m| m.name.clone())
                .unwrap_or_default();
            lines.push(StatementLine {
                date: authorization.create_time.date_naive(),
                text: authorization.text,
                location,
                amount: authorization.amount.value(),
            });
        }
        Ok(lines)
    }
}

/// In-memory transactional ledger store
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<Tables>,
    lock_wait_timeout: Duration,
}

impl MemoryStore {
    /// Create an empty store whose transactions give up on a row lock after `lock_wait_timeout`
    pub fn new(lock_wait_timeout: Duration) -> Self {
        MemoryStore {
            tables: Arc::new(Tables::new()),
            lock_wait_timeout,
        }
    }

    /// Make the next commit fail with [`StoreError::CommitFailed`]
    ///
    /// Fault injection for exercising the rollback path.
    pub fn fail_next_commit(&self) {
        self.tables.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_WAIT_TIMEOUT)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Txn = MemoryTxn;

    async fn begin(&self) -> Result<MemoryTxn, StoreError> {
        Ok(MemoryTxn {
            tables: Arc::clone(&self.tables),
            lock_wait_timeout: self.lock_wait_timeout,
            held: HashSet::new(),
            guards: Vec::new(),
            pending: Vec::new(),
        })
    }

    async fn insert_card(&self, name: &str) -> Result<CardId, StoreError> {
        self.tables.insert_card(name)
    }

    async fn insert_merchant(
        &self,
        name: &str,
        auth_token: &str,
    ) -> Result<MerchantId, StoreError> {
        self.tables.insert_merchant(name, auth_token)
    }

    async fn card(&self, card_id: CardId) -> Result<Option<CardSummary>, StoreError> {
        let _barrier = self.tables.read_barrier()?;
        self.tables.card_summary(card_id)
    }

    async fn cards(&self, page: &PageRequest) -> Result<Vec<CardSummary>, StoreError> {
        self.tables.cards_page(page)
    }

    async fn authorization(
        &self,
        txn_id: TxnId,
    ) -> Result<Option<AuthorizationDetail>, StoreError> {
        self.tables.authorization_detail(txn_id)
    }

    async fn merchant_by_token(&self, auth_token: &str) -> Result<Option<Merchant>, StoreError> {
        let merchant_id = match self.tables.tokens.get(auth_token) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self
            .tables
            .merchants
            .get(&merchant_id)
            .map(|m| m.value().clone()))
    }

    async fn statement(&self, card_id: CardId) -> Result<Vec<StatementLine>, StoreError> {
        self.tables.statement(card_id)
    }
}

/// Open transaction on a [`MemoryStore`]
///
/// Dropping it without calling `commit` discards its inserts and releases its
/// row locks.
#[derive(Debug)]
pub struct MemoryTxn {
    tables: Arc<Tables>,
    lock_wait_timeout: Duration,
    held: HashSet<RowKey>,
    guards: Vec<OwnedMutexGuard<()>>,
    pending: Vec<PendingRow>,
}

impl MemoryTxn {
    /// Acquire the row lock for `key`; `Ok(false)` if the row does not exist
    async fn lock_row(&mut self, key: RowKey) -> Result<bool, StoreError> {
        if self.held.contains(&key) {
            return Ok(true);
        }
        let lock = match self.tables.row_lock(key) {
            Some(lock) => lock,
            None => return Ok(false),
        };

        match tokio::time::timeout(self.lock_wait_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                self.guards.push(guard);
                self.held.insert(key);
                Ok(true)
            }
            Err(_) => {
                let entity = match key {
                    RowKey::Card(id) => format!("card {}", id),
                    RowKey::Authorization(id) => format!("transaction {}", id),
                };
                warn!(%entity, timeout = ?self.lock_wait_timeout, "row lock wait timed out");
                Err(StoreError::LockTimeout { entity })
            }
        }
    }

    fn apply_pending(&mut self) -> Result<usize, StoreError> {
        let pending = std::mem::take(&mut self.pending);
        let rows = pending.len();
        let _barrier = self.tables.write_barrier()?;
        self.tables.apply(pending)?;
        Ok(rows)
    }
}

#[async_trait]
impl LedgerTxn for MemoryTxn {
    async fn lock_card(&mut self, card_id: CardId) -> Result<Option<CardBalance>, StoreError> {
        if !self.lock_row(RowKey::Card(card_id)).await? {
            return Ok(None);
        }
        let _barrier = self.tables.read_barrier()?;
        Ok(self
            .tables
            .card_balance(card_id)?
            .map(|(_, balance)| balance))
    }

    async fn lock_authorization(
        &mut self,
        txn_id: TxnId,
    ) -> Result<Option<AuthorizationTotals>, StoreError> {
        if !self.lock_row(RowKey::Authorization(txn_id)).await? {
            return Ok(None);
        }
        let _barrier = self.tables.read_barrier()?;
        self.tables.authorization_totals(txn_id)
    }

    async fn merchant_exists(&mut self, merchant_id: MerchantId) -> Result<bool, StoreError> {
        Ok(self.tables.merchants.contains_key(&merchant_id))
    }

    async fn insert_load(&mut self, card_id: CardId, amount: Amount) -> Result<LoadId, StoreError> {
        if !self.tables.cards.contains_key(&card_id) {
            return Err(StoreError::Constraint(format!("unknown card {}", card_id)));
        }
        let load_id = self.tables.load_ids.next();
        self.pending.push(PendingRow::Load {
            load_id,
            card_id,
            amount: amount.value(),
        });
        Ok(load_id)
    }

    async fn insert_authorization(
        &mut self,
        authorization: NewAuthorization,
    ) -> Result<TxnId, StoreError> {
        if !self.tables.cards.contains_key(&authorization.card_id) {
            return Err(StoreError::Constraint(format!(
                "unknown card {}",
                authorization.card_id
            )));
        }
        if !self.tables.merchants.contains_key(&authorization.merchant_id) {
            return Err(StoreError::Constraint(format!(
                "unknown merchant {}",
                authorization.merchant_id
            )));
        }
        let txn_id = self.tables.txn_ids.next();
        self.pending.push(PendingRow::Authorization(Authorization {
            txn_id,
            merchant_id: authorization.merchant_id,
            card_id: authorization.card_id,
            amount: authorization.amount,
            text: authorization.text,
            create_time: Utc::now(),
        }));
        Ok(txn_id)
    }

    async fn insert_adjustment(
        &mut self,
        kind: AdjustmentKind,
        txn_id: TxnId,
        amount: Amount,
    ) -> Result<AdjustmentId, StoreError> {
        if !self.tables.authorizations.contains_key(&txn_id) {
            return Err(StoreError::Constraint(format!(
                "unknown transaction {}",
                txn_id
            )));
        }
        let adjustment_id = self.tables.adjustment_sequence(kind).next();
        self.pending.push(PendingRow::Adjustment {
            kind,
            adjustment_id,
            txn_id,
            amount: amount.value(),
        });
        Ok(adjustment_id)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        if self.tables.fail_next_commit.swap(false, Ordering::SeqCst) {
            warn!(pending = self.pending.len(), "injected commit failure");
            return Err(StoreError::CommitFailed("injected failure".to_string()));
        }
        let rows = self.apply_pending()?;
        debug!(rows, locks = self.guards.len(), "transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        debug!(
            discarded = self.pending.len(),
            locks = self.guards.len(),
            "transaction rolled back"
        );
        Ok(())
    }
}
