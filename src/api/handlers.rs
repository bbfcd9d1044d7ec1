//! Request-shaped entry points over the ledger engine
//!
//! `LedgerApi` is what a transport (HTTP server, RPC gateway) calls into. It
//! owns the concerns that sit in front of the engine:
//!
//! - merchant token authentication
//! - authorization ownership, so a merchant only ever sees its own transactions
//! - decoding JSON request bodies
//! - mapping [`LedgerError`] to a status and an [`ErrorBody`]
//! - a panic boundary, so an unanticipated fault becomes a 500 instead of
//!   taking the process down
//!
//! Identity flows through explicit parameters; nothing is stashed in a
//! request context.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::response::{
    CaptureCreated, CardCreated, ErrorBody, LoadCreated, RefundCreated, Rendered, Renderer,
    ReverseCreated, TxnCreated,
};
use crate::config::LedgerConfig;
use crate::core::{LedgerEngine, LedgerStore};
use crate::io::write_statement_csv;
use crate::types::{CardId, LedgerError, Merchant, PageRequest, TxnId};

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateCardRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AmountRequest {
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthorizeRequest {
    amount: Decimal,
    #[serde(rename = "CardID")]
    card_id: CardId,
    #[serde(default)]
    text: String,
}

/// Why a request did not produce a success response
#[derive(Debug)]
enum Failure {
    /// The request itself could not be understood
    BadRequest(&'static str),
    Ledger(LedgerError),
}

impl From<LedgerError> for Failure {
    fn from(error: LedgerError) -> Self {
        Failure::Ledger(error)
    }
}

fn parse_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, Failure> {
    if body.is_empty() {
        return Err(Failure::BadRequest("No request body"));
    }
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "rejected request body");
        Failure::BadRequest("Invalid request body")
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Boundary between a transport and the ledger engine
pub struct LedgerApi<S: LedgerStore, R: Renderer> {
    engine: LedgerEngine<S>,
    renderer: R,
    expose_internal_errors: bool,
}

impl<S: LedgerStore, R: Renderer> LedgerApi<S, R> {
    /// Create a new LedgerApi
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine every request is dispatched to
    /// * `renderer` - Response serialization capability
    /// * `expose_internal_errors` - Put internal diagnostics in 500 bodies instead
    ///   of a generic message
    pub fn new(engine: LedgerEngine<S>, renderer: R, expose_internal_errors: bool) -> Self {
        Self {
            engine,
            renderer,
            expose_internal_errors,
        }
    }

    /// Create a LedgerApi whose error exposure follows `config`
    pub fn from_config(engine: LedgerEngine<S>, renderer: R, config: &LedgerConfig) -> Self {
        Self::new(engine, renderer, config.expose_internal_errors)
    }

    pub fn engine(&self) -> &LedgerEngine<S> {
        &self.engine
    }

    /// `POST /cards` with `{"Name": ...}`
    pub async fn create_card(&self, body: &[u8], cancel: &CancellationToken) -> Rendered {
        self.guarded("create_card", async {
            let request: CreateCardRequest = parse_body(body)?;
            let card_id = self.engine.create_card(&request.name, cancel).await?;
            Ok(self.renderer.json(200, &CardCreated { card_id }))
        })
        .await
    }

    /// `POST /cards/{id}` with `{"Amount": ...}`
    pub async fn load(&self, card_id: CardId, body: &[u8], cancel: &CancellationToken) -> Rendered {
        self.guarded("load", async {
            self.engine.balance(card_id, cancel).await?;
            let request: AmountRequest = parse_body(body)?;
            let load_id = self.engine.load(card_id, request.amount, cancel).await?;
            Ok(self.renderer.json(200, &LoadCreated { load_id }))
        })
        .await
    }

    /// `GET /cards/{id}`
    pub async fn card(&self, card_id: CardId, cancel: &CancellationToken) -> Rendered {
        self.guarded("card", async {
            let summary = self.engine.balance(card_id, cancel).await?;
            Ok(self.renderer.json(200, &summary))
        })
        .await
    }

    /// `GET /cards`
    pub async fn cards(&self, cancel: &CancellationToken) -> Rendered {
        self.guarded("cards", async {
            let cards = self.engine.list_cards(cancel).await?;
            Ok(self.renderer.json(200, &cards))
        })
        .await
    }

    /// `GET /cards?after=..&limit=..`
    pub async fn cards_page(
        &self,
        after: Option<CardId>,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Rendered {
        self.guarded("cards_page", async {
            let page = self
                .engine
                .list_cards_page(PageRequest { after, limit }, cancel)
                .await?;
            Ok(self.renderer.json(200, &page))
        })
        .await
    }

    /// `POST /merchants/transactions` with `{"Amount": .., "CardID": .., "Text": ..}`
    pub async fn authorize(
        &self,
        auth_token: Option<&str>,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Rendered {
        self.guarded("authorize", async {
            let merchant = self.authenticate(auth_token, cancel).await?;
            let request: AuthorizeRequest = parse_body(body)?;
            let txn_id = self
                .engine
                .authorize(
                    merchant.merchant_id,
                    request.card_id,
                    request.amount,
                    &request.text,
                    cancel,
                )
                .await?;
            Ok(self.renderer.json(200, &TxnCreated { txn_id }))
        })
        .await
    }

    /// `POST /merchants/transactions/{id}/capture` with `{"Amount": ...}`
    pub async fn capture(
        &self,
        auth_token: Option<&str>,
        txn_id: TxnId,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Rendered {
        self.guarded("capture", async {
            let request = self.owned_request(auth_token, txn_id, body, cancel).await?;
            let capture_id = self.engine.capture(txn_id, request.amount, cancel).await?;
            Ok(self.renderer.json(200, &CaptureCreated { capture_id }))
        })
        .await
    }

    /// `POST /merchants/transactions/{id}/reverse` with `{"Amount": ...}`
    pub async fn reverse(
        &self,
        auth_token: Option<&str>,
        txn_id: TxnId,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Rendered {
        self.guarded("reverse", async {
            let request = self.owned_request(auth_token, txn_id, body, cancel).await?;
            let reverse_id = self.engine.reverse(txn_id, request.amount, cancel).await?;
            Ok(self.renderer.json(200, &ReverseCreated { reverse_id }))
        })
        .await
    }

    /// `POST /merchants/transactions/{id}/refund` with `{"Amount": ...}`
    pub async fn refund(
        &self,
        auth_token: Option<&str>,
        txn_id: TxnId,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Rendered {
        self.guarded("refund", async {
            let request = self.owned_request(auth_token, txn_id, body, cancel).await?;
            let refund_id = self.engine.refund(txn_id, request.amount, cancel).await?;
            Ok(self.renderer.json(200, &RefundCreated { refund_id }))
        })
        .await
    }

    /// `GET /statement/{id}` as `text/csv`
    pub async fn statement(&self, card_id: CardId, cancel: &CancellationToken) -> Rendered {
        self.guarded("statement", async {
            let lines = self.engine.statement(card_id, cancel).await?;
            let mut body = Vec::new();
            write_statement_csv(&lines, &mut body)?;
            Ok(self.renderer.csv(200, body))
        })
        .await
    }

    async fn authenticate(
        &self,
        auth_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Merchant, LedgerError> {
        match auth_token {
            Some(token) => self.engine.authenticate_merchant(token, cancel).await,
            None => Err(LedgerError::Unauthorized),
        }
    }

    /// Authenticate, check the authorization belongs to the merchant, then decode the amount
    async fn owned_request(
        &self,
        auth_token: Option<&str>,
        txn_id: TxnId,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<AmountRequest, Failure> {
        let merchant = self.authenticate(auth_token, cancel).await?;
        let detail = self.engine.authorization(txn_id, cancel).await?;
        if detail.authorization.merchant_id != merchant.merchant_id {
            warn!(
                txn = txn_id,
                merchant = merchant.merchant_id,
                "merchant does not own transaction"
            );
            return Err(LedgerError::transaction_not_found(txn_id).into());
        }
        parse_body(body)
    }

    /// Run `work` behind the panic boundary and render whatever comes out
    async fn guarded<F>(&self, operation: &'static str, work: F) -> Rendered
    where
        F: Future<Output = Result<Rendered, Failure>>,
    {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(rendered)) => rendered,
            Ok(Err(Failure::BadRequest(message))) => {
                self.renderer.json(400, &ErrorBody::new(message))
            }
            Ok(Err(Failure::Ledger(err))) => self.render_error(operation, &err),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(operation, panic = %message, "request handler panicked");
                self.render_error(operation, &LedgerError::internal(message))
            }
        }
    }

    fn render_error(&self, operation: &str, err: &LedgerError) -> Rendered {
        let kind = err.kind();
        let message = if err.is_internal() {
            error!(operation, error = %err, retryable = err.is_retryable(), "internal failure");
            if self.expose_internal_errors {
                err.to_string()
            } else {
                INTERNAL_MESSAGE.to_string()
            }
        } else {
            debug!(operation, error = %err, "request rejected");
            err.to_string()
        };
        self.renderer
            .json(kind.status_code(), &ErrorBody::with_kind(kind, message))
    }
}
