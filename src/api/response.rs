//! Response payloads and rendering
//!
//! Handlers never serialize on their own; they hand a payload and a status to
//! an injected [`Renderer`] and get back a [`Rendered`] response.

use std::borrow::Cow;

use serde::Serialize;
use tracing::error;

use crate::types::{CaptureId, CardId, ErrorKind, LoadId, RefundId, ReverseId, TxnId};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_CSV: &str = "text/csv";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// A rendered response ready to be written by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Rendered {
    /// Body as text, lossily decoded
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Response serialization capability
pub trait Renderer: Send + Sync + 'static {
    /// Render `value` as the body of a response with `status`
    fn json<T: Serialize>(&self, status: u16, value: &T) -> Rendered;

    /// Wrap an already-encoded CSV document
    fn csv(&self, status: u16, body: Vec<u8>) -> Rendered {
        Rendered {
            status,
            content_type: CONTENT_TYPE_CSV,
            body,
        }
    }
}

/// JSON renderer backed by serde_json
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer {
    /// Indent output
    pub pretty: bool,
}

impl Renderer for JsonRenderer {
    fn json<T: Serialize>(&self, status: u16, value: &T) -> Rendered {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };

        match encoded {
            Ok(body) => Rendered {
                status,
                content_type: CONTENT_TYPE_JSON,
                body,
            },
            Err(e) => {
                error!(error = %e, "failed to encode response");
                Rendered {
                    status: 500,
                    content_type: CONTENT_TYPE_TEXT,
                    body: b"Internal server error".to_vec(),
                }
            }
        }
    }
}

/// `{"Error": "...", "Kind": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "Error")]
    pub error: String,

    /// Machine-checkable kind; absent for malformed requests
    #[serde(rename = "Kind", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorBody {
            error: message.into(),
            kind: None,
        }
    }

    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        ErrorBody {
            error: message.into(),
            kind: Some(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CardCreated {
    #[serde(rename = "CardID")]
    pub card_id: CardId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadCreated {
    #[serde(rename = "LoadID")]
    pub load_id: LoadId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxnCreated {
    #[serde(rename = "TxnID")]
    pub txn_id: TxnId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureCreated {
    #[serde(rename = "CaptureID")]
    pub capture_id: CaptureId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundCreated {
    #[serde(rename = "RefundID")]
    pub refund_id: RefundId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReverseCreated {
    #[serde(rename = "ReverseID")]
    pub reverse_id: ReverseId,
}
