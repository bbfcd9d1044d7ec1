//! Boundary layer
//!
//! # Components
//!
//! - `handlers` - `LedgerApi`, the request-shaped entry points
//! - `response` - Payloads, `Rendered` and the injected `Renderer`

pub mod handlers;
pub mod response;

pub use handlers::LedgerApi;
pub use response::{ErrorBody, JsonRenderer, Rendered, Renderer};
