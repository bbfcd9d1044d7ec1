//! Merchant types
//!
//! The ledger only uses a merchant as the foreign key recorded on each
//! authorization; the token is looked up by the boundary layer.

use super::MerchantId;

/// A registered merchant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merchant {
    pub merchant_id: MerchantId,
    pub name: String,
    pub auth_token: String,
}
