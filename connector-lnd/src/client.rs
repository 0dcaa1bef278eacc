//! Lightning node RPC contract
//!
//! [`LndClient`] lists the handful of lnd-style RPCs the adapter needs.
//! Amounts cross this boundary as [`Amount`] in smallest units.

use bitcoin::Amount;
use connector_common::types::{LightningNodeInfo, Route};
use thiserror::Error;

/// Errors reported by a lightning node client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LndError {
    #[error("{method} failed: {message}")]
    Rpc {
        method: &'static str,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unable to decode payment request: {0}")]
    InvalidPaymentRequest(String),
}

/// Invoice issued by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedInvoice {
    pub payment_request: String,
    pub payment_hash: String,
    pub add_index: u64,
}

/// Invoice paid to this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledInvoice {
    pub payment_hash: String,
    pub payment_request: String,
    /// Memo the invoice was issued with; the adapter stores the account here
    pub memo: String,
    pub amount_paid: Amount,
    /// Monotonic index assigned by the node on settlement
    pub settle_index: u64,
}

/// Decoded payment request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayReq {
    pub destination: String,
    pub payment_hash: String,
    /// Zero for an any-amount invoice
    pub amount: Amount,
    /// Creation time, seconds since the unix epoch
    pub timestamp: i64,
    /// Validity in seconds after `timestamp`
    pub expiry: i64,
}

/// Outcome of a synchronous payment
///
/// A non-empty `payment_error` means the node gave up on the payment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendResponse {
    pub payment_error: String,
    pub payment_preimage: String,
}

/// RPCs of an lnd-style node
pub trait LndClient: Send + Sync {
    fn get_info(&self) -> Result<LightningNodeInfo, LndError>;

    /// Issue an invoice; a zero value issues an any-amount invoice
    fn add_invoice(&self, memo: &str, value: Amount) -> Result<AddedInvoice, LndError>;

    /// Pay an invoice and wait until the payment succeeds or fails
    fn send_payment_sync(&self, payment_request: &str) -> Result<SendResponse, LndError>;

    fn decode_pay_req(&self, payment_request: &str) -> Result<PayReq, LndError>;

    fn query_routes(&self, pub_key: &str, amount: Amount, num_routes: u32)
        -> Result<Vec<Route>, LndError>;

    /// Balance of open channels
    fn channel_balance(&self) -> Result<Amount, LndError>;

    /// Balance of channels still waiting to open
    fn pending_open_balance(&self) -> Result<Amount, LndError>;

    /// Invoices settled with a settle index above `since_settle_index`, in settle order
    fn settled_invoices(&self, since_settle_index: u64) -> Result<Vec<SettledInvoice>, LndError>;
}
