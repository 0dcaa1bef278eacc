//! Capability interfaces every settlement-network adapter implements
//!
//! The platform talks to adapters only through these traits. One adapter
//! exists per network: blockchain-style adapters implement
//! [`BlockchainConnector`], channel-network adapters implement
//! [`LightningConnector`].
//!
//! Amounts enter as decimal strings in coin units and leave as
//! [`rust_decimal::Decimal`] values. Adapters convert to integer smallest
//! units internally (see [`crate::math`]).

use crossbeam_channel::Receiver;
use rust_decimal::Decimal;
use std::fmt;

use crate::error::ConnectorResult;
use crate::types::{BlockchainPendingPayment, LightningInfo, Payment, Route};

/// Raw transaction produced by a blockchain adapter, ready to broadcast
pub trait GeneratedTransaction: fmt::Debug + Send {
    /// Transaction identifier as rendered by the network
    fn id(&self) -> String;

    /// Consensus-serialized transaction bytes
    fn bytes(&self) -> &[u8];
}

/// Operations of an adapter settling over a UTXO blockchain
pub trait BlockchainConnector: Send + Sync {
    /// Allocate a fresh receiving address for the account
    fn create_address(&self, account: &str) -> ConnectorResult<String>;

    /// The account's default receiving address
    fn account_address(&self, account: &str) -> ConnectorResult<String>;

    /// Balance with at least the configured number of confirmations
    fn confirmed_balance(&self, account: &str) -> ConnectorResult<Decimal>;

    /// Balance still waiting for confirmations
    fn pending_balance(&self, account: &str) -> ConnectorResult<Decimal>;

    /// Incoming payments below the confirmation threshold
    fn pending_transactions(&self, account: &str) -> ConnectorResult<Vec<BlockchainPendingPayment>>;

    /// Craft a transaction paying `amount` coins to `address`
    ///
    /// The spent outputs are locked at the node and will not be offered to
    /// any other caller.
    fn generate_transaction(
        &self,
        address: &str,
        amount: &str,
    ) -> ConnectorResult<Box<dyn GeneratedTransaction>>;

    /// Broadcast a previously generated transaction
    fn send_transaction(&self, raw: &[u8]) -> ConnectorResult<()>;

    /// Stream of batches of newly confirmed incoming payments
    fn received_payments(&self) -> Receiver<Vec<Payment>>;

    /// Check that `address` is well formed and belongs to the adapter's network
    fn validate_address(&self, address: &str) -> ConnectorResult<()>;
}

/// Operations of an adapter settling over a lightning network
pub trait LightningConnector: Send + Sync {
    /// Node information plus the public connection details
    fn info(&self) -> ConnectorResult<LightningInfo>;

    /// Issue an invoice for the account; an empty amount issues an any-amount invoice
    fn create_invoice(&self, account: &str, amount: &str) -> ConnectorResult<String>;

    /// Pay an invoice and wait for the outcome, returning the payment preimage
    fn send_to(&self, invoice: &str) -> ConnectorResult<String>;

    fn confirmed_balance(&self) -> ConnectorResult<Decimal>;

    fn pending_balance(&self) -> ConnectorResult<Decimal>;

    /// Stream of settled incoming invoices
    fn received_payments(&self) -> Receiver<Payment>;

    /// Routes to `pub_key` able to carry `amount`, at most `limit` of them
    fn query_routes(&self, pub_key: &str, amount: &str, limit: u32) -> ConnectorResult<Vec<Route>>;

    /// Check that the invoice can be paid, optionally for a specific amount
    fn validate_invoice(&self, invoice: &str, amount: &str) -> ConnectorResult<()>;
}
