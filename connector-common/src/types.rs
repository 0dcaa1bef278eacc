//! Common data types for the payment connector
//!
//! These types represent the shared data structures passed between the
//! payment platform and the individual settlement-network adapters. They are
//! serializable and carry amounts as decimals in coin units, never as floats.
//!
//! # Security Boundaries
//!
//! These types cross the boundary between the platform and the adapters:
//! - They MUST NOT contain private keys or node credentials
//! - Addresses and invoices are public data but should still be truncated
//!   before being written to logs (see [`crate::logging::sanitize_for_logging`])

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConnectorError;

// Constants for UTXO-chain specific values

/// Constant for dust threshold (minimum economical output value)
pub const DUST_THRESHOLD: u64 = 546;

/// Constant for smallest units (satoshis) per coin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Constant for maximum supply in smallest units
pub const MAX_BITCOIN_SUPPLY: u64 = 21_000_000 * SATS_PER_BTC;

/// Number of fractional digits a coin amount may carry
pub const AMOUNT_PRECISION: u32 = 8;

/// Type of technology used to deliver a payment
///
/// The platform composes adapters by this tag: every blockchain-style adapter
/// is reachable under [`NetworkType::Blockchain`] and every channel-network
/// adapter under [`NetworkType::Lightning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// UTXO-based blockchain settlement
    Blockchain,
    /// Balance-channel (lightning) settlement
    Lightning,
}

impl NetworkType {
    /// Canonical lowercase name of the network type
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Blockchain => "blockchain",
            NetworkType::Lightning => "lightning",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blockchain" => Ok(NetworkType::Blockchain),
            "lightning" => Ok(NetworkType::Lightning),
            other => Err(ConnectorError::validation(format!(
                "unknown network type: {}",
                other
            ))),
        }
    }
}

/// Movement of funds from one user to another
///
/// # Fields
///
/// * `id` - Identifier of the payment inside the settlement network
///   (txid:vout for blockchain payments, payment hash for lightning)
/// * `amount` - Amount in coin units
/// * `account` - Receiving account
/// * `address` - Receiving address or invoice
/// * `network_type` - Settlement network used to deliver the payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub amount: Decimal,
    pub account: String,
    pub address: String,
    pub network_type: NetworkType,
}

impl Payment {
    /// Create a new payment record
    pub fn new(
        id: impl Into<String>,
        amount: Decimal,
        account: impl Into<String>,
        address: impl Into<String>,
        network_type: NetworkType,
    ) -> Self {
        Self {
            id: id.into(),
            amount,
            account: account.into(),
            address: address.into(),
            network_type,
        }
    }
}

/// Blockchain payment whose confirmation count is still below the threshold
/// the platform requires before treating it as final
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainPendingPayment {
    /// The underlying payment
    #[serde(flatten)]
    pub payment: Payment,

    /// Number of confirmations observed so far
    pub confirmations: u32,

    /// Number of confirmations left before the payment counts as confirmed
    pub confirmations_left: u32,
}

impl BlockchainPendingPayment {
    /// Build a pending payment from the observed and required confirmation counts
    pub fn new(payment: Payment, confirmations: u32, required: u32) -> Self {
        Self {
            payment,
            confirmations,
            confirmations_left: required.saturating_sub(confirmations),
        }
    }
}

/// Information about the lightning node behind a connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightningInfo {
    /// Public host other nodes can reach us on
    pub host: String,
    /// Public peer port
    pub port: String,
    /// Minimum payable amount in coin units
    pub min_amount: String,
    /// Maximum payable amount in coin units
    pub max_amount: String,
    /// Data reported by the node itself
    pub node: LightningNodeInfo,
}

/// Node-reported status of a lightning node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightningNodeInfo {
    pub identity_pubkey: String,
    pub alias: String,
    pub num_active_channels: u32,
    pub num_peers: u32,
    pub block_height: u32,
    pub synced_to_chain: bool,
}

/// A single hop of a lightning route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    pub chan_id: u64,
    /// Channel capacity in smallest units
    pub chan_capacity: u64,
    /// Amount forwarded over this hop in smallest units
    pub amt_to_forward: u64,
    /// Fee charged by this hop in milli-units
    pub fee_msat: u64,
    pub pub_key: String,
}

/// A lightning route towards a destination node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub total_time_lock: u32,
    /// Total fees in milli-units
    pub total_fees_msat: u64,
    /// Total amount including fees in milli-units
    pub total_amt_msat: u64,
    pub hops: Vec<RouteHop>,
}

impl Route {
    /// Smallest channel capacity along the route, or zero for an empty route
    pub fn min_capacity(&self) -> u64 {
        self.hops.iter().map(|hop| hop.chan_capacity).min().unwrap_or(0)
    }
}
