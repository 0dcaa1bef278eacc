//! Node client contract
//!
//! The connector never touches keys, mempool or chain state itself. Everything
//! it needs from the node goes through [`NodeClient`], a blocking interface
//! mirroring the bitcoind wallet RPCs the crafting engine relies on.

use bitcoin::{Address, Amount, OutPoint, Transaction, Txid};
use thiserror::Error;

/// Unspent output as reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub confirmations: u32,
}

impl UnspentOutput {
    pub fn new(outpoint: OutPoint, amount: Amount, confirmations: u32) -> Self {
        Self {
            outpoint,
            amount,
            confirmations,
        }
    }
}

/// Incoming transfer to one of the node's wallet addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingTransfer {
    pub txid: Txid,
    pub vout: u32,
    pub account: String,
    pub address: String,
    pub amount: Amount,
    pub confirmations: u32,
}

impl IncomingTransfer {
    /// Payment identifier used towards the platform, `txid:vout`
    pub fn payment_id(&self) -> String {
        format!("{}:{}", self.txid, self.vout)
    }
}

/// Errors reported by a node client
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node answered with an RPC error
    #[error("{method} failed: {message}")]
    Rpc { method: &'static str, message: String },

    /// The node could not be reached
    #[error("node unreachable: {0}")]
    Transport(String),

    /// The node answered with something that could not be interpreted
    #[error("invalid node response: {0}")]
    InvalidResponse(String),

    /// The output is already locked
    #[error("output {0} is already locked")]
    AlreadyLocked(OutPoint),

    /// The output is not known to the node's wallet
    #[error("unknown output {0}")]
    UnknownOutput(OutPoint),
}

/// Blocking wallet RPCs of a bitcoind-style node
///
/// Implementations must be shareable between the crafting path, balance
/// reads and the payment watcher thread.
pub trait NodeClient: Send + Sync {
    /// Wallet outputs that are not locked and have a confirmation count in
    /// `[min_conf, max_conf]`
    fn list_unspent(&self, min_conf: u32, max_conf: u32) -> Result<Vec<UnspentOutput>, NodeError>;

    /// Lock (`unlock == false`) or unlock outputs. Unlocking with an empty
    /// list releases every lock the wallet holds.
    fn lock_unspent(&self, unlock: bool, outpoints: &[OutPoint]) -> Result<(), NodeError>;

    fn get_new_address(&self, account: &str) -> Result<Address, NodeError>;

    /// Assemble an unsigned transaction spending `inputs`
    fn create_raw_transaction(
        &self,
        inputs: &[OutPoint],
        outputs: &[(Address, Amount)],
        lock_time: i64,
    ) -> Result<Transaction, NodeError>;

    fn get_account_address(&self, account: &str) -> Result<Address, NodeError>;

    /// Balance of `account` counting only funds with at least `min_conf`
    /// confirmations
    fn get_balance(&self, account: &str, min_conf: u32) -> Result<Amount, NodeError>;

    /// Incoming transfers of `account`, or of every account for `None`
    fn list_transactions(&self, account: Option<&str>) -> Result<Vec<IncomingTransfer>, NodeError>;

    fn send_raw_transaction(&self, raw: &[u8]) -> Result<Txid, NodeError>;
}
