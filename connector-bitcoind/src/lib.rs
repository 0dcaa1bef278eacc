//! UTXO coin selection and transaction crafting for bitcoind-style nodes
//!
//! This crate implements the blockchain side of the payment connector:
//!
//! - `client`: the node RPC contract the engine relies on
//! - `unspent_cache`: mutex-guarded mirror of spendable outputs
//! - `weight`: transaction weight estimation
//! - `coin_select`: fee-convergent greedy coin selection
//! - `craft`: the serialized crafting orchestrator
//! - `connector`: the `BlockchainConnector` adapter
//! - `watcher`: confirmed incoming payment stream
//! - `mock`: in-memory node for tests
//!
//! The node performs all wallet work: listing and locking outputs, handing
//! out addresses, assembling and broadcasting transactions. This crate only
//! decides which outputs to spend and makes sure no output is handed out
//! twice.

pub mod client;
pub mod coin_select;
pub mod connector;
pub mod craft;
pub mod mock;
pub mod unspent_cache;
pub mod watcher;
pub mod weight;

pub use client::{IncomingTransfer, NodeClient, NodeError, UnspentOutput};
pub use coin_select::{coin_select, InsufficientFunds, Selection};
pub use connector::{BitcoindConnector, BitcoindTransaction};
pub use craft::{
    CraftError, CraftStage, CraftedTransaction, CrafterConfig, Deadline, FeeEstimate,
    TransactionCrafter,
};
pub use unspent_cache::{SyncSummary, UnspentCache};
pub use watcher::PaymentWatcher;
pub use weight::TxWeightEstimator;
