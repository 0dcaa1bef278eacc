//! Payment Connector Common Library
//!
//! This crate provides the pieces shared by every settlement-network adapter
//! of the payment connector: the capability interfaces the platform calls,
//! the data types crossing that boundary, the error taxonomy, configuration,
//! logging and domain events.
//!
//! # Modules
//!
//! - `types`: Payments, lightning info and route types
//! - `math`: Decimal/smallest-unit amount conversion
//! - `error`: Shared error taxonomy
//! - `interface`: `BlockchainConnector` and `LightningConnector` traits
//! - `config`: TOML configuration
//! - `logging`: Logging setup and sanitization helpers
//! - `events`: Domain event bus

/// Data types crossing the platform/adapter boundary
pub mod types;

/// Amount conversion utilities
pub mod math;

/// Shared error taxonomy
pub mod error;

/// Capability interfaces implemented by the adapters
pub mod interface;

/// Configuration management
pub mod config;

/// Logging functionality
pub mod logging;

/// Domain events
pub mod events;

pub use config::{BitcoindConfig, ConnectorConfig, LndConfig};
pub use error::{ConnectorError, ConnectorResult, ErrorCategory};
pub use events::{ConnectorEvent, EventBus, OutPointInfo};
pub use interface::{BlockchainConnector, GeneratedTransaction, LightningConnector};
pub use types::{
    BlockchainPendingPayment, LightningInfo, LightningNodeInfo, NetworkType, Payment, Route,
    RouteHop, DUST_THRESHOLD, MAX_BITCOIN_SUPPLY, SATS_PER_BTC,
};

// Re-export the bitcoin types adapters exchange with their node clients
pub use bitcoin::{Address, Amount, Network, OutPoint, Transaction, Txid};

/// Initialize the shared infrastructure with the given logging configuration
pub fn init(log_config: &logging::LogConfig) -> Result<(), String> {
    logging::init(log_config)?;
    log::debug!("connector-common initialized");
    Ok(())
}
