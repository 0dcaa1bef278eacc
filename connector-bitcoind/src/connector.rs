//! Blockchain connector backed by a bitcoind-style node
//!
//! [`BitcoindConnector`] implements [`BlockchainConnector`] by delegating
//! address, balance and broadcast operations to the node and transaction
//! generation to the [`TransactionCrafter`]. Confirmed incoming payments are
//! reported by a [`PaymentWatcher`].

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount, Network, Txid};
use connector_common::config::BitcoindConfig;
use connector_common::error::{
    config_error, lock_error_with_source, node_error_with_source, ConnectorError, ConnectorResult,
};
use connector_common::events::EventBus;
use connector_common::interface::{BlockchainConnector, GeneratedTransaction};
use connector_common::logging::{log_event, sanitize_for_logging, LogContext, LogLevel};
use connector_common::math::{amount_to_decimal, parse_amount};
use connector_common::types::{BlockchainPendingPayment, NetworkType, Payment};
use crossbeam_channel::Receiver;
use log::{debug, info, trace};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

use crate::client::{NodeClient, NodeError};
use crate::craft::{CraftError, CrafterConfig, FeeEstimate, TransactionCrafter};
use crate::watcher::PaymentWatcher;

/// Transaction generated by [`BitcoindConnector`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitcoindTransaction {
    txid: Txid,
    raw: Vec<u8>,
    fee: Amount,
}

impl BitcoindTransaction {
    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }
}

impl GeneratedTransaction for BitcoindTransaction {
    fn id(&self) -> String {
        self.txid.to_string()
    }

    fn bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// [`BlockchainConnector`] for one asset on a bitcoind-style node
pub struct BitcoindConnector<C: NodeClient + 'static> {
    config: BitcoindConfig,
    network: Network,
    client: Arc<C>,
    crafter: TransactionCrafter<C>,
    watcher: Arc<PaymentWatcher<C>>,
}

impl<C: NodeClient + 'static> BitcoindConnector<C> {
    /// Create a connector; the configured network must be valid
    pub fn new(client: Arc<C>, config: BitcoindConfig) -> ConnectorResult<Self> {
        Self::build(client, config, None)
    }

    /// Create a connector publishing crafting and payment events to `bus`
    pub fn with_event_bus(
        client: Arc<C>,
        config: BitcoindConfig,
        bus: Arc<EventBus>,
    ) -> ConnectorResult<Self> {
        Self::build(client, config, Some(bus))
    }

    fn build(
        client: Arc<C>,
        config: BitcoindConfig,
        bus: Option<Arc<EventBus>>,
    ) -> ConnectorResult<Self> {
        let network = config
            .network()
            .map_err(|e| config_error(format!("bitcoind: {}", e)))?;

        let mut crafter = TransactionCrafter::new(Arc::clone(&client), CrafterConfig::from(&config));
        let mut watcher = PaymentWatcher::new(Arc::clone(&client), config.min_confirmations);
        if let Some(bus) = bus {
            crafter = crafter.with_event_bus(Arc::clone(&bus));
            watcher = watcher.with_event_bus(bus);
        }

        info!(
            "Created {} connector on {} with {} required confirmations",
            config.asset, network, config.min_confirmations
        );

        Ok(Self {
            config,
            network,
            client,
            crafter,
            watcher: Arc::new(watcher),
        })
    }

    pub fn config(&self) -> &BitcoindConfig {
        &self.config
    }

    pub fn crafter(&self) -> &TransactionCrafter<C> {
        &self.crafter
    }

    pub fn watcher(&self) -> &Arc<PaymentWatcher<C>> {
        &self.watcher
    }

    /// Start polling for confirmed payments at the configured interval
    pub fn start(&self) -> bool {
        self.watcher.start(self.config.poll_interval())
    }

    pub fn stop(&self) {
        self.watcher.stop();
    }

    /// Fee a payment of `amount` would pay right now, without locking anything
    pub fn estimate_fee(&self, amount: &str) -> ConnectorResult<Decimal> {
        let amount = parse_payment_amount(amount)?;
        let FeeEstimate { fee, .. } = self
            .crafter
            .estimate_fee(self.config.fee_rate_per_weight, amount)?;
        Ok(amount_to_decimal(fee))
    }

    /// Unlock every output at the node and forget reservations
    ///
    /// Meant for startup and recovery after crashes.
    pub fn release_all(&self) -> ConnectorResult<()> {
        self.crafter.release_all()?;
        Ok(())
    }

    fn parse_address(&self, address: &str) -> ConnectorResult<Address> {
        let unchecked = Address::<NetworkUnchecked>::from_str(address.trim())
            .map_err(|e| ConnectorError::InvalidAddress(format!("{}: {}", address, e)))?;
        unchecked.require_network(self.network).map_err(|_| {
            ConnectorError::InvalidAddress(format!(
                "{} does not belong to network {}",
                address, self.network
            ))
        })
    }

    fn balance(&self, account: &str, min_conf: u32) -> ConnectorResult<Amount> {
        self.client
            .get_balance(account, min_conf)
            .map_err(|e| node_error_with_source("getbalance", e))
    }
}

impl<C: NodeClient + 'static> Drop for BitcoindConnector<C> {
    fn drop(&mut self) {
        self.watcher.stop();
    }
}

impl<C: NodeClient + 'static> BlockchainConnector for BitcoindConnector<C> {
    fn create_address(&self, account: &str) -> ConnectorResult<String> {
        let address = self
            .client
            .get_new_address(account)
            .map_err(|e| node_error_with_source("getnewaddress", e))?;
        debug!("Created address {} for account {}", sanitize_for_logging(&address.to_string()), account);
        Ok(address.to_string())
    }

    fn account_address(&self, account: &str) -> ConnectorResult<String> {
        let address = self
            .client
            .get_account_address(account)
            .map_err(|e| node_error_with_source("getaccountaddress", e))?;
        Ok(address.to_string())
    }

    fn confirmed_balance(&self, account: &str) -> ConnectorResult<Decimal> {
        let confirmed = self.balance(account, self.config.min_confirmations)?;
        Ok(amount_to_decimal(confirmed))
    }

    fn pending_balance(&self, account: &str) -> ConnectorResult<Decimal> {
        let all = self.balance(account, 0)?;
        let confirmed = self.balance(account, self.config.min_confirmations)?;
        Ok(amount_to_decimal(all.checked_sub(confirmed).unwrap_or(Amount::ZERO)))
    }

    fn pending_transactions(&self, account: &str) -> ConnectorResult<Vec<BlockchainPendingPayment>> {
        let transfers = self
            .client
            .list_transactions(Some(account))
            .map_err(|e| node_error_with_source("listtransactions", e))?;

        Ok(transfers
            .into_iter()
            .filter(|t| t.confirmations < self.config.min_confirmations)
            .map(|t| {
                let payment = Payment::new(
                    t.payment_id(),
                    amount_to_decimal(t.amount),
                    t.account,
                    t.address,
                    NetworkType::Blockchain,
                );
                BlockchainPendingPayment::new(payment, t.confirmations, self.config.min_confirmations)
            })
            .collect())
    }

    fn generate_transaction(
        &self,
        address: &str,
        amount: &str,
    ) -> ConnectorResult<Box<dyn GeneratedTransaction>> {
        let destination = self.parse_address(address)?;
        let amount = parse_payment_amount(amount)?;

        let crafted = self
            .crafter
            .craft(self.config.fee_rate_per_weight, amount, &destination)?;

        Ok(Box::new(BitcoindTransaction {
            txid: crafted.txid,
            raw: crafted.raw,
            fee: crafted.fee,
        }))
    }

    fn send_transaction(&self, raw: &[u8]) -> ConnectorResult<()> {
        trace!("Broadcasting raw transaction {}", hex::encode(raw));
        let txid = self
            .client
            .send_raw_transaction(raw)
            .map_err(|e| node_error_with_source("sendrawtransaction", e))?;
        log_event(
            LogLevel::Info,
            LogContext::Node,
            "transaction broadcast",
            Some(json!({ "txid": txid.to_string(), "size": raw.len() })),
        );
        Ok(())
    }

    fn received_payments(&self) -> Receiver<Vec<Payment>> {
        self.watcher.receiver()
    }

    fn validate_address(&self, address: &str) -> ConnectorResult<()> {
        self.parse_address(address).map(|_| ())
    }
}

/// Parse a payment amount; zero is not a payment
fn parse_payment_amount(amount: &str) -> ConnectorResult<Amount> {
    let amount = parse_amount(amount)?;
    if amount == Amount::ZERO {
        return Err(ConnectorError::InvalidAmount("amount must be greater than zero".to_string()));
    }
    Ok(amount)
}

impl From<NodeError> for ConnectorError {
    fn from(err: NodeError) -> Self {
        node_error_with_source("node request failed", err)
    }
}

impl From<CraftError> for ConnectorError {
    fn from(err: CraftError) -> Self {
        match err {
            CraftError::InsufficientFunds(e) => ConnectorError::InsufficientFunds {
                needed: e.needed,
                available: e.available,
            },
            CraftError::NodeQuery { stage, source } => {
                node_error_with_source(format!("unable to {}", stage), source)
            }
            CraftError::Lock { outpoint, source } => {
                lock_error_with_source(format!("unable to lock output {}", outpoint), source)
            }
            CraftError::Timeout { stage } => {
                ConnectorError::Timeout(format!("craft timed out before: {}", stage))
            }
        }
    }
}
