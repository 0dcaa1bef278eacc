//! Lightning connector backed by an lnd-style node
//!
//! [`LndConnector`] implements [`LightningConnector`] by delegating to an
//! [`LndClient`]. Settled invoices are reported by an [`InvoiceWatcher`]
//! the connector owns.

use bitcoin::{Amount, Network};
use chrono::Utc;
use connector_common::config::LndConfig;
use connector_common::error::{
    config_error, node_error_with_source, ConnectorError, ConnectorResult,
};
use connector_common::events::EventBus;
use connector_common::interface::LightningConnector;
use connector_common::logging::{log_event, sanitize_for_logging, LogContext, LogLevel};
use connector_common::math::{amount_to_decimal, parse_amount, parse_optional_amount};
use connector_common::types::{LightningInfo, Payment, Route};
use crossbeam_channel::Receiver;
use log::{debug, info, trace};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

use crate::client::{LndClient, LndError, PayReq};
use crate::watcher::InvoiceWatcher;

/// [`LightningConnector`] on an lnd-style node
pub struct LndConnector<C: LndClient + 'static> {
    config: LndConfig,
    network: Network,
    min_amount: Amount,
    max_amount: Amount,
    client: Arc<C>,
    watcher: Arc<InvoiceWatcher<C>>,
}

impl<C: LndClient + 'static> LndConnector<C> {
    /// Create a connector; network and amount bounds must be valid
    pub fn new(client: Arc<C>, config: LndConfig) -> ConnectorResult<Self> {
        Self::build(client, config, None)
    }

    /// Create a connector whose watcher publishes settled invoices to `bus`
    pub fn with_event_bus(
        client: Arc<C>,
        config: LndConfig,
        bus: Arc<EventBus>,
    ) -> ConnectorResult<Self> {
        Self::build(client, config, Some(bus))
    }

    fn build(
        client: Arc<C>,
        config: LndConfig,
        bus: Option<Arc<EventBus>>,
    ) -> ConnectorResult<Self> {
        let network = config
            .network()
            .map_err(|e| config_error(format!("lnd: {}", e)))?;
        let min_amount = parse_amount(&config.min_amount)
            .map_err(|e| config_error(format!("lnd min_amount: {}", e)))?;
        let max_amount = parse_amount(&config.max_amount)
            .map_err(|e| config_error(format!("lnd max_amount: {}", e)))?;
        if min_amount > max_amount {
            return Err(config_error(format!(
                "lnd min_amount {} exceeds max_amount {}",
                config.min_amount, config.max_amount
            )));
        }

        let mut watcher = InvoiceWatcher::new(Arc::clone(&client));
        if let Some(bus) = bus {
            watcher = watcher.with_event_bus(bus);
        }
        info!("Created lightning connector on {} ({}:{})", network, config.host, config.port);

        Ok(Self {
            config,
            network,
            min_amount,
            max_amount,
            client,
            watcher: Arc::new(watcher),
        })
    }

    pub fn config(&self) -> &LndConfig {
        &self.config
    }

    pub fn watcher(&self) -> &Arc<InvoiceWatcher<C>> {
        &self.watcher
    }

    /// Continue reporting after `settle_index`, e.g. the last index persisted by the platform
    pub fn resume_from(&self, settle_index: u64) {
        self.watcher.resume_from(settle_index);
    }

    pub fn last_settle_index(&self) -> u64 {
        self.watcher.last_settle_index()
    }

    /// Fetch invoices settled since the last poll and emit them as payments
    ///
    /// Returns the number of payments emitted.
    pub fn poll_settled_invoices(&self) -> ConnectorResult<usize> {
        self.watcher.poll_once()
    }

    /// Poll settled invoices at the configured interval until [`stop`](Self::stop)
    ///
    /// Returns false if polling is already running. Dropping the connector stops it.
    pub fn start(&self) -> bool {
        self.watcher.start(self.config.poll_interval())
    }

    pub fn stop(&self) {
        self.watcher.stop();
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_running()
    }

    fn check_bounds(&self, amount: Amount) -> ConnectorResult<()> {
        if amount < self.min_amount || amount > self.max_amount {
            return Err(ConnectorError::InvalidAmount(format!(
                "{} sat is outside the payable range [{}, {}] sat",
                amount.to_sat(),
                self.min_amount.to_sat(),
                self.max_amount.to_sat()
            )));
        }
        Ok(())
    }

    fn decode(&self, invoice: &str) -> ConnectorResult<PayReq> {
        let invoice = invoice.trim();
        if !matches_network(invoice, self.network) {
            return Err(ConnectorError::InvalidInvoice(format!(
                "{} is not an invoice for network {}",
                sanitize_for_logging(invoice),
                self.network
            )));
        }

        self.client.decode_pay_req(invoice).map_err(|e| match e {
            LndError::InvalidPaymentRequest(reason) => ConnectorError::InvalidInvoice(reason),
            other => node_error_with_source("unable to decode invoice", other),
        })
    }
}

impl<C: LndClient + 'static> Drop for LndConnector<C> {
    fn drop(&mut self) {
        self.watcher.stop();
    }
}

impl<C: LndClient + 'static> LightningConnector for LndConnector<C> {
    fn info(&self) -> ConnectorResult<LightningInfo> {
        let node = self.client.get_info()?;
        Ok(LightningInfo {
            host: self.config.host.clone(),
            port: self.config.port.clone(),
            min_amount: self.config.min_amount.clone(),
            max_amount: self.config.max_amount.clone(),
            node,
        })
    }

    fn create_invoice(&self, account: &str, amount: &str) -> ConnectorResult<String> {
        let value = parse_optional_amount(amount)?;
        if value > Amount::ZERO {
            self.check_bounds(value)?;
        }

        let invoice = self
            .client
            .add_invoice(account, value)
            .map_err(|e| node_error_with_source("unable to add invoice", e))?;
        debug!(
            "Issued invoice {} for account {} ({} sat)",
            sanitize_for_logging(&invoice.payment_hash),
            account,
            value.to_sat()
        );
        Ok(invoice.payment_request)
    }

    fn send_to(&self, invoice: &str) -> ConnectorResult<String> {
        trace!("Paying invoice {}", sanitize_for_logging(invoice));
        let response = self
            .client
            .send_payment_sync(invoice.trim())
            .map_err(|e| node_error_with_source("unable to send payment", e))?;

        if !response.payment_error.is_empty() {
            log_event(
                LogLevel::Warn,
                LogContext::Lightning,
                &format!("payment failed: {}", response.payment_error),
                Some(json!({ "invoice": invoice.trim() })),
            );
            return Err(ConnectorError::Payment(response.payment_error));
        }

        info!("Paid invoice {}", sanitize_for_logging(invoice));
        Ok(response.payment_preimage)
    }

    fn confirmed_balance(&self) -> ConnectorResult<Decimal> {
        let balance = self
            .client
            .channel_balance()
            .map_err(|e| node_error_with_source("unable to get channel balance", e))?;
        Ok(amount_to_decimal(balance))
    }

    fn pending_balance(&self) -> ConnectorResult<Decimal> {
        let balance = self
            .client
            .pending_open_balance()
            .map_err(|e| node_error_with_source("unable to get pending channels", e))?;
        Ok(amount_to_decimal(balance))
    }

    fn received_payments(&self) -> Receiver<Payment> {
        self.watcher.receiver()
    }

    fn query_routes(&self, pub_key: &str, amount: &str, limit: u32) -> ConnectorResult<Vec<Route>> {
        let amount = parse_amount(amount)?;
        if amount == Amount::ZERO {
            return Err(ConnectorError::InvalidAmount("amount must be greater than zero".to_string()));
        }

        let routes = self
            .client
            .query_routes(pub_key, amount, limit)
            .map_err(|e| node_error_with_source("unable to query routes", e))?;
        let found = routes.len();

        // Every hop must be able to carry the full amount
        let routes: Vec<Route> = routes
            .into_iter()
            .filter(|route| !route.hops.is_empty() && route.min_capacity() >= amount.to_sat())
            .collect();

        debug!(
            "{} of {} routes to {} can carry {} sat",
            routes.len(),
            found,
            sanitize_for_logging(pub_key),
            amount.to_sat()
        );

        if routes.is_empty() {
            return Err(ConnectorError::Payment(format!(
                "no route to {} with capacity for {} sat",
                sanitize_for_logging(pub_key),
                amount.to_sat()
            )));
        }
        Ok(routes)
    }

    fn validate_invoice(&self, invoice: &str, amount: &str) -> ConnectorResult<()> {
        let pay_req = self.decode(invoice)?;

        let now = Utc::now().timestamp();
        if now > pay_req.timestamp.saturating_add(pay_req.expiry) {
            return Err(ConnectorError::InvalidInvoice(format!(
                "invoice {} has expired",
                sanitize_for_logging(&pay_req.payment_hash)
            )));
        }

        let requested = parse_optional_amount(amount)?.to_sat();
        let payable = match (requested, pay_req.amount.to_sat()) {
            (0, 0) => {
                return Err(ConnectorError::validation(
                    "an amount is required to pay an any-amount invoice",
                ))
            }
            (0, invoice_amount) => invoice_amount,
            (requested, 0) => requested,
            (requested, invoice_amount) if requested != invoice_amount => {
                return Err(ConnectorError::InvalidInvoice(format!(
                    "invoice amount {} sat does not match requested {} sat",
                    invoice_amount, requested
                )))
            }
            (requested, _) => requested,
        };

        self.check_bounds(Amount::from_sat(payable))
    }
}

/// Whether the BOLT-11 human readable part belongs to `network`
///
/// The prefix must be followed by the amount or the `1` separator, so a
/// regtest `lnbcrt` invoice is not taken for a mainnet `lnbc` one.
fn matches_network(invoice: &str, network: Network) -> bool {
    let prefix = match network {
        Network::Bitcoin => "lnbc",
        Network::Testnet => "lntb",
        Network::Signet => "lntbs",
        Network::Regtest => "lnbcrt",
        _ => return false,
    };

    let invoice = invoice.to_ascii_lowercase();
    invoice
        .strip_prefix(prefix)
        .and_then(|rest| rest.chars().next())
        .map_or(false, |c| c.is_ascii_digit())
}

impl From<LndError> for ConnectorError {
    fn from(err: LndError) -> Self {
        node_error_with_source("lightning node request failed", err)
    }
}
