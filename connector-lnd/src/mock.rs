//! Mock implementation of the [`LndClient`] trait.
//!
//! # WARNING: FOR TESTING PURPOSES ONLY
//!
//! `MockLndClient` issues, decodes and settles invoices in memory. Payments
//! succeed unless a payment error is scripted for the invoice.

use bitcoin::Amount;
use chrono::Utc;
use connector_common::types::{LightningNodeInfo, Route};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::client::{AddedInvoice, LndClient, LndError, PayReq, SendResponse, SettledInvoice};

/// Identity key of the mock node
pub const MOCK_PUBKEY: &str = "02eec7245d6b7d2ccb30380bfbe2a3648cd7a942653f5aa340edcea1f283686619";

/// Expiry of invoices issued by the mock, in seconds
pub const MOCK_INVOICE_EXPIRY: i64 = 3600;

#[derive(Debug, Default)]
struct MockState {
    info: LightningNodeInfo,
    invoices: HashMap<String, (AddedInvoice, String, PayReq)>,
    pay_reqs: HashMap<String, PayReq>,
    settled: Vec<SettledInvoice>,
    payment_errors: HashMap<String, String>,
    paid: Vec<String>,
    routes: Vec<Route>,
    channel_balance: Amount,
    pending_open_balance: Amount,
    next_index: u64,
    unavailable: bool,
}

/// In-memory lightning node
#[derive(Debug)]
pub struct MockLndClient {
    state: Mutex<MockState>,
}

impl Default for MockLndClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLndClient {
    pub fn new() -> Self {
        let info = LightningNodeInfo {
            identity_pubkey: MOCK_PUBKEY.to_string(),
            alias: "mock".to_string(),
            num_active_channels: 1,
            num_peers: 1,
            block_height: 800_000,
            synced_to_chain: true,
        };
        Self {
            state: Mutex::new(MockState {
                info,
                ..MockState::default()
            }),
        }
    }

    pub fn with_balances(self, channel: u64, pending_open: u64) -> Self {
        {
            let mut state = self.state.lock();
            state.channel_balance = Amount::from_sat(channel);
            state.pending_open_balance = Amount::from_sat(pending_open);
        }
        self
    }

    pub fn with_routes(self, routes: Vec<Route>) -> Self {
        self.state.lock().routes = routes;
        self
    }

    /// Make `payment_request` decodable as `pay_req`
    pub fn register_pay_req(&self, payment_request: &str, pay_req: PayReq) {
        self.state
            .lock()
            .pay_reqs
            .insert(payment_request.to_string(), pay_req);
    }

    /// Make paying `payment_request` fail with `error`
    pub fn fail_payment(&self, payment_request: &str, error: &str) {
        self.state
            .lock()
            .payment_errors
            .insert(payment_request.to_string(), error.to_string());
    }

    /// Fail every RPC with a transport error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Settle an invoice issued by [`LndClient::add_invoice`], paying `amount`
    ///
    /// Returns the settle index, or `None` for an unknown invoice.
    pub fn settle(&self, payment_request: &str, amount: Amount) -> Option<u64> {
        let mut state = self.state.lock();
        let (invoice, memo, _) = state.invoices.get(payment_request)?.clone();
        state.next_index += 1;
        let settle_index = state.next_index;
        state.settled.push(SettledInvoice {
            payment_hash: invoice.payment_hash,
            payment_request: invoice.payment_request,
            memo,
            amount_paid: amount,
            settle_index,
        });
        Some(settle_index)
    }

    /// Payment requests paid through `send_payment_sync`
    pub fn paid(&self) -> Vec<String> {
        self.state.lock().paid.clone()
    }

    fn available(&self, state: &MockState) -> Result<(), LndError> {
        if state.unavailable {
            Err(LndError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl LndClient for MockLndClient {
    fn get_info(&self) -> Result<LightningNodeInfo, LndError> {
        let state = self.state.lock();
        self.available(&state)?;
        Ok(state.info.clone())
    }

    fn add_invoice(&self, memo: &str, value: Amount) -> Result<AddedInvoice, LndError> {
        let mut state = self.state.lock();
        self.available(&state)?;

        state.next_index += 1;
        let index = state.next_index;
        let invoice = AddedInvoice {
            payment_request: format!("lnbc{}1mock{:08}", value.to_sat(), index),
            payment_hash: format!("{:064x}", index),
            add_index: index,
        };
        let pay_req = PayReq {
            destination: state.info.identity_pubkey.clone(),
            payment_hash: invoice.payment_hash.clone(),
            amount: value,
            timestamp: Utc::now().timestamp(),
            expiry: MOCK_INVOICE_EXPIRY,
        };
        state.invoices.insert(
            invoice.payment_request.clone(),
            (invoice.clone(), memo.to_string(), pay_req),
        );
        Ok(invoice)
    }

    fn send_payment_sync(&self, payment_request: &str) -> Result<SendResponse, LndError> {
        let mut state = self.state.lock();
        self.available(&state)?;

        if let Some(error) = state.payment_errors.get(payment_request) {
            return Ok(SendResponse {
                payment_error: error.clone(),
                payment_preimage: String::new(),
            });
        }

        state.paid.push(payment_request.to_string());
        Ok(SendResponse {
            payment_error: String::new(),
            payment_preimage: format!("{:064x}", state.paid.len()),
        })
    }

    fn decode_pay_req(&self, payment_request: &str) -> Result<PayReq, LndError> {
        let state = self.state.lock();
        self.available(&state)?;

        state
            .pay_reqs
            .get(payment_request)
            .cloned()
            .or_else(|| state.invoices.get(payment_request).map(|(_, _, p)| p.clone()))
            .ok_or_else(|| LndError::InvalidPaymentRequest(format!("unknown invoice {}", payment_request)))
    }

    fn query_routes(
        &self,
        pub_key: &str,
        _amount: Amount,
        num_routes: u32,
    ) -> Result<Vec<Route>, LndError> {
        let state = self.state.lock();
        self.available(&state)?;

        Ok(state
            .routes
            .iter()
            .filter(|route| route.hops.last().map_or(false, |hop| hop.pub_key == pub_key))
            .take(num_routes as usize)
            .cloned()
            .collect())
    }

    fn channel_balance(&self) -> Result<Amount, LndError> {
        let state = self.state.lock();
        self.available(&state)?;
        Ok(state.channel_balance)
    }

    fn pending_open_balance(&self) -> Result<Amount, LndError> {
        let state = self.state.lock();
        self.available(&state)?;
        Ok(state.pending_open_balance)
    }

    fn settled_invoices(&self, since_settle_index: u64) -> Result<Vec<SettledInvoice>, LndError> {
        let state = self.state.lock();
        self.available(&state)?;

        Ok(state
            .settled
            .iter()
            .filter(|invoice| invoice.settle_index > since_settle_index)
            .cloned()
            .collect())
    }
}
