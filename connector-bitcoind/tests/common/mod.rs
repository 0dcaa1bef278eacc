//! Shared helpers for the connector-bitcoind integration tests

#![allow(dead_code)]

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount, Network, OutPoint, Txid};
use connector_bitcoind::client::IncomingTransfer;
use connector_bitcoind::craft::{CrafterConfig, TransactionCrafter};
use connector_bitcoind::mock::MockNodeClient;
use std::str::FromStr;
use std::sync::{Arc, Once};
use std::time::Duration;

static TEST_LOGGER: Once = Once::new();

/// Route engine logs to the test output once per test binary
pub fn init_test_logging() {
    TEST_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub const DESTINATION: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

pub fn txid(n: u8) -> Txid {
    Txid::from_str(&format!("{:064x}", n)).unwrap()
}

pub fn outpoint(n: u8, vout: u32) -> OutPoint {
    OutPoint::new(txid(n), vout)
}

pub fn destination() -> Address {
    Address::<NetworkUnchecked>::from_str(DESTINATION)
        .unwrap()
        .require_network(Network::Bitcoin)
        .unwrap()
}

pub fn sats(value: u64) -> Amount {
    Amount::from_sat(value)
}

/// Node with one output of each given value, all with six confirmations
pub fn node_with_outputs(values: &[u64]) -> Arc<MockNodeClient> {
    let node = MockNodeClient::new();
    for (i, value) in values.iter().enumerate() {
        node.add_output(outpoint(i as u8 + 1, 0), *value, 6);
    }
    Arc::new(node)
}

pub fn crafter_config() -> CrafterConfig {
    CrafterConfig {
        min_confirmations: 1,
        dust_threshold: 546,
        change_account: String::new(),
        timeout: Duration::from_secs(30),
    }
}

pub fn crafter(node: &Arc<MockNodeClient>) -> TransactionCrafter<MockNodeClient> {
    TransactionCrafter::new(Arc::clone(node), crafter_config())
}

pub fn transfer(n: u8, account: &str, value: u64, confirmations: u32) -> IncomingTransfer {
    IncomingTransfer {
        txid: txid(n),
        vout: 0,
        account: account.to_string(),
        address: DESTINATION.to_string(),
        amount: Amount::from_sat(value),
        confirmations,
    }
}
