//! Mock implementation of the [`NodeClient`] trait.
//!
//! # WARNING: FOR TESTING PURPOSES ONLY
//!
//! `MockNodeClient` keeps a wallet's unspent outputs, lock set and incoming
//! transfers in memory and records every call in a journal. Failures can be
//! scripted per RPC so the crafting engine's error paths can be exercised
//! without a node.

use bitcoin::absolute::LockTime;
use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode::deserialize;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use crate::client::{IncomingTransfer, NodeClient, NodeError, UnspentOutput};

/// Mainnet addresses handed out as new or change addresses, round robin
pub const MOCK_ADDRESSES: [&str; 3] = [
    "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2",
    "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy",
    "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
];

/// Journal entry of a call made against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCall {
    ListUnspent { min_conf: u32, max_conf: u32 },
    LockUnspent { unlock: bool, outpoints: Vec<OutPoint> },
    GetNewAddress { account: String },
    CreateRawTransaction { inputs: Vec<OutPoint>, outputs: Vec<(String, u64)>, lock_time: i64 },
    GetAccountAddress { account: String },
    GetBalance { account: String, min_conf: u32 },
    ListTransactions { account: Option<String> },
    SendRawTransaction { txid: Txid },
}

#[derive(Debug, Default)]
struct MockState {
    unspent: BTreeMap<OutPoint, UnspentOutput>,
    locked: HashSet<OutPoint>,
    calls: Vec<NodeCall>,
    next_address: usize,
    account_addresses: HashMap<String, String>,
    transfers: Vec<IncomingTransfer>,
    sent: Vec<Transaction>,
    fail_list_unspent: bool,
    fail_lock_on: HashSet<OutPoint>,
    fail_new_address: bool,
    fail_create: bool,
    fail_send: bool,
    latency: Option<Duration>,
}

/// In-memory node wallet
#[derive(Debug)]
pub struct MockNodeClient {
    network: Network,
    state: Mutex<MockState>,
}

impl Default for MockNodeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNodeClient {
    /// Empty mainnet wallet
    pub fn new() -> Self {
        Self {
            network: Network::Bitcoin,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Add an unspent output of `sats` with `confirmations`
    pub fn with_output(self, outpoint: OutPoint, sats: u64, confirmations: u32) -> Self {
        self.add_output(outpoint, sats, confirmations);
        self
    }

    /// Add an incoming transfer, also visible as an unspent output
    pub fn with_transfer(self, transfer: IncomingTransfer) -> Self {
        self.add_transfer(transfer);
        self
    }

    /// Sleep this long inside every call
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    pub fn add_output(&self, outpoint: OutPoint, sats: u64, confirmations: u32) {
        self.state.lock().unspent.insert(
            outpoint,
            UnspentOutput::new(outpoint, Amount::from_sat(sats), confirmations),
        );
    }

    pub fn remove_output(&self, outpoint: &OutPoint) {
        let mut state = self.state.lock();
        state.unspent.remove(outpoint);
        state.locked.remove(outpoint);
    }

    pub fn add_transfer(&self, transfer: IncomingTransfer) {
        let outpoint = OutPoint::new(transfer.txid, transfer.vout);
        let mut state = self.state.lock();
        state.unspent.insert(
            outpoint,
            UnspentOutput::new(outpoint, transfer.amount, transfer.confirmations),
        );
        state.transfers.push(transfer);
    }

    /// Forget the transfers of `txid`, as a node does once they drop out of its history
    pub fn remove_transfer(&self, txid: Txid) {
        self.state.lock().transfers.retain(|t| t.txid != txid);
    }

    /// Update the confirmations of every output and transfer of `txid`
    pub fn set_confirmations(&self, txid: Txid, confirmations: u32) {
        let mut state = self.state.lock();
        for output in state.unspent.values_mut() {
            if output.outpoint.txid == txid {
                output.confirmations = confirmations;
            }
        }
        for transfer in state.transfers.iter_mut() {
            if transfer.txid == txid {
                transfer.confirmations = confirmations;
            }
        }
    }

    /// Bind the address returned for `account` by `get_account_address`
    pub fn set_account_address(&self, account: &str, address: &str) {
        self.state
            .lock()
            .account_addresses
            .insert(account.to_string(), address.to_string());
    }

    pub fn set_fail_list_unspent(&self, fail: bool) {
        self.state.lock().fail_list_unspent = fail;
    }

    /// Make locking `outpoint` fail
    pub fn fail_lock_on(&self, outpoint: OutPoint) {
        self.state.lock().fail_lock_on.insert(outpoint);
    }

    pub fn set_fail_new_address(&self, fail: bool) {
        self.state.lock().fail_new_address = fail;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.state.lock().fail_send = fail;
    }

    pub fn calls(&self) -> Vec<NodeCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Outpoints passed to `lock_unspent(false, ..)` calls, in call order
    pub fn lock_requests(&self) -> Vec<OutPoint> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                NodeCall::LockUnspent {
                    unlock: false,
                    outpoints,
                } => Some(outpoints.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn is_locked(&self, outpoint: &OutPoint) -> bool {
        self.state.lock().locked.contains(outpoint)
    }

    pub fn locked_count(&self) -> usize {
        self.state.lock().locked.len()
    }

    /// Transactions accepted by `send_raw_transaction`
    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.state.lock().sent.clone()
    }

    fn record(&self, call: NodeCall) -> parking_lot::MutexGuard<'_, MockState> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            thread::sleep(latency);
        }
        let mut state = self.state.lock();
        state.calls.push(call);
        state
    }

    fn parse_address(&self, address: &str) -> Result<Address, NodeError> {
        Address::<NetworkUnchecked>::from_str(address)
            .map_err(|e| NodeError::InvalidResponse(e.to_string()))?
            .require_network(self.network)
            .map_err(|e| NodeError::InvalidResponse(e.to_string()))
    }
}

impl NodeClient for MockNodeClient {
    fn list_unspent(&self, min_conf: u32, max_conf: u32) -> Result<Vec<UnspentOutput>, NodeError> {
        let state = self.record(NodeCall::ListUnspent { min_conf, max_conf });
        if state.fail_list_unspent {
            return Err(NodeError::Transport("listunspent: connection refused".to_string()));
        }

        Ok(state
            .unspent
            .values()
            .filter(|u| !state.locked.contains(&u.outpoint))
            .filter(|u| u.confirmations >= min_conf && u.confirmations <= max_conf)
            .cloned()
            .collect())
    }

    fn lock_unspent(&self, unlock: bool, outpoints: &[OutPoint]) -> Result<(), NodeError> {
        let mut state = self.record(NodeCall::LockUnspent {
            unlock,
            outpoints: outpoints.to_vec(),
        });

        if unlock {
            if outpoints.is_empty() {
                state.locked.clear();
            } else {
                for outpoint in outpoints {
                    state.locked.remove(outpoint);
                }
            }
            return Ok(());
        }

        for outpoint in outpoints {
            if state.fail_lock_on.contains(outpoint) {
                return Err(NodeError::Rpc {
                    method: "lockunspent",
                    message: format!("scripted failure for {}", outpoint),
                });
            }
            if !state.unspent.contains_key(outpoint) {
                return Err(NodeError::UnknownOutput(*outpoint));
            }
            if !state.locked.insert(*outpoint) {
                return Err(NodeError::AlreadyLocked(*outpoint));
            }
        }
        Ok(())
    }

    fn get_new_address(&self, account: &str) -> Result<Address, NodeError> {
        let mut state = self.record(NodeCall::GetNewAddress {
            account: account.to_string(),
        });
        if state.fail_new_address {
            return Err(NodeError::Rpc {
                method: "getnewaddress",
                message: "keypool ran out".to_string(),
            });
        }

        let address = MOCK_ADDRESSES[state.next_address % MOCK_ADDRESSES.len()];
        state.next_address += 1;
        drop(state);
        self.parse_address(address)
    }

    fn create_raw_transaction(
        &self,
        inputs: &[OutPoint],
        outputs: &[(Address, Amount)],
        lock_time: i64,
    ) -> Result<Transaction, NodeError> {
        let state = self.record(NodeCall::CreateRawTransaction {
            inputs: inputs.to_vec(),
            outputs: outputs
                .iter()
                .map(|(address, amount)| (address.to_string(), amount.to_sat()))
                .collect(),
            lock_time,
        });
        if state.fail_create {
            return Err(NodeError::Rpc {
                method: "createrawtransaction",
                message: "scripted failure".to_string(),
            });
        }
        if lock_time != 0 {
            return Err(NodeError::Rpc {
                method: "createrawtransaction",
                message: format!("unsupported lock time {}", lock_time),
            });
        }

        Ok(Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|outpoint| TxIn {
                    previous_output: *outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs
                .iter()
                .map(|(address, amount)| TxOut {
                    value: amount.to_sat(),
                    script_pubkey: address.script_pubkey(),
                })
                .collect(),
        })
    }

    fn get_account_address(&self, account: &str) -> Result<Address, NodeError> {
        let state = self.record(NodeCall::GetAccountAddress {
            account: account.to_string(),
        });
        let address = state
            .account_addresses
            .get(account)
            .cloned()
            .unwrap_or_else(|| MOCK_ADDRESSES[0].to_string());
        drop(state);
        self.parse_address(&address)
    }

    fn get_balance(&self, account: &str, min_conf: u32) -> Result<Amount, NodeError> {
        let state = self.record(NodeCall::GetBalance {
            account: account.to_string(),
            min_conf,
        });

        let sats = state
            .transfers
            .iter()
            .filter(|t| t.account == account && t.confirmations >= min_conf)
            .fold(0u64, |sum, t| sum.saturating_add(t.amount.to_sat()));
        Ok(Amount::from_sat(sats))
    }

    fn list_transactions(&self, account: Option<&str>) -> Result<Vec<IncomingTransfer>, NodeError> {
        let state = self.record(NodeCall::ListTransactions {
            account: account.map(str::to_string),
        });
        if state.fail_list_unspent {
            return Err(NodeError::Transport("listtransactions: connection refused".to_string()));
        }

        Ok(state
            .transfers
            .iter()
            .filter(|t| account.map_or(true, |account| t.account == account))
            .cloned()
            .collect())
    }

    fn send_raw_transaction(&self, raw: &[u8]) -> Result<Txid, NodeError> {
        let transaction: Transaction =
            deserialize(raw).map_err(|e| NodeError::InvalidResponse(e.to_string()))?;
        let txid = transaction.txid();

        let mut state = self.record(NodeCall::SendRawTransaction { txid });
        if state.fail_send {
            return Err(NodeError::Rpc {
                method: "sendrawtransaction",
                message: "transaction rejected".to_string(),
            });
        }

        for input in &transaction.input {
            if !state.unspent.contains_key(&input.previous_output) {
                return Err(NodeError::Rpc {
                    method: "sendrawtransaction",
                    message: format!("missing inputs: {}", input.previous_output),
                });
            }
        }
        for input in &transaction.input {
            state.unspent.remove(&input.previous_output);
            state.locked.remove(&input.previous_output);
        }

        state.sent.push(transaction);
        Ok(txid)
    }
}
