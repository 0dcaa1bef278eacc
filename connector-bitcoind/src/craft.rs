//! Transaction crafting
//!
//! [`TransactionCrafter`] turns "pay this amount to this address" into an
//! unsigned raw transaction whose inputs are locked at the node. One craft
//! runs at a time, guarded by the crafting lock for its whole duration:
//!
//! 1. unlock every output at the node, sweeping locks left by failed crafts
//! 2. sync the unspent cache if it is empty
//! 3. select inputs on the cache snapshot
//! 4. lock each selected input at the node
//! 5. add a change output, or fold dust change into the fee
//! 6. ask the node to assemble the transaction
//! 7. consume the inputs from the cache
//!
//! A failed craft leaves the cache untouched. Locks placed before a failure
//! stay in place until the next craft or [`TransactionCrafter::release_all`].

use bitcoin::consensus::encode::serialize;
use bitcoin::{Address, Amount, OutPoint, Transaction, Txid};
use connector_common::config::BitcoindConfig;
use connector_common::events::{ConnectorEvent, EventBus, OutPointInfo};
use connector_common::logging::{log_event, LogContext, LogLevel};
use log::{debug, info, trace};
use parking_lot::{Mutex, MutexGuard};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::client::{NodeClient, NodeError};
use crate::coin_select::{coin_select, InsufficientFunds, Selection};
use crate::unspent_cache::{SyncSummary, UnspentCache};

/// Step of a craft, reported by node and timeout errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CraftStage {
    AcquireLock,
    UnlockOutputs,
    SyncUnspent,
    LockOutputs,
    ChangeAddress,
    Assemble,
}

impl fmt::Display for CraftStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            CraftStage::AcquireLock => "acquire crafting lock",
            CraftStage::UnlockOutputs => "unlock outputs",
            CraftStage::SyncUnspent => "sync unspent outputs",
            CraftStage::LockOutputs => "lock outputs",
            CraftStage::ChangeAddress => "allocate change address",
            CraftStage::Assemble => "assemble transaction",
        };
        f.write_str(stage)
    }
}

/// Errors of the crafting engine
#[derive(Debug, Error)]
pub enum CraftError {
    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFunds),

    /// A node RPC failed; the cache is unchanged
    #[error("unable to {stage}: {source}")]
    NodeQuery {
        stage: CraftStage,
        #[source]
        source: NodeError,
    },

    /// Locking a selected output failed; earlier locks of this craft remain
    #[error("unable to lock output {outpoint}: {source}")]
    Lock {
        outpoint: OutPoint,
        #[source]
        source: NodeError,
    },

    #[error("timed out before: {stage}")]
    Timeout { stage: CraftStage },
}

/// Point in time after which a craft gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `duration` from now
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(duration),
        }
    }

    /// No deadline at all
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    pub fn is_expired(&self) -> bool {
        self.at.map_or(false, |at| Instant::now() >= at)
    }

    /// Fail with `Timeout { stage }` if the deadline has passed
    pub fn check(&self, stage: CraftStage) -> Result<(), CraftError> {
        if self.is_expired() {
            Err(CraftError::Timeout { stage })
        } else {
            Ok(())
        }
    }
}

/// Settings of the crafting engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrafterConfig {
    pub min_confirmations: u32,
    /// Change below this value is folded into the fee; 0 disables folding
    pub dust_threshold: u64,
    /// Account change addresses are requested for
    pub change_account: String,
    /// Default deadline of a craft
    pub timeout: Duration,
}

impl Default for CrafterConfig {
    fn default() -> Self {
        Self::from(&BitcoindConfig::default())
    }
}

impl From<&BitcoindConfig> for CrafterConfig {
    fn from(config: &BitcoindConfig) -> Self {
        Self {
            min_confirmations: config.min_confirmations,
            dust_threshold: config.dust_threshold,
            change_account: config.change_account.clone(),
            timeout: config.rpc_timeout(),
        }
    }
}

/// Raw transaction produced by a craft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CraftedTransaction {
    pub txid: Txid,
    /// Consensus serialization of `transaction`
    pub raw: Vec<u8>,
    pub transaction: Transaction,
    /// Fee paid, including change folded in as dust
    pub fee: Amount,
    /// Value of the change output, zero when there is none
    pub change: Amount,
    /// Spent outpoints in selection order
    pub inputs: Vec<OutPoint>,
}

/// What a craft would pay right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub fee: Amount,
    pub change: Amount,
    pub inputs: usize,
}

/// Serialized coin selection and transaction assembly against one node
pub struct TransactionCrafter<C: NodeClient> {
    client: Arc<C>,
    cache: UnspentCache,
    craft_lock: Mutex<()>,
    config: CrafterConfig,
    events: Option<Arc<EventBus>>,
}

impl<C: NodeClient> TransactionCrafter<C> {
    pub fn new(client: Arc<C>, config: CrafterConfig) -> Self {
        Self {
            client,
            cache: UnspentCache::new(config.min_confirmations),
            craft_lock: Mutex::new(()),
            config,
            events: None,
        }
    }

    /// Publish crafting events to `bus`
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn config(&self) -> &CrafterConfig {
        &self.config
    }

    pub fn cache(&self) -> &UnspentCache {
        &self.cache
    }

    /// Resync the unspent cache from the node
    ///
    /// Outputs handed out by earlier crafts stay reserved.
    pub fn sync(&self) -> Result<SyncSummary, CraftError> {
        self.refresh(false)
    }

    fn refresh(&self, after_unlock: bool) -> Result<SyncSummary, CraftError> {
        let client = self.client.as_ref();
        let result = if after_unlock {
            self.cache.sync_unlocked(client)
        } else {
            self.cache.sync(client)
        };
        let summary = result.map_err(|source| CraftError::NodeQuery {
            stage: CraftStage::SyncUnspent,
            source,
        })?;

        self.publish(ConnectorEvent::UnspentSynced {
            outputs: summary.outputs,
            total_sats: summary.total.to_sat(),
        });
        Ok(summary)
    }

    /// Craft a transaction with the configured timeout
    pub fn craft(
        &self,
        fee_rate_per_weight: u64,
        amount: Amount,
        destination: &Address,
    ) -> Result<CraftedTransaction, CraftError> {
        self.craft_with_deadline(
            fee_rate_per_weight,
            amount,
            destination,
            Deadline::after(self.config.timeout),
        )
    }

    /// Craft a transaction, giving up once `deadline` passes
    ///
    /// The deadline bounds the wait for the crafting lock and is checked
    /// before every node call. A call already in flight is not interrupted.
    pub fn craft_with_deadline(
        &self,
        fee_rate_per_weight: u64,
        amount: Amount,
        destination: &Address,
        deadline: Deadline,
    ) -> Result<CraftedTransaction, CraftError> {
        let _guard = self.acquire(deadline)?;

        trace!(
            "Performing coin selection using {} sat/weight as fee rate",
            fee_rate_per_weight
        );

        deadline.check(CraftStage::UnlockOutputs)?;
        trace!("Unlocking unspent outputs");
        self.client
            .lock_unspent(true, &[])
            .map_err(|source| CraftError::NodeQuery {
                stage: CraftStage::UnlockOutputs,
                source,
            })?;

        if self.cache.is_empty() {
            deadline.check(CraftStage::SyncUnspent)?;
            self.refresh(true)?;
        }

        let selection = self.select(fee_rate_per_weight, amount)?;
        let inputs: Vec<OutPoint> = selection.selected.iter().map(|u| u.outpoint).collect();

        debug!(
            "Selected {} unspent inputs, amount({} sat), change({} sat), fee({} sat)",
            inputs.len(),
            amount.to_sat(),
            selection.change.to_sat(),
            selection.fee.to_sat()
        );

        for outpoint in &inputs {
            deadline.check(CraftStage::LockOutputs)?;
            if let Err(source) = self.client.lock_unspent(false, &[*outpoint]) {
                log_event(
                    LogLevel::Warn,
                    LogContext::Node,
                    &format!("unable to lock output: {}", source),
                    Some(json!({ "txid": outpoint.txid.to_string(), "vout": outpoint.vout })),
                );
                self.publish(ConnectorEvent::LockFailed {
                    outpoint: OutPointInfo::from(outpoint),
                    reason: source.to_string(),
                });
                return Err(CraftError::Lock {
                    outpoint: *outpoint,
                    source,
                });
            }
        }
        self.publish(ConnectorEvent::InputsLocked {
            inputs: inputs.iter().map(OutPointInfo::from).collect(),
        });

        let (change, fee) = self.apply_dust_policy(&selection);

        let mut outputs = vec![(destination.clone(), amount)];
        if change > Amount::ZERO {
            deadline.check(CraftStage::ChangeAddress)?;
            let change_address = self
                .client
                .get_new_address(&self.config.change_account)
                .map_err(|source| CraftError::NodeQuery {
                    stage: CraftStage::ChangeAddress,
                    source,
                })?;
            outputs.push((change_address, change));
        }

        deadline.check(CraftStage::Assemble)?;
        let transaction = self
            .client
            .create_raw_transaction(&inputs, &outputs, 0)
            .map_err(|source| CraftError::NodeQuery {
                stage: CraftStage::Assemble,
                source,
            })?;

        self.cache.consume(&inputs);

        let txid = transaction.txid();
        let raw = serialize(&transaction);

        log_event(
            LogLevel::Info,
            LogContext::Crafting,
            "transaction crafted",
            Some(json!({
                "txid": txid.to_string(),
                "inputs": inputs.len(),
                "fee_sat": fee.to_sat(),
                "change_sat": change.to_sat(),
            })),
        );
        self.publish(ConnectorEvent::TransactionCrafted {
            txid: txid.to_string(),
            fee_amount: fee.to_sat(),
            change_amount: change.to_sat(),
        });

        Ok(CraftedTransaction {
            txid,
            raw,
            transaction,
            fee,
            change,
            inputs,
        })
    }

    /// Fee a craft of `amount` would pay on the current cache, without locking anything
    pub fn estimate_fee(
        &self,
        fee_rate_per_weight: u64,
        amount: Amount,
    ) -> Result<FeeEstimate, CraftError> {
        if self.cache.is_empty() {
            self.sync()?;
        }

        let selection = coin_select(fee_rate_per_weight, amount, &self.cache.snapshot())?;
        let (change, fee) = self.apply_dust_policy(&selection);

        Ok(FeeEstimate {
            fee,
            change,
            inputs: selection.selected.len(),
        })
    }

    /// Unlock every output at the node and forget all reservations
    ///
    /// Waits for an in-flight craft so its locks are not pulled from under it.
    pub fn release_all(&self) -> Result<(), CraftError> {
        let _guard = self.craft_lock.lock();

        self.client
            .lock_unspent(true, &[])
            .map_err(|source| CraftError::NodeQuery {
                stage: CraftStage::UnlockOutputs,
                source,
            })?;
        self.cache.clear();

        info!("Released all output locks and reservations");
        self.publish(ConnectorEvent::LocksReleased);
        Ok(())
    }

    fn acquire(&self, deadline: Deadline) -> Result<MutexGuard<'_, ()>, CraftError> {
        let guard = match deadline.instant() {
            Some(at) => self.craft_lock.try_lock_until(at),
            None => Some(self.craft_lock.lock()),
        };

        guard.ok_or(CraftError::Timeout {
            stage: CraftStage::AcquireLock,
        })
    }

    fn select(&self, fee_rate_per_weight: u64, amount: Amount) -> Result<Selection, CraftError> {
        match coin_select(fee_rate_per_weight, amount, &self.cache.snapshot()) {
            Ok(selection) => {
                self.publish(ConnectorEvent::InputsSelected {
                    inputs: selection
                        .selected
                        .iter()
                        .map(|u| OutPointInfo::from(&u.outpoint))
                        .collect(),
                    target_amount: amount.to_sat(),
                    fee_amount: selection.fee.to_sat(),
                    change_amount: selection.change.to_sat(),
                });
                Ok(selection)
            }
            Err(err) => {
                log_event(
                    LogLevel::Warn,
                    LogContext::Crafting,
                    "unable to select inputs",
                    Some(json!({
                        "target_sat": amount.to_sat(),
                        "needed_sat": err.needed,
                        "available_sat": err.available,
                    })),
                );
                self.publish(ConnectorEvent::SelectionFailed {
                    target_amount: amount.to_sat(),
                    needed: err.needed,
                    available: err.available,
                });
                Err(err.into())
            }
        }
    }

    /// Change and fee actually paid: dust change goes to the fee
    fn apply_dust_policy(&self, selection: &Selection) -> (Amount, Amount) {
        let change = selection.change.to_sat();
        if change > 0 && change < self.config.dust_threshold {
            debug!("Folding {} sat of dust change into the fee", change);
            (
                Amount::ZERO,
                Amount::from_sat(selection.fee.to_sat().saturating_add(change)),
            )
        } else {
            (selection.change, selection.fee)
        }
    }

    fn publish(&self, event: ConnectorEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
