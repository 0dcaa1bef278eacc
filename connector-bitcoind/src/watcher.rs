//! Incoming payment watcher
//!
//! Polls the node's incoming transfers and emits, exactly once, every
//! transfer that has reached the required confirmations. Emissions are
//! batched per poll on a `crossbeam-channel` stream.

use chrono::{DateTime, Utc};
use connector_common::events::{ConnectorEvent, EventBus};
use connector_common::logging::{log_event, LogContext, LogLevel};
use connector_common::math::amount_to_decimal;
use connector_common::types::{NetworkType, Payment};
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::client::{IncomingTransfer, NodeClient, NodeError};

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Emits confirmed incoming payments
pub struct PaymentWatcher<C: NodeClient + 'static> {
    client: Arc<C>,
    min_confirmations: u32,
    reported: Mutex<HashSet<String>>,
    sender: Sender<Vec<Payment>>,
    receiver: Receiver<Vec<Payment>>,
    events: Option<Arc<EventBus>>,
    worker: Mutex<Option<Worker>>,
    last_poll: Mutex<Option<DateTime<Utc>>>,
}

impl<C: NodeClient + 'static> PaymentWatcher<C> {
    pub fn new(client: Arc<C>, min_confirmations: u32) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            client,
            min_confirmations,
            reported: Mutex::new(HashSet::new()),
            sender,
            receiver,
            events: None,
            worker: Mutex::new(None),
            last_poll: Mutex::new(None),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Stream of confirmed payment batches
    ///
    /// Every clone shares one queue, so each batch reaches one reader.
    pub fn receiver(&self) -> Receiver<Vec<Payment>> {
        self.receiver.clone()
    }

    /// Poll the node once and emit newly confirmed transfers
    ///
    /// Returns the number of payments emitted.
    pub fn poll_once(&self) -> Result<usize, NodeError> {
        let transfers = self.client.list_transactions(None)?;
        *self.last_poll.lock() = Some(Utc::now());

        let mut reported = self.reported.lock();
        let batch: Vec<Payment> = transfers
            .iter()
            .filter(|t| t.confirmations >= self.min_confirmations)
            .filter(|t| reported.insert(t.payment_id()))
            .map(to_payment)
            .collect();
        // The node no longer lists these, so they cannot be reported again
        let listed: HashSet<String> = transfers.iter().map(IncomingTransfer::payment_id).collect();
        reported.retain(|id| listed.contains(id));
        drop(reported);

        if batch.is_empty() {
            return Ok(0);
        }

        for payment in &batch {
            log_event(
                LogLevel::Info,
                LogContext::Watcher,
                "payment confirmed",
                Some(json!({
                    "id": payment.id,
                    "amount": payment.amount.to_string(),
                    "account": payment.account,
                })),
            );
        }

        let count = batch.len();
        if let Some(bus) = &self.events {
            bus.publish(ConnectorEvent::PaymentsConfirmed {
                payment_ids: batch.iter().map(|p| p.id.clone()).collect(),
            });
        }
        // The watcher holds a receiver itself, so the channel never disconnects.
        let _ = self.sender.send(batch);

        Ok(count)
    }

    /// Poll every `interval` on a background thread until [`stop`](Self::stop)
    ///
    /// Returns false if the watcher is already running.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return false;
        }

        let (stop, stopped) = bounded::<()>(0);
        let watcher = Arc::clone(self);
        let handle = thread::spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(stopped) -> _ => break,
                    recv(ticker) -> _ => {
                        if let Err(e) = watcher.poll_once() {
                            warn!("Unable to poll incoming transfers: {}", e);
                        }
                    }
                }
            }
            debug!("Payment watcher stopped");
        });

        *worker = Some(Worker { stop, handle });
        true
    }

    /// Stop the background thread and wait for it
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            drop(worker.stop);
            if worker.handle.join().is_err() {
                warn!("Payment watcher thread panicked");
            }
        }
    }

    /// Time of the last successful poll
    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        *self.last_poll.lock()
    }

    /// Number of payment ids remembered as already emitted
    pub fn reported_count(&self) -> usize {
        self.reported.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

fn to_payment(transfer: &IncomingTransfer) -> Payment {
    Payment::new(
        transfer.payment_id(),
        amount_to_decimal(transfer.amount),
        transfer.account.clone(),
        transfer.address.clone(),
        NetworkType::Blockchain,
    )
}
