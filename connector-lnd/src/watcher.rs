//! Settled invoice watcher
//!
//! Turns settled invoices into [`Payment`]s. The watcher remembers the last
//! settle index it has seen so every invoice is reported once.

use connector_common::error::{node_error_with_source, ConnectorResult};
use connector_common::events::{ConnectorEvent, EventBus};
use connector_common::logging::{log_event, LogContext, LogLevel};
use connector_common::math::amount_to_decimal;
use connector_common::types::{NetworkType, Payment};
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::client::LndClient;

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Emits settled invoices as payments
pub struct InvoiceWatcher<C: LndClient + 'static> {
    client: Arc<C>,
    last_settle_index: Mutex<u64>,
    sender: Sender<Payment>,
    receiver: Receiver<Payment>,
    events: Option<Arc<EventBus>>,
    worker: Mutex<Option<Worker>>,
}

impl<C: LndClient + 'static> InvoiceWatcher<C> {
    pub fn new(client: Arc<C>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            client,
            last_settle_index: Mutex::new(0),
            sender,
            receiver,
            events: None,
            worker: Mutex::new(None),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Stream of settled invoice payments
    pub fn receiver(&self) -> Receiver<Payment> {
        self.receiver.clone()
    }

    /// Continue reporting after `settle_index`
    pub fn resume_from(&self, settle_index: u64) {
        *self.last_settle_index.lock() = settle_index;
    }

    pub fn last_settle_index(&self) -> u64 {
        *self.last_settle_index.lock()
    }

    /// Fetch invoices settled since the last poll and emit them as payments
    ///
    /// Returns the number of payments emitted.
    pub fn poll_once(&self) -> ConnectorResult<usize> {
        let mut last = self.last_settle_index.lock();
        let since = *last;
        let settled = self
            .client
            .settled_invoices(since)
            .map_err(|e| node_error_with_source("unable to list settled invoices", e))?;

        let mut emitted = 0;
        for invoice in settled.into_iter().filter(|i| i.settle_index > since) {
            *last = (*last).max(invoice.settle_index);
            log_event(
                LogLevel::Info,
                LogContext::Lightning,
                "invoice settled",
                Some(json!({
                    "payment_hash": invoice.payment_hash,
                    "account": invoice.memo,
                    "amount_sat": invoice.amount_paid.to_sat(),
                    "settle_index": invoice.settle_index,
                })),
            );

            if let Some(bus) = &self.events {
                bus.publish(ConnectorEvent::InvoiceSettled {
                    payment_hash: invoice.payment_hash.clone(),
                    settle_index: invoice.settle_index,
                });
            }

            let payment = Payment::new(
                invoice.payment_hash,
                amount_to_decimal(invoice.amount_paid),
                invoice.memo,
                invoice.payment_request,
                NetworkType::Lightning,
            );
            // The watcher holds a receiver itself, so the channel never disconnects.
            let _ = self.sender.send(payment);
            emitted += 1;
        }

        Ok(emitted)
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
                            warn!("Unable to poll settled invoices: {}", e);
                        }
                    }
                }
            }
            debug!("Settled invoice watcher stopped");
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
                warn!("Settled invoice watcher panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}
