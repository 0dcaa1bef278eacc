//! Domain events of the payment connector
//!
//! Adapters publish what they do to an optional [`EventBus`] so the platform
//! can audit crafting decisions and incoming payments without parsing logs.
//! Subscribers register for a topic (see [`ConnectorEvent::topic`]) or for
//! `"all"` and receive events over `crossbeam-channel` receivers.
//!
//! Events never carry node credentials. Outpoints, addresses and amounts are
//! public chain data.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Topic that receives every event
pub const ALL_TOPICS: &str = "all";

/// Serializable representation of an outpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPointInfo {
    pub txid: String,
    pub vout: u32,
}

impl From<&bitcoin::OutPoint> for OutPointInfo {
    fn from(outpoint: &bitcoin::OutPoint) -> Self {
        Self {
            txid: outpoint.txid.to_string(),
            vout: outpoint.vout,
        }
    }
}

/// Events emitted by the connector adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorEvent {
    /// The unspent output cache was replaced from the node
    UnspentSynced {
        outputs: usize,
        total_sats: u64,
    },
    /// The selector picked inputs for a payment
    InputsSelected {
        inputs: Vec<OutPointInfo>,
        target_amount: u64,
        fee_amount: u64,
        change_amount: u64,
    },
    /// The selector could not cover a payment
    SelectionFailed {
        target_amount: u64,
        needed: u64,
        available: u64,
    },
    /// Selected inputs were locked at the node
    InputsLocked {
        inputs: Vec<OutPointInfo>,
    },
    /// Locking an input at the node failed
    LockFailed {
        outpoint: OutPointInfo,
        reason: String,
    },
    /// A raw transaction was assembled and handed to the caller
    TransactionCrafted {
        txid: String,
        fee_amount: u64,
        change_amount: u64,
    },
    /// All node locks and reservations were released
    LocksReleased,
    /// A batch of incoming blockchain payments reached the confirmation threshold
    PaymentsConfirmed {
        payment_ids: Vec<String>,
    },
    /// A lightning invoice was settled
    InvoiceSettled {
        payment_hash: String,
        settle_index: u64,
    },
}

impl ConnectorEvent {
    /// Topic name subscribers use for this event
    pub fn topic(&self) -> &'static str {
        match self {
            ConnectorEvent::UnspentSynced { .. } => "unspent_synced",
            ConnectorEvent::InputsSelected { .. } => "inputs_selected",
            ConnectorEvent::SelectionFailed { .. } => "selection_failed",
            ConnectorEvent::InputsLocked { .. } => "inputs_locked",
            ConnectorEvent::LockFailed { .. } => "lock_failed",
            ConnectorEvent::TransactionCrafted { .. } => "transaction_crafted",
            ConnectorEvent::LocksReleased => "locks_released",
            ConnectorEvent::PaymentsConfirmed { .. } => "payments_confirmed",
            ConnectorEvent::InvoiceSettled { .. } => "invoice_settled",
        }
    }
}

/// Simple topic based bus for connector events
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<Sender<ConnectorEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event
    pub fn subscribe_all(&self) -> Receiver<ConnectorEvent> {
        self.subscribe(ALL_TOPICS)
    }

    /// Subscribe to one topic, e.g. "transaction_crafted"
    pub fn subscribe(&self, topic: &str) -> Receiver<ConnectorEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers
            .lock()
            .entry(topic.to_lowercase())
            .or_default()
            .push(sender);
        receiver
    }

    /// Deliver an event to its topic subscribers and to "all" subscribers
    ///
    /// Subscribers whose receiver was dropped are removed.
    pub fn publish(&self, event: ConnectorEvent) {
        let mut subscribers = self.subscribers.lock();
        for topic in [event.topic(), ALL_TOPICS] {
            if let Some(senders) = subscribers.get_mut(topic) {
                senders.retain(|sender| sender.send(event.clone()).is_ok());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn crafted() -> ConnectorEvent {
        ConnectorEvent::TransactionCrafted {
            txid: "00".repeat(32),
            fee_amount: 1_000,
            change_amount: 2_000,
        }
    }

    #[test]
    fn test_basic_subscribe_publish() {
        let bus = EventBus::new();
        let receiver = bus.subscribe("transaction_crafted");

        bus.publish(crafted());

        assert_eq!(receiver.recv().unwrap(), crafted());
    }

    #[test]
    fn test_subscribe_all() {
        let bus = EventBus::new();
        let receiver = bus.subscribe_all();

        bus.publish(ConnectorEvent::LocksReleased);
        bus.publish(crafted());

        assert_eq!(receiver.recv().unwrap(), ConnectorEvent::LocksReleased);
        assert_eq!(receiver.recv().unwrap(), crafted());
    }

    #[test]
    fn test_no_event_received_for_different_topic() {
        let bus = EventBus::new();
        let receiver = bus.subscribe("lock_failed");

        bus.publish(crafted());

        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe_all();
        drop(bus.subscribe_all());
        assert_eq!(bus.subscribers.lock()[ALL_TOPICS].len(), 2);

        bus.publish(ConnectorEvent::LocksReleased);

        assert_eq!(bus.subscribers.lock()[ALL_TOPICS].len(), 1);
        assert_eq!(kept.recv().unwrap(), ConnectorEvent::LocksReleased);
    }
}
