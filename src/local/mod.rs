//! Local Broker
//!
//! In-process stand-in for the gateway's own MQTT broker. Adapter publishes
//! and inbound bridge messages land here; every message is delivered to the
//! matching local subscribers and offered to the outbound side of every
//! bridge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::adapter::{AdapterPublish, AdapterPublishService};
use crate::bridge::{BridgeManager, ForwardTarget};
use crate::error::PublishError;
use crate::protocol::Message;
use crate::topic::{topic_matches_filter, validate_topic_filter, validate_topic_name, TopicError};

/// Default per-subscriber queue length
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct Subscriber {
    filter: String,
    tx: mpsc::Sender<Message>,
}

/// Local message hub
pub struct LocalBroker {
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber: AtomicU64,
    next_message: AtomicU64,
    /// Weak so the manager, which targets this broker, can own us
    bridges: RwLock<Weak<BridgeManager>>,
    capacity: usize,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_subscriber: AtomicU64::new(1),
            next_message: AtomicU64::new(1),
            bridges: RwLock::new(Weak::new()),
            capacity: capacity.max(1),
        }
    }

    /// Offer every local message to the outbound forwarders of `bridges`
    pub fn attach_bridges(&self, bridges: &Arc<BridgeManager>) {
        *self.bridges.write() = Arc::downgrade(bridges);
    }

    /// Subscribe to a topic filter
    ///
    /// Returns the subscription id and the receiving end of its queue.
    pub fn subscribe(&self, filter: &str) -> Result<(u64, mpsc::Receiver<Message>), TopicError> {
        validate_topic_filter(filter)?;
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(
            id,
            Subscriber {
                filter: filter.to_string(),
                tx,
            },
        );
        debug!("Local broker: subscription {} on '{}'", id, filter);
        Ok((id, rx))
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver a message locally and to the bridges
    ///
    /// Returns the number of local subscribers that received it. A full
    /// subscriber queue loses the message for that subscriber only.
    pub fn dispatch(&self, message: Message) -> Result<usize, PublishError> {
        validate_topic_name(&message.topic)
            .map_err(|e| PublishError::Rejected(format!("invalid topic '{}': {}", message.topic, e)))?;

        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if !topic_matches_filter(&message.topic, &entry.filter) {
                continue;
            }
            match entry.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => warn!(
                    "Local broker: queue of subscription {} is full, dropping message on '{}'",
                    entry.key(),
                    message.topic
                ),
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }

        let bridges = self.bridges.read().upgrade();
        if let Some(bridges) = bridges {
            let id = self.next_message.fetch_add(1, Ordering::Relaxed);
            let handles = bridges.forward_local(&message, id);
            trace!(
                "Local broker: message {} on '{}' offered to {} forwarder(s)",
                id,
                message.topic,
                handles.len()
            );
        }

        Ok(delivered)
    }
}

#[async_trait]
impl AdapterPublishService for LocalBroker {
    async fn send(&self, publish: AdapterPublish) -> Result<(), PublishError> {
        self.dispatch(publish.into_message()).map(|_| ())
    }
}

#[async_trait]
impl ForwardTarget for LocalBroker {
    fn name(&self) -> &str {
        "local"
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn publish(&self, message: Message) -> Result<(), PublishError> {
        self.dispatch(message).map(|_| ())
    }
}
