//! Field-protocol subscriptions and their resilience monitor

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::metrics::AdapterMetrics;
use crate::protocol::QoS;

use super::{AdapterError, FieldValue};

/// A subscription on one field data point, published to one MQTT topic
///
/// Never mutated: a failed subscription is replaced by a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSubscription {
    /// Address of the data point on the field device
    pub node_id: String,
    /// MQTT topic the values are published to
    pub topic: String,
    pub qos: QoS,
    /// Message expiry interval in seconds
    pub message_expiry_interval: Option<u32>,
}

impl FieldSubscription {
    pub fn new(node_id: impl Into<String>, topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            node_id: node_id.into(),
            topic: topic.into(),
            qos,
            message_expiry_interval: None,
        }
    }

    pub fn with_message_expiry(mut self, seconds: u32) -> Self {
        self.message_expiry_interval = Some(seconds);
        self
    }
}

/// Client side of a field protocol
#[async_trait]
pub trait FieldProtocolClient: Send + Sync {
    /// Subscribe to a data point
    ///
    /// Values arrive on the returned channel; keep-alives and transfer
    /// failures are reported to `monitor`.
    async fn subscribe(
        &self,
        subscription: &FieldSubscription,
        monitor: Arc<SubscriptionMonitor>,
    ) -> Result<mpsc::Receiver<FieldValue>, AdapterError>;
}

/// Invoked with the broken subscription after a transfer failure
pub type RecreateCallback = Arc<dyn Fn(FieldSubscription) + Send + Sync>;

/// Observes subscription health signals for one adapter
///
/// Keep-alives are only counted. A transfer failure is counted and handed
/// to the adapter's recreate callback; retry policy is the adapter's.
pub struct SubscriptionMonitor {
    adapter_id: String,
    metrics: AdapterMetrics,
    recreate: RecreateCallback,
}

impl SubscriptionMonitor {
    pub fn new(adapter_id: impl Into<String>, metrics: AdapterMetrics, recreate: RecreateCallback) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            metrics,
            recreate,
        }
    }

    pub fn on_keep_alive(&self, subscription: &FieldSubscription) {
        self.metrics.subscription_keepalive.inc();
        trace!(
            "Adapter '{}': keep-alive for subscription on '{}'",
            self.adapter_id,
            subscription.node_id
        );
    }

    pub fn on_transfer_failed(&self, subscription: FieldSubscription, reason: &str) {
        self.metrics.subscription_transfer_failed.inc();
        warn!(
            "Adapter '{}': subscription on '{}' failed ({}), recreating",
            self.adapter_id, subscription.node_id, reason
        );
        (self.recreate)(subscription);
    }
}
