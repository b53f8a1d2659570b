//! Simulation adapter
//!
//! Generates random values for each configured subscription on a fixed
//! interval. Useful for trying out bridges and topic layouts without a
//! field device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::QoS;
use crate::status::ConnectionStatus;

use super::{
    AdapterError, AdapterPublishPipeline, AdapterServices, AdapterTypeDescriptor, Category,
    DiscoveryInput, FieldProtocolClient, FieldSubscription, FieldValue, NodeTree, ProtocolAdapter,
    ProtocolAdapterFactory, SubscriptionMonitor,
};

pub const PROTOCOL_ID: &str = "simulation";

const MIN_POLLING_INTERVAL_MILLIS: u64 = 100;
const MAX_POLLING_INTERVAL_MILLIS: u64 = 86_400_000;
const CHANNEL_CAPACITY: usize = 64;

fn default_polling_interval_millis() -> u64 {
    1000
}

fn default_max_value() -> f64 {
    1000.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_polling_interval_millis")]
    pub polling_interval_millis: u64,
    pub subscriptions: Vec<SimulationSubscription>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationSubscription {
    /// Topic the generated values are published to
    pub destination: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub min_value: f64,
    #[serde(default = "default_max_value")]
    pub max_value: f64,
    #[serde(default)]
    pub message_expiry_interval: Option<u32>,
}

fn config_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["subscriptions"],
        "additionalProperties": false,
        "properties": {
            "polling_interval_millis": {
                "type": "integer",
                "minimum": MIN_POLLING_INTERVAL_MILLIS,
                "maximum": MAX_POLLING_INTERVAL_MILLIS,
                "default": 1000
            },
            "subscriptions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["destination"],
                    "additionalProperties": false,
                    "properties": {
                        "destination": {"type": "string", "minLength": 1},
                        "qos": {"type": "integer", "minimum": 0, "maximum": 2},
                        "min_value": {"type": "number"},
                        "max_value": {"type": "number"},
                        "message_expiry_interval": {"type": "integer", "minimum": 0}
                    }
                }
            }
        }
    })
}

/// Type descriptor for registering the simulation adapter
pub fn descriptor() -> AdapterTypeDescriptor {
    AdapterTypeDescriptor {
        protocol_id: PROTOCOL_ID.to_string(),
        name: "Simulated Edge Device".to_string(),
        description: "Publishes random values on a fixed interval".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        author: "EdgeBridge Contributors".to_string(),
        url: String::new(),
        category: Category::Simulation,
        tags: Vec::new(),
        config_schema: config_schema(),
        factory: Arc::new(SimulationAdapterFactory),
    }
}

pub struct SimulationAdapterFactory;

impl ProtocolAdapterFactory for SimulationAdapterFactory {
    fn create(
        &self,
        id: &str,
        config: &serde_json::Value,
        services: &AdapterServices,
    ) -> Result<Arc<dyn ProtocolAdapter>, AdapterError> {
        let config: SimulationConfig = serde_json::from_value(config.clone())
            .map_err(|e| AdapterError::Config(e.to_string()))?;
        Ok(SimulationAdapter::new(id, config, services)?)
    }
}

fn node_id(index: usize) -> String {
    format!("sim-{}", index)
}

// =============================================================================
// Simulated field client
// =============================================================================

struct Feed {
    subscription: FieldSubscription,
    monitor: Arc<SubscriptionMonitor>,
    task: JoinHandle<()>,
}

/// In-process stand-in for a field protocol client
///
/// Each subscription gets a generator task that reports a keep-alive and
/// sends a random value in the node's range on every tick.
pub struct SimulatedClient {
    interval: Duration,
    ranges: HashMap<String, (f64, f64)>,
    feeds: Mutex<HashMap<String, Feed>>,
    runtime: Handle,
}

impl SimulatedClient {
    pub fn new(interval: Duration, ranges: HashMap<String, (f64, f64)>, runtime: Handle) -> Self {
        Self {
            interval,
            ranges,
            feeds: Mutex::new(HashMap::new()),
            runtime,
        }
    }

    /// Break the subscription on `node_id` as a failed transfer would
    ///
    /// Returns false if nothing is subscribed on that node.
    pub fn fail_transfer(&self, node_id: &str) -> bool {
        let Some(feed) = self.feeds.lock().remove(node_id) else {
            return false;
        };
        feed.task.abort();
        feed.monitor
            .on_transfer_failed(feed.subscription, "simulated transfer failure");
        true
    }

    pub fn subscription_count(&self) -> usize {
        self.feeds.lock().len()
    }

    /// Stop all generators
    pub fn close(&self) {
        for (_, feed) in self.feeds.lock().drain() {
            feed.task.abort();
        }
    }
}

#[async_trait]
impl FieldProtocolClient for SimulatedClient {
    async fn subscribe(
        &self,
        subscription: &FieldSubscription,
        monitor: Arc<SubscriptionMonitor>,
    ) -> Result<mpsc::Receiver<FieldValue>, AdapterError> {
        let (min, max) = *self
            .ranges
            .get(&subscription.node_id)
            .ok_or_else(|| AdapterError::Subscription(format!("unknown node '{}'", subscription.node_id)))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let interval = self.interval;
        let sub = subscription.clone();
        let keep_alive = monitor.clone();
        let task = self.runtime.spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                keep_alive.on_keep_alive(&sub);
                let value = rng.gen_range(min..=max);
                if tx.send(FieldValue::new(value)).await.is_err() {
                    break;
                }
            }
        });

        let feed = Feed {
            subscription: subscription.clone(),
            monitor,
            task,
        };
        if let Some(previous) = self.feeds.lock().insert(subscription.node_id.clone(), feed) {
            previous.task.abort();
        }
        Ok(rx)
    }
}

// =============================================================================
// Adapter
// =============================================================================

struct Shared {
    id: String,
    client: SimulatedClient,
    pipeline: AdapterPublishPipeline,
    monitor: Arc<SubscriptionMonitor>,
    running: AtomicBool,
    consumers: Mutex<HashMap<String, JoinHandle<()>>>,
    runtime: Handle,
}

impl Shared {
    async fn subscribe(self: &Arc<Self>, subscription: FieldSubscription) -> Result<(), AdapterError> {
        let mut values = self
            .client
            .subscribe(&subscription, self.monitor.clone())
            .await?;

        let shared = Arc::downgrade(self);
        let node_id = subscription.node_id.clone();
        let consumer = self.runtime.spawn(async move {
            while let Some(value) = values.recv().await {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                // Failures are counted and logged by the pipeline
                let _ = shared.pipeline.publish(&value, &subscription);
            }
        });

        if let Some(previous) = self.consumers.lock().insert(node_id, consumer) {
            previous.abort();
        }
        Ok(())
    }

    fn resubscribe(self: Arc<Self>, subscription: FieldSubscription) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let runtime = self.runtime.clone();
        runtime.spawn(async move {
            // The adapter may have been stopped before this task ran
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            let node_id = subscription.node_id.clone();
            match self.subscribe(subscription).await {
                Ok(()) => debug!("Adapter '{}': recreated subscription on '{}'", self.id, node_id),
                Err(e) => warn!(
                    "Adapter '{}': could not recreate subscription on '{}': {}",
                    self.id, node_id, e
                ),
            }
        });
    }
}

/// Adapter publishing simulated values
pub struct SimulationAdapter {
    config: SimulationConfig,
    subscriptions: Vec<FieldSubscription>,
    shared: Arc<Shared>,
}

impl SimulationAdapter {
    pub fn new(id: &str, config: SimulationConfig, services: &AdapterServices) -> Result<Arc<Self>, AdapterError> {
        if !(MIN_POLLING_INTERVAL_MILLIS..=MAX_POLLING_INTERVAL_MILLIS).contains(&config.polling_interval_millis) {
            return Err(AdapterError::Config(format!(
                "polling_interval_millis must be between {} and {}",
                MIN_POLLING_INTERVAL_MILLIS, MAX_POLLING_INTERVAL_MILLIS
            )));
        }

        let mut subscriptions = Vec::with_capacity(config.subscriptions.len());
        let mut ranges = HashMap::new();
        for (i, sub) in config.subscriptions.iter().enumerate() {
            let qos = QoS::from_u8(sub.qos)
                .ok_or_else(|| AdapterError::Config(format!("subscriptions[{}].qos must be 0, 1 or 2", i)))?;
            if !sub.min_value.is_finite() || !sub.max_value.is_finite() || sub.min_value > sub.max_value {
                return Err(AdapterError::Config(format!(
                    "subscriptions[{}]: min_value must be finite and not exceed max_value",
                    i
                )));
            }
            let mut field = FieldSubscription::new(node_id(i), &sub.destination, qos);
            if let Some(expiry) = sub.message_expiry_interval {
                field = field.with_message_expiry(expiry);
            }
            ranges.insert(field.node_id.clone(), (sub.min_value, sub.max_value));
            subscriptions.push(field);
        }

        let metrics = services.metrics.adapter(id);
        let client = SimulatedClient::new(
            Duration::from_millis(config.polling_interval_millis),
            ranges,
            services.runtime.clone(),
        );
        let pipeline = AdapterPublishPipeline::new(
            id,
            PROTOCOL_ID,
            services.publish.clone(),
            metrics.clone(),
            services.runtime.clone(),
        );

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            Shared {
                id: id.to_string(),
                client,
                pipeline,
                monitor: Arc::new(SubscriptionMonitor::new(
                    id,
                    metrics,
                    Arc::new(move |subscription: FieldSubscription| {
                        if let Some(shared) = weak.upgrade() {
                            shared.resubscribe(subscription);
                        }
                    }),
                )),
                running: AtomicBool::new(false),
                consumers: Mutex::new(HashMap::new()),
                runtime: services.runtime.clone(),
            }
        });

        Ok(Arc::new(Self {
            config,
            subscriptions,
            shared,
        }))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn client(&self) -> &SimulatedClient {
        &self.shared.client
    }

    pub fn subscriptions(&self) -> &[FieldSubscription] {
        &self.subscriptions
    }
}

#[async_trait]
impl ProtocolAdapter for SimulationAdapter {
    fn id(&self) -> &str {
        &self.shared.id
    }

    async fn start(&self) -> Result<(), AdapterError> {
        self.shared.running.store(true, Ordering::Release);
        for subscription in &self.subscriptions {
            self.shared.subscribe(subscription.clone()).await?;
        }
        info!(
            "Adapter '{}': simulating {} data point(s) every {}ms",
            self.shared.id,
            self.subscriptions.len(),
            self.config.polling_interval_millis
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.client.close();
        for (_, consumer) in self.shared.consumers.lock().drain() {
            consumer.abort();
        }
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_connected(self.shared.running.load(Ordering::Acquire))
    }

    async fn discover_values(&self, input: &DiscoveryInput) -> Result<NodeTree, AdapterError> {
        let root_id = input.root_node.clone().unwrap_or_else(|| PROTOCOL_ID.to_string());
        let mut root = NodeTree::new(root_id.clone(), self.shared.id.clone());
        if root_id != PROTOCOL_ID {
            return Ok(root);
        }

        for (subscription, config) in self.subscriptions.iter().zip(&self.config.subscriptions) {
            root = root.with_child(
                NodeTree::new(subscription.node_id.clone(), subscription.topic.clone())
                    .with_metadata("min_value", config.min_value.to_string())
                    .with_metadata("max_value", config.max_value.to_string())
                    .with_metadata("qos", subscription.qos.as_u8().to_string()),
            );
        }
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterPublish, AdapterPublishService, BasicSchemaValidator, SchemaValidator};
    use crate::error::PublishError;
    use crate::metrics::Metrics;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<AdapterPublish>>,
    }

    #[async_trait]
    impl AdapterPublishService for Recorder {
        async fn send(&self, publish: AdapterPublish) -> Result<(), PublishError> {
            self.sent.lock().push(publish);
            Ok(())
        }
    }

    fn services(recorder: Arc<Recorder>) -> AdapterServices {
        AdapterServices {
            publish: recorder,
            metrics: Metrics::new().unwrap(),
            runtime: Handle::current(),
        }
    }

    fn config() -> serde_json::Value {
        json!({
            "polling_interval_millis": 100,
            "subscriptions": [
                {"destination": "sim/temp", "qos": 1, "min_value": 20.0, "max_value": 25.0},
                {"destination": "sim/pressure", "message_expiry_interval": 60}
            ]
        })
    }

    #[test]
    fn test_schema_accepts_example_config() {
        let violations = BasicSchemaValidator.validate(&config(), &descriptor().config_schema);
        assert_eq!(violations, Vec::new());
    }

    #[test]
    fn test_schema_rejects_bad_config() {
        let schema = descriptor().config_schema;
        let violations = BasicSchemaValidator.validate(
            &json!({"polling_interval_millis": 10, "subscriptions": [{"qos": 3}]}),
            &schema,
        );
        let mut paths: Vec<_> = violations.iter().map(|v| v.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(
            paths,
            vec![
                "$.polling_interval_millis",
                "$.subscriptions[0].destination",
                "$.subscriptions[0].qos",
            ]
        );
    }

    #[tokio::test]
    async fn test_factory_rejects_inverted_range() {
        let recorder = Arc::new(Recorder::default());
        let config = json!({"subscriptions": [{"destination": "a", "min_value": 5, "max_value": 1}]});
        let result = SimulationAdapterFactory.create("sim-1", &config, &services(recorder));
        assert!(matches!(result, Err(AdapterError::Config(_))));
    }

    #[test]
    fn test_defaults() {
        let config: SimulationConfig =
            serde_json::from_value(json!({"subscriptions": [{"destination": "a"}]})).unwrap();
        assert_eq!(config.polling_interval_millis, 1000);
        assert_eq!(config.subscriptions[0].qos, 0);
        assert_eq!(config.subscriptions[0].min_value, 0.0);
        assert_eq!(config.subscriptions[0].max_value, 1000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_values_in_range() {
        let recorder = Arc::new(Recorder::default());
        let config: SimulationConfig = serde_json::from_value(config()).unwrap();
        let adapter = SimulationAdapter::new("sim-1", config, &services(recorder.clone())).unwrap();

        adapter.start().await.unwrap();
        assert_eq!(adapter.status(), ConnectionStatus::Connected);
        tokio::time::sleep(Duration::from_millis(350)).await;
        adapter.stop().await.unwrap();
        assert_eq!(adapter.status(), ConnectionStatus::Disconnected);

        let sent = recorder.sent.lock().clone();
        let temps: Vec<_> = sent.iter().filter(|p| p.topic == "sim/temp").collect();
        assert!(temps.len() >= 3, "only {} temperature publishes", temps.len());
        for publish in &temps {
            assert_eq!(publish.qos, QoS::AtLeastOnce);
            let body: serde_json::Value = serde_json::from_slice(&publish.payload).unwrap();
            let value = body["value"].as_f64().unwrap();
            assert!((20.0..=25.0).contains(&value), "{} out of range", value);
        }

        let pressure = sent.iter().find(|p| p.topic == "sim/pressure").unwrap();
        assert_eq!(pressure.qos, QoS::AtMostOnce);
        assert_eq!(pressure.message_expiry_interval, Some(60));
        assert_eq!(pressure.context.get("node-id").map(String::as_str), Some("sim-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_failure_recreates_subscription() {
        let recorder = Arc::new(Recorder::default());
        let services = services(recorder.clone());
        let metrics = services.metrics.clone();
        let config: SimulationConfig = serde_json::from_value(config()).unwrap();
        let adapter = SimulationAdapter::new("sim-1", config, &services).unwrap();

        adapter.start().await.unwrap();
        assert!(adapter.client().fail_transfer("sim-0"));
        assert!(!adapter.client().fail_transfer("sim-7"));
        assert_eq!(metrics.adapter("sim-1").subscription_transfer_failed.get(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(adapter.client().subscription_count(), 2);

        let before = recorder.sent.lock().iter().filter(|p| p.topic == "sim/temp").count();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let after = recorder.sent.lock().iter().filter(|p| p.topic == "sim/temp").count();
        assert!(after > before);
        assert!(metrics.adapter("sim-1").subscription_keepalive.get() > 0);

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_recreate_after_stop() {
        let recorder = Arc::new(Recorder::default());
        let config: SimulationConfig = serde_json::from_value(config()).unwrap();
        let adapter = SimulationAdapter::new("sim-1", config, &services(recorder)).unwrap();

        adapter.start().await.unwrap();
        adapter.stop().await.unwrap();
        assert_eq!(adapter.client().subscription_count(), 0);
        assert!(!adapter.client().fail_transfer("sim-0"));
    }

    #[tokio::test]
    async fn test_pending_recreate_skipped_when_stopped() {
        let recorder = Arc::new(Recorder::default());
        let config: SimulationConfig = serde_json::from_value(config()).unwrap();
        let adapter = SimulationAdapter::new("sim-1", config, &services(recorder)).unwrap();

        adapter.start().await.unwrap();
        // Recreation is scheduled but has not run yet on this runtime
        assert!(adapter.client().fail_transfer("sim-0"));
        adapter.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(adapter.client().subscription_count(), 0);
        assert!(adapter.shared.consumers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_lists_subscriptions() {
        let recorder = Arc::new(Recorder::default());
        let config: SimulationConfig = serde_json::from_value(config()).unwrap();
        let adapter = SimulationAdapter::new("sim-1", config, &services(recorder)).unwrap();

        let tree = adapter.discover_values(&DiscoveryInput::new(None, None)).await.unwrap();
        assert_eq!(tree.node_id, PROTOCOL_ID);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].node_id, "sim-0");
        assert_eq!(tree.children[0].name, "sim/temp");
        assert_eq!(tree.children[0].metadata.get("max_value").map(String::as_str), Some("25"));

        let leaf = adapter
            .discover_values(&DiscoveryInput::new(Some("sim-0".to_string()), Some(2)))
            .await
            .unwrap();
        assert!(leaf.children.is_empty());
    }
}
