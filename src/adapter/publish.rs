//! Adapter Publish Pipeline
//!
//! Turns values read by an adapter into MQTT publishes on the local broker:
//! payload conversion, topic/QoS/expiry from the subscription, context
//! information about the source, and success/failure accounting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::error::PublishError;
use crate::metrics::AdapterMetrics;
use crate::protocol::{Message, QoS, UserProperty};
use crate::topic::validate_topic_name;

use super::{
    AdapterError, FieldSubscription, ADAPTER_INSTANCE_ID_PROPERTY, ADAPTER_PROTOCOL_ID_PROPERTY,
};

/// Context key for the field node a value was read from
pub const NODE_ID_CONTEXT: &str = "node-id";

/// How values are encoded into MQTT payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Plain text rendering of the value
    String,
    /// `{"value": ..., "timestamp": <millis>}`
    #[default]
    Json,
}

/// A value read from a field device
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    /// `Value::Null` when the device reported no value
    pub value: Value,
    /// Source timestamp in milliseconds since the epoch, if the device sent one
    pub timestamp_millis: Option<u64>,
}

impl FieldValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            timestamp_millis: None,
        }
    }

    pub fn null() -> Self {
        Self::new(Value::Null)
    }

    pub fn with_timestamp(mut self, millis: u64) -> Self {
        self.timestamp_millis = Some(millis);
        self
    }
}

#[derive(Serialize)]
struct JsonPayload<'a> {
    value: &'a Value,
    timestamp: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl PayloadMode {
    /// Encode a value; a null value always yields an empty payload
    pub fn convert(&self, value: &FieldValue) -> Result<Bytes, PublishError> {
        if value.value.is_null() {
            return Ok(Bytes::new());
        }
        match self {
            PayloadMode::String => Ok(match &value.value {
                Value::String(s) => Bytes::from(s.clone()),
                other => Bytes::from(other.to_string()),
            }),
            PayloadMode::Json => {
                let payload = JsonPayload {
                    value: &value.value,
                    timestamp: value.timestamp_millis.unwrap_or_else(now_millis),
                };
                serde_json::to_vec(&payload)
                    .map(Bytes::from)
                    .map_err(|e| PublishError::Conversion(e.to_string()))
            }
        }
    }
}

/// A publish produced by an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterPublish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub message_expiry_interval: Option<u32>,
    /// Best-effort information about the source of the value
    pub context: BTreeMap<String, String>,
    pub user_properties: Vec<UserProperty>,
}

impl AdapterPublish {
    pub fn builder() -> AdapterPublishBuilder {
        AdapterPublishBuilder::default()
    }

    /// MQTT message for the local broker
    ///
    /// Context entries travel as user properties after the explicit ones.
    pub fn into_message(self) -> Message {
        let mut user_properties = self.user_properties;
        user_properties.extend(
            self.context
                .into_iter()
                .map(|(name, value)| UserProperty { name, value }),
        );
        Message {
            topic: self.topic,
            payload: self.payload,
            qos: self.qos,
            message_expiry_interval: self.message_expiry_interval,
            user_properties,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct AdapterPublishBuilder {
    topic: Option<String>,
    payload: Bytes,
    qos: QoS,
    message_expiry_interval: Option<u32>,
    context: BTreeMap<String, String>,
    user_properties: Vec<UserProperty>,
}

impl AdapterPublishBuilder {
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn message_expiry_interval(mut self, seconds: u32) -> Self {
        self.message_expiry_interval = Some(seconds);
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push(UserProperty::new(name, value));
        self
    }

    /// Fails if the topic is missing or not a valid topic name
    pub fn build(self) -> Result<AdapterPublish, PublishError> {
        let topic = self
            .topic
            .ok_or_else(|| PublishError::Conversion("publish has no topic".to_string()))?;
        validate_topic_name(&topic)
            .map_err(|e| PublishError::Conversion(format!("invalid topic '{}': {}", topic, e)))?;

        Ok(AdapterPublish {
            topic,
            payload: self.payload,
            qos: self.qos,
            message_expiry_interval: self.message_expiry_interval,
            context: self.context,
            user_properties: self.user_properties,
        })
    }
}

/// Entry point of adapter publishes into the local broker
#[async_trait]
pub trait AdapterPublishService: Send + Sync {
    /// Resolves once the broker accepted the publish
    async fn send(&self, publish: AdapterPublish) -> Result<(), PublishError>;
}

/// Dynamic information about the field connection, e.g. the endpoint url
pub trait ContextProvider: Send + Sync {
    fn context(&self) -> Result<Vec<(String, String)>, AdapterError>;
}

/// Publishes the values of one adapter instance
pub struct AdapterPublishPipeline {
    adapter_id: String,
    protocol_id: String,
    mode: PayloadMode,
    service: Arc<dyn AdapterPublishService>,
    context: Option<Arc<dyn ContextProvider>>,
    metrics: AdapterMetrics,
    runtime: Handle,
}

impl AdapterPublishPipeline {
    pub fn new(
        adapter_id: impl Into<String>,
        protocol_id: impl Into<String>,
        service: Arc<dyn AdapterPublishService>,
        metrics: AdapterMetrics,
        runtime: Handle,
    ) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            protocol_id: protocol_id.into(),
            mode: PayloadMode::default(),
            service,
            context: None,
            metrics,
            runtime,
        }
    }

    pub fn with_payload_mode(mut self, mode: PayloadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(provider);
        self
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    /// Publish `value` as configured by `subscription`
    ///
    /// The send runs on a spawned task. A value that cannot be turned into
    /// a publish is counted as failed, logged and returned as an error.
    pub fn publish(
        &self,
        value: &FieldValue,
        subscription: &FieldSubscription,
    ) -> Result<JoinHandle<Result<(), PublishError>>, PublishError> {
        let publish = match self.build(value, subscription) {
            Ok(publish) => publish,
            Err(e) => {
                self.metrics.publish_failed.inc();
                error!(
                    "Error on creating MQTT publish from subscription on '{}' for adapter '{}': {}",
                    subscription.node_id, self.adapter_id, e
                );
                return Err(e);
            }
        };

        let service = self.service.clone();
        let metrics = self.metrics.clone();
        let adapter_id = self.adapter_id.clone();
        Ok(self.runtime.spawn(async move {
            let topic = publish.topic.clone();
            let result = service.send(publish).await;
            match &result {
                Ok(()) => {
                    metrics.publish_success.inc();
                    trace!("Adapter '{}': published to '{}'", adapter_id, topic);
                }
                Err(e) => {
                    metrics.publish_failed.inc();
                    debug!("Adapter '{}': publish to '{}' failed: {}", adapter_id, topic, e);
                }
            }
            result
        }))
    }

    fn build(&self, value: &FieldValue, subscription: &FieldSubscription) -> Result<AdapterPublish, PublishError> {
        let mut builder = AdapterPublish::builder()
            .topic(&subscription.topic)
            .payload(self.mode.convert(value)?)
            .qos(subscription.qos)
            .context(NODE_ID_CONTEXT, &subscription.node_id)
            .user_property(ADAPTER_PROTOCOL_ID_PROPERTY, &self.protocol_id)
            .user_property(ADAPTER_INSTANCE_ID_PROPERTY, &self.adapter_id);

        if let Some(expiry) = subscription.message_expiry_interval {
            builder = builder.message_expiry_interval(expiry);
        }

        if let Some(provider) = &self.context {
            match provider.context() {
                Ok(entries) => {
                    for (key, value) in entries {
                        builder = builder.context(key, value);
                    }
                }
                Err(e) => debug!(
                    "Not able to get dynamic context infos for adapter '{}': {}",
                    self.adapter_id, e
                ),
            }
        }

        builder.build()
    }
}
