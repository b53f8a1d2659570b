//! Protocol Adapters
//!
//! A protocol adapter reads values from a non-MQTT field protocol and feeds
//! them into the local broker through the `AdapterPublishPipeline`.
//!
//! Adapter kinds are registered with the `ProtocolAdapterRegistry` as an
//! `AdapterTypeDescriptor`: metadata, a JSON schema for the instance
//! configuration, and a factory turning a validated configuration into a
//! running `ProtocolAdapter`.
//!
//! # Example Configuration
//!
//! ```toml
//! [[adapter]]
//! type = "simulation"
//! id = "sim-1"
//!
//! [adapter.config]
//! polling_interval_millis = 500
//! subscriptions = [{ destination = "sim/temperature", qos = 1, min_value = 15.0, max_value = 30.0 }]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;

use crate::metrics::Metrics;
use crate::status::ConnectionStatus;

mod publish;
mod registry;
mod schema;
pub mod simulation;
mod subscription;

pub use publish::{
    AdapterPublish, AdapterPublishBuilder, AdapterPublishPipeline, AdapterPublishService,
    ContextProvider, FieldValue, PayloadMode,
};
pub use registry::{AdapterInfo, AdapterRuntimeInfo, ProtocolAdapterRegistry};
pub use schema::{BasicSchemaValidator, SchemaValidator, SchemaViolation};
pub use subscription::{FieldProtocolClient, FieldSubscription, RecreateCallback, SubscriptionMonitor};

/// User property carrying the protocol id of the publishing adapter
pub const ADAPTER_PROTOCOL_ID_PROPERTY: &str = "adapter.id";

/// User property carrying the instance id of the publishing adapter
pub const ADAPTER_INSTANCE_ID_PROPERTY: &str = "adapter.instance.id";

/// Adapter error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Subscription failed: {0}")]
    Subscription(String),
    #[error("Discovery failed: {0}")]
    Discovery(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Industrial,
    Building,
    Transportation,
    Simulation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tag {
    Udp,
    Tcp,
    Serial,
    Ethernet,
}

/// One addressable data point (or folder of them) exposed by a field device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeTree {
    pub node_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeTree>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl NodeTree {
    pub fn new(node_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            name: name.into(),
            children: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_child(mut self, child: NodeTree) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Depth of the tree, a leaf being 0
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Where to start browsing and how deep to go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryInput {
    pub root_node: Option<String>,
    /// Always at least 1
    pub depth: u32,
}

impl DiscoveryInput {
    /// Normalise a requested depth: missing or non-positive means 1
    pub fn new(root_node: Option<String>, depth: Option<i64>) -> Self {
        let depth = match depth {
            Some(d) if d > 0 => u32::try_from(d).unwrap_or(u32::MAX),
            _ => 1,
        };
        Self { root_node, depth }
    }
}

/// A running adapter instance
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Instance id
    fn id(&self) -> &str;

    /// Connect to the field device and start publishing
    async fn start(&self) -> Result<(), AdapterError>;

    /// Stop publishing and release the field connection
    async fn stop(&self) -> Result<(), AdapterError>;

    fn status(&self) -> ConnectionStatus;

    /// Browse the data points of the field device
    async fn discover_values(&self, input: &DiscoveryInput) -> Result<NodeTree, AdapterError>;
}

/// Collaborators handed to adapter factories
#[derive(Clone)]
pub struct AdapterServices {
    pub publish: Arc<dyn AdapterPublishService>,
    pub metrics: Metrics,
    pub runtime: Handle,
}

/// Turns a schema-valid configuration into an adapter
pub trait ProtocolAdapterFactory: Send + Sync {
    fn create(
        &self,
        id: &str,
        config: &serde_json::Value,
        services: &AdapterServices,
    ) -> Result<Arc<dyn ProtocolAdapter>, AdapterError>;
}

/// A registered adapter kind
#[derive(Clone)]
pub struct AdapterTypeDescriptor {
    pub protocol_id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub url: String,
    pub category: Category,
    pub tags: Vec<Tag>,
    /// JSON schema of the instance configuration
    pub config_schema: serde_json::Value,
    pub factory: Arc<dyn ProtocolAdapterFactory>,
}

impl fmt::Debug for AdapterTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterTypeDescriptor")
            .field("protocol_id", &self.protocol_id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("category", &self.category)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}
