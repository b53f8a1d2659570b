//! EdgeBridge - MQTT edge gateway core
//!
//! Bridges a local MQTT broker to remote brokers and feeds it with values
//! from non-MQTT field protocols:
//! - bridge forwarding with topic remapping and hop-count loop prevention
//! - protocol adapters publishing through a common pipeline
//! - subscription resilience for field-protocol subscriptions
//! - a registry managing adapter types and instances

pub mod adapter;
pub mod bridge;
pub mod config;
pub mod error;
pub mod local;
pub mod metrics;
pub mod protocol;
pub mod status;
pub mod topic;

pub use adapter::{ProtocolAdapter, ProtocolAdapterRegistry};
pub use bridge::{BridgeForwarder, BridgeManager, LoopPreventionGuard, TopicRemapper};
pub use config::Config;
pub use error::{AdminError, PublishError, TransformError};
pub use local::LocalBroker;
pub use metrics::Metrics;
pub use protocol::{Message, QoS};
pub use status::ConnectionStatus;
