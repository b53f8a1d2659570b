//! MQTT Bridge Module
//!
//! Forwards messages between the local broker and remote MQTT brokers.
//! Each bridge link owns one forwarder per subscription:
//! - local subscriptions forward local -> remote (outbound)
//! - remote subscriptions forward remote -> local (inbound)
//!
//! # Loop Prevention
//!
//! Forwarded messages carry a hop-count user property. A bridge with loop
//! prevention enabled drops any message whose hop count reached its limit,
//! and increments the hop count on every message it forwards.
//!
//! # Example Configuration
//!
//! ```toml
//! [[bridge]]
//! id = "cloud"
//! host = "cloud.example.com"
//! port = 8883
//! loop_prevention_hop_count = 1
//!
//! [[bridge.local_subscriptions]]
//! filters = ["sensors/#"]
//! destination = "edge/{bridge.name}/{#}"
//! excludes = ["sensors/debug/#"]
//! max_qos = 1
//! ```

mod forwarder;
mod interceptor;
mod loop_guard;
mod manager;
mod remapper;
mod remote;

#[cfg(test)]
mod tests;

pub use forwarder::{
    AckToken, BridgeForwarder, Direction, DropReason, ForwardCallback, ForwardHandle,
    ForwardOutcome, ForwardingServices,
};
pub use interceptor::{
    BridgeContext, BridgeInterceptor, InterceptOutcome, InterceptorChain, InterceptorError,
    PassThrough,
};
pub use loop_guard::{LoopDecision, LoopPreventionGuard};
pub use manager::{BridgeLink, BridgeManager, BridgeStatus};
pub use remapper::{remap, TopicRemapper};
pub use remote::{DryRunRemote, ForwardTarget};

/// User property carrying the number of bridges a message has crossed
pub const HOP_COUNT_PROPERTY: &str = "x-edgebridge-hop-count";

/// Destination pattern token replaced by the bridge id
pub const BRIDGE_NAME_TOKEN: &str = "bridge.name";
