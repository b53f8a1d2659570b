//! Forwarding destinations
//!
//! A forwarder publishes into a `ForwardTarget`: the remote broker
//! connection for local subscriptions, the local broker for remote
//! subscriptions. The MQTT transport behind a remote target is provided by
//! the embedding application.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::error::PublishError;
use crate::protocol::Message;
use crate::status::ConnectionStatus;

/// Destination of a bridge forwarder
#[async_trait]
pub trait ForwardTarget: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether the destination currently accepts publishes
    fn is_connected(&self) -> bool;

    /// Publish a message, resolving once the destination acknowledged it
    async fn publish(&self, message: Message) -> Result<(), PublishError>;

    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::from_connected(self.is_connected())
    }
}

/// Remote that logs messages instead of sending them
///
/// Used when no MQTT transport is wired in, e.g. to check a configuration
/// end to end.
pub struct DryRunRemote {
    name: String,
    endpoint: String,
    connected: AtomicBool,
    published: AtomicU64,
}

impl DryRunRemote {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            connected: AtomicBool::new(true),
            published: AtomicU64::new(0),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Number of messages accepted so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ForwardTarget for DryRunRemote {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(&self, message: Message) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::ConnectionLost(self.endpoint.clone()));
        }
        self.published.fetch_add(1, Ordering::AcqRel);
        info!(
            "Bridge '{}': [dry-run] {} -> {} (qos={}, retain={}, {} bytes)",
            self.name,
            message.topic,
            self.endpoint,
            message.qos.as_u8(),
            message.retain,
            message.payload.len()
        );
        Ok(())
    }
}
