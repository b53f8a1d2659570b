//! Bridge Manager
//!
//! Owns every bridge link and its forwarders, and provides a unified
//! interface for the local broker to hand messages to the bridges.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{BridgeConfig, BridgeSubscription};
use crate::error::AdminError;
use crate::protocol::Message;
use crate::status::ConnectionStatus;

use super::forwarder::{AckToken, BridgeForwarder, Direction, ForwardHandle, ForwardingServices};
use super::remote::ForwardTarget;

const KIND: &str = "bridge";

/// A configured bridge and its running forwarders
pub struct BridgeLink {
    config: BridgeConfig,
    remote: Arc<dyn ForwardTarget>,
    outbound: Vec<BridgeForwarder>,
    inbound: Vec<BridgeForwarder>,
}

impl BridgeLink {
    /// Build the forwarders for `config`; none of them is started yet
    fn build(
        config: BridgeConfig,
        remote: Arc<dyn ForwardTarget>,
        local: Arc<dyn ForwardTarget>,
        services: &ForwardingServices,
    ) -> Result<Self, AdminError> {
        let outbound = build_forwarders(
            &config,
            Direction::Outbound,
            &config.local_subscriptions,
            &remote,
            services,
        )?;
        let inbound = build_forwarders(
            &config,
            Direction::Inbound,
            &config.remote_subscriptions,
            &local,
            services,
        )?;

        Ok(Self {
            config,
            remote,
            outbound,
            inbound,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn remote(&self) -> &Arc<dyn ForwardTarget> {
        &self.remote
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.remote.connection_status()
    }

    pub fn outbound(&self) -> &[BridgeForwarder] {
        &self.outbound
    }

    pub fn inbound(&self) -> &[BridgeForwarder] {
        &self.inbound
    }

    fn forwarders(&self) -> impl Iterator<Item = &BridgeForwarder> {
        self.outbound.iter().chain(self.inbound.iter())
    }

    pub fn inflight(&self) -> usize {
        self.forwarders().map(BridgeForwarder::inflight).sum()
    }

    pub fn start(&self) {
        self.forwarders().for_each(BridgeForwarder::start);
    }

    pub fn stop(&self) {
        self.forwarders().for_each(BridgeForwarder::stop);
    }

    /// Wait for all forwarders of this link to finish their in-flight messages
    pub async fn drain(&self, timeout: Duration) -> bool {
        let mut drained = true;
        for forwarder in self.forwarders() {
            drained &= forwarder.drain(timeout).await;
        }
        drained
    }
}

fn build_forwarders(
    config: &BridgeConfig,
    direction: Direction,
    subscriptions: &[BridgeSubscription],
    target: &Arc<dyn ForwardTarget>,
    services: &ForwardingServices,
) -> Result<Vec<BridgeForwarder>, AdminError> {
    let field = match direction {
        Direction::Outbound => "local_subscriptions",
        Direction::Inbound => "remote_subscriptions",
    };

    subscriptions
        .iter()
        .enumerate()
        .map(|(i, subscription)| {
            BridgeForwarder::new(config, direction, i, subscription, target.clone(), services)
                .map_err(|e| AdminError::validation(format!("{}[{}]", field, i), e.to_string()))
        })
        .collect()
}

/// Point-in-time view of one bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    pub id: String,
    pub endpoint: String,
    pub connection: ConnectionStatus,
    pub forwarders: usize,
    pub inflight: usize,
}

/// Manages all bridge links of the gateway
pub struct BridgeManager {
    links: RwLock<HashMap<String, Arc<BridgeLink>>>,
    /// Serialises add/update/delete
    admin: Mutex<()>,
    /// Target of inbound forwarders
    local: Arc<dyn ForwardTarget>,
    services: ForwardingServices,
    drain_timeout: Duration,
}

impl BridgeManager {
    /// Create a bridge manager delivering inbound messages to `local`
    pub fn new(
        local: Arc<dyn ForwardTarget>,
        services: ForwardingServices,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            admin: Mutex::new(()),
            local,
            services,
            drain_timeout,
        }
    }

    /// Add and start a new bridge link
    pub async fn add_bridge(
        &self,
        config: BridgeConfig,
        remote: Arc<dyn ForwardTarget>,
    ) -> Result<(), AdminError> {
        let _admin = self.admin.lock().await;

        if self.links.read().contains_key(&config.id) {
            return Err(AdminError::duplicate(KIND, &config.id));
        }
        config.validate()?;

        let link = BridgeLink::build(config, remote, self.local.clone(), &self.services)?;
        link.start();
        info!(
            "Bridge manager: Added bridge '{}' to {} ({} outbound, {} inbound forwarder(s))",
            link.id(),
            link.config.endpoint(),
            link.outbound.len(),
            link.inbound.len()
        );
        self.links
            .write()
            .insert(link.id().to_string(), Arc::new(link));
        Ok(())
    }

    /// Replace an existing bridge link
    ///
    /// The old forwarders are stopped and drained before the new ones start.
    pub async fn update_bridge(
        &self,
        config: BridgeConfig,
        remote: Arc<dyn ForwardTarget>,
    ) -> Result<(), AdminError> {
        let _admin = self.admin.lock().await;

        let old = self
            .get(&config.id)
            .ok_or_else(|| AdminError::not_found(KIND, &config.id))?;
        config.validate()?;
        let link = Arc::new(BridgeLink::build(
            config,
            remote,
            self.local.clone(),
            &self.services,
        )?);

        old.stop();
        if !old.drain(self.drain_timeout).await {
            warn!(
                "Bridge manager: Bridge '{}' replaced with {} message(s) still in flight",
                old.id(),
                old.inflight()
            );
        }

        self.links
            .write()
            .insert(link.id().to_string(), link.clone());
        link.start();
        info!("Bridge manager: Updated bridge '{}'", link.id());
        Ok(())
    }

    /// Stop, drain and remove a bridge link
    pub async fn delete_bridge(&self, id: &str) -> Result<(), AdminError> {
        let _admin = self.admin.lock().await;

        let link = self.get(id).ok_or_else(|| AdminError::not_found(KIND, id))?;
        link.stop();
        if !link.drain(self.drain_timeout).await {
            error!(
                "Bridge manager: Bridge '{}' removed with {} message(s) still in flight",
                id,
                link.inflight()
            );
        }
        self.links.write().remove(id);
        info!("Bridge manager: Removed bridge '{}'", id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<BridgeLink>> {
        self.links.read().get(id).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<BridgeLink>> {
        let mut links: Vec<_> = self.links.read().values().cloned().collect();
        links.sort_by(|a, b| a.id().cmp(b.id()));
        links
    }

    /// Hand a local message to every outbound forwarder whose filters match
    ///
    /// Each forwarder completes its copy independently, acknowledged under
    /// its own queue id.
    pub fn forward_local(&self, message: &Message, message_id: u64) -> Vec<ForwardHandle> {
        self.snapshot()
            .iter()
            .flat_map(|link| dispatch(&link.outbound, message, message_id))
            .collect()
    }

    /// Hand a message received from `bridge_id`'s remote to its inbound forwarders
    pub fn forward_remote(
        &self,
        bridge_id: &str,
        message: &Message,
        message_id: u64,
    ) -> Result<Vec<ForwardHandle>, AdminError> {
        let link = self
            .get(bridge_id)
            .ok_or_else(|| AdminError::not_found(KIND, bridge_id))?;
        Ok(dispatch(&link.inbound, message, message_id))
    }

    /// Check if any bridge wants to forward a local topic
    pub fn should_forward(&self, topic: &str) -> bool {
        self.links
            .read()
            .values()
            .any(|link| link.outbound.iter().any(|f| f.matches(topic)))
    }

    pub fn connection_status(&self, id: &str) -> Result<ConnectionStatus, AdminError> {
        self.get(id)
            .map(|link| link.connection_status())
            .ok_or_else(|| AdminError::not_found(KIND, id))
    }

    pub fn inflight(&self, id: &str) -> Result<usize, AdminError> {
        self.get(id)
            .map(|link| link.inflight())
            .ok_or_else(|| AdminError::not_found(KIND, id))
    }

    /// Get status of all bridges, ordered by id
    pub fn status(&self) -> Vec<BridgeStatus> {
        self.snapshot()
            .iter()
            .map(|link| BridgeStatus {
                id: link.id().to_string(),
                endpoint: link.config.endpoint(),
                connection: link.connection_status(),
                forwarders: link.outbound.len() + link.inbound.len(),
                inflight: link.inflight(),
            })
            .collect()
    }

    pub fn bridge_count(&self) -> usize {
        self.links.read().len()
    }

    pub fn start_all(&self) {
        for link in self.snapshot() {
            link.start();
        }
    }

    pub fn stop_all(&self) {
        for link in self.snapshot() {
            link.stop();
        }
    }

    /// Wait for every bridge to finish its in-flight messages
    pub async fn drain_all(&self, timeout: Duration) -> bool {
        // Collect links first to avoid holding the lock across await
        let links = self.snapshot();
        let mut drained = true;
        for link in links {
            drained &= link.drain(timeout).await;
        }
        drained
    }
}

fn dispatch(forwarders: &[BridgeForwarder], message: &Message, message_id: u64) -> Vec<ForwardHandle> {
    forwarders
        .iter()
        .filter(|f| f.matches(&message.topic))
        .map(|f| {
            let ack = AckToken {
                queue_id: f.id().to_string(),
                message_id,
            };
            f.forward(message.clone(), ack)
        })
        .collect()
}
