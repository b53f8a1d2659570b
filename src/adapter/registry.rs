//! Protocol Adapter Registry
//!
//! Holds the registered adapter types and supervises adapter instances.
//! Instance lifecycle operations are serialised by an admin lock so at most
//! one handler per instance id is ever running; reads go through a
//! `RwLock`ed map and may observe a slightly stale view.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::is_valid_id;
use crate::error::{AdminError, FieldError};
use crate::status::ConnectionStatus;

use super::schema::SchemaValidator;
use super::{
    AdapterServices, AdapterTypeDescriptor, DiscoveryInput, NodeTree, ProtocolAdapter,
};

const INSTANCE: &str = "adapter";
const TYPE: &str = "adapter type";

/// Runtime information about an adapter instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterRuntimeInfo {
    /// Milliseconds since the epoch of the last start attempt
    pub last_start_attempt: Option<u64>,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub connection: ConnectionStatus,
}

/// An adapter instance as seen by the administrative layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub type_id: String,
    pub config: serde_json::Value,
    pub runtime: AdapterRuntimeInfo,
}

#[derive(Debug, Default)]
struct RuntimeState {
    last_start_attempt: Option<u64>,
    error_count: u64,
    last_error: Option<String>,
}

struct AdapterInstance {
    id: String,
    type_id: String,
    config: serde_json::Value,
    adapter: Arc<dyn ProtocolAdapter>,
    runtime: Mutex<RuntimeState>,
}

impl AdapterInstance {
    fn info(&self) -> AdapterInfo {
        let state = self.runtime.lock();
        AdapterInfo {
            id: self.id.clone(),
            type_id: self.type_id.clone(),
            config: self.config.clone(),
            runtime: AdapterRuntimeInfo {
                last_start_attempt: state.last_start_attempt,
                error_count: state.error_count,
                last_error: state.last_error.clone(),
                connection: self.adapter.status(),
            },
        }
    }

    fn record_error(&self, message: String) {
        let mut state = self.runtime.lock();
        state.error_count += 1;
        state.last_error = Some(message);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Registry of adapter types and instances
pub struct ProtocolAdapterRegistry {
    types: DashMap<String, AdapterTypeDescriptor>,
    instances: RwLock<HashMap<String, Arc<AdapterInstance>>>,
    /// Serialises add/update/delete/shutdown
    admin: tokio::sync::Mutex<()>,
    validator: Arc<dyn SchemaValidator>,
    services: AdapterServices,
}

impl ProtocolAdapterRegistry {
    pub fn new(services: AdapterServices, validator: Arc<dyn SchemaValidator>) -> Self {
        Self {
            types: DashMap::new(),
            instances: RwLock::new(HashMap::new()),
            admin: tokio::sync::Mutex::new(()),
            validator,
            services,
        }
    }

    /// Register an adapter kind; a protocol id can only be registered once
    pub fn register_type(&self, descriptor: AdapterTypeDescriptor) -> Result<(), AdminError> {
        match self.types.entry(descriptor.protocol_id.clone()) {
            Entry::Occupied(_) => Err(AdminError::TypeAlreadyRegistered(descriptor.protocol_id)),
            Entry::Vacant(slot) => {
                info!(
                    "Registered protocol adapter type '{}' ({} {})",
                    descriptor.protocol_id, descriptor.name, descriptor.version
                );
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    pub fn get_type(&self, type_id: &str) -> Option<AdapterTypeDescriptor> {
        self.types.get(type_id).map(|d| d.value().clone())
    }

    /// All registered types, ordered by protocol id
    pub fn list_types(&self) -> Vec<AdapterTypeDescriptor> {
        let mut types: Vec<_> = self.types.iter().map(|d| d.value().clone()).collect();
        types.sort_by(|a, b| a.protocol_id.cmp(&b.protocol_id));
        types
    }

    fn get(&self, id: &str) -> Result<Arc<AdapterInstance>, AdminError> {
        self.instances
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AdminError::not_found(INSTANCE, id))
    }

    fn validate(&self, descriptor: &AdapterTypeDescriptor, config: &serde_json::Value) -> Result<(), AdminError> {
        let violations = self.validator.validate(config, &descriptor.config_schema);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(AdminError::Validation(
                violations.into_iter().map(FieldError::from).collect(),
            ))
        }
    }

    fn create(
        &self,
        descriptor: &AdapterTypeDescriptor,
        id: &str,
        config: serde_json::Value,
    ) -> Result<Arc<AdapterInstance>, AdminError> {
        let adapter = descriptor
            .factory
            .create(id, &config, &self.services)
            .map_err(|e| AdminError::Adapter(e.to_string()))?;
        Ok(Arc::new(AdapterInstance {
            id: id.to_string(),
            type_id: descriptor.protocol_id.clone(),
            config,
            adapter,
            runtime: Mutex::new(RuntimeState::default()),
        }))
    }

    /// Start an instance; a failed start is recorded, not returned
    async fn start(&self, instance: &AdapterInstance) {
        instance.runtime.lock().last_start_attempt = Some(now_millis());
        match instance.adapter.start().await {
            Ok(()) => info!("Adapter '{}': started", instance.id),
            Err(e) => {
                error!("Adapter '{}': failed to start: {}", instance.id, e);
                instance.record_error(e.to_string());
            }
        }
    }

    async fn stop(&self, instance: &AdapterInstance) {
        if let Err(e) = instance.adapter.stop().await {
            warn!("Adapter '{}': failed to stop cleanly: {}", instance.id, e);
            instance.record_error(e.to_string());
        }
    }

    /// Create and start a new adapter instance
    pub async fn add_instance(
        &self,
        type_id: &str,
        id: &str,
        config: serde_json::Value,
    ) -> Result<(), AdminError> {
        let _admin = self.admin.lock().await;

        if self.instances.read().contains_key(id) {
            return Err(AdminError::duplicate(INSTANCE, id));
        }
        if !is_valid_id(id) {
            return Err(AdminError::validation(
                "id",
                "Adapter id must be non-empty and contain only letters, digits, '_' or '-'",
            ));
        }
        let descriptor = self
            .get_type(type_id)
            .ok_or_else(|| AdminError::UnknownType(type_id.to_string()))?;
        self.validate(&descriptor, &config)?;

        let instance = self.create(&descriptor, id, config)?;
        self.instances
            .write()
            .insert(id.to_string(), instance.clone());
        self.start(&instance).await;
        info!("Added protocol adapter of type '{}' with id '{}'", type_id, id);
        Ok(())
    }

    /// Replace the configuration of an instance
    ///
    /// The old handler is fully stopped before the new one starts.
    pub async fn update_instance(&self, id: &str, config: serde_json::Value) -> Result<(), AdminError> {
        let _admin = self.admin.lock().await;

        let old = self.get(id)?;
        let descriptor = self
            .get_type(&old.type_id)
            .ok_or_else(|| AdminError::UnknownType(old.type_id.clone()))?;
        self.validate(&descriptor, &config)?;
        let instance = self.create(&descriptor, id, config)?;

        self.stop(&old).await;
        self.instances
            .write()
            .insert(id.to_string(), instance.clone());
        self.start(&instance).await;
        info!("Updated protocol adapter '{}'", id);
        Ok(())
    }

    /// Stop and remove an instance
    pub async fn delete_instance(&self, id: &str) -> Result<(), AdminError> {
        let _admin = self.admin.lock().await;

        let instance = self.get(id)?;
        self.stop(&instance).await;
        self.instances.write().remove(id);
        info!("Deleted protocol adapter '{}'", id);
        Ok(())
    }

    pub fn connection_status(&self, id: &str) -> Result<ConnectionStatus, AdminError> {
        Ok(self.get(id)?.adapter.status())
    }

    /// Browse the data points of an instance
    ///
    /// A missing or non-positive depth browses one level.
    pub async fn discover(
        &self,
        id: &str,
        root_node: Option<String>,
        depth: Option<i64>,
    ) -> Result<NodeTree, AdminError> {
        let instance = self.get(id)?;
        let input = DiscoveryInput::new(root_node, depth);
        debug!(
            "Adapter '{}': discovering from {:?} with depth {}",
            id, input.root_node, input.depth
        );
        instance
            .adapter
            .discover_values(&input)
            .await
            .map_err(|e| AdminError::Adapter(e.to_string()))
    }

    pub fn adapter(&self, id: &str) -> Result<Arc<dyn ProtocolAdapter>, AdminError> {
        Ok(self.get(id)?.adapter.clone())
    }

    pub fn instance_info(&self, id: &str) -> Result<AdapterInfo, AdminError> {
        Ok(self.get(id)?.info())
    }

    fn snapshot(&self) -> Vec<Arc<AdapterInstance>> {
        let mut instances: Vec<_> = self.instances.read().values().cloned().collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }

    /// All instances, ordered by id
    pub fn list_instances(&self) -> Vec<AdapterInfo> {
        self.snapshot().iter().map(|i| i.info()).collect()
    }

    pub fn list_instances_for_type(&self, type_id: &str) -> Result<Vec<AdapterInfo>, AdminError> {
        if !self.types.contains_key(type_id) {
            return Err(AdminError::not_found(TYPE, type_id));
        }
        Ok(self
            .snapshot()
            .iter()
            .filter(|i| i.type_id == type_id)
            .map(|i| i.info())
            .collect())
    }

    /// Connection status of every instance, ordered by id
    pub fn status_all(&self) -> Vec<(String, ConnectionStatus)> {
        self.snapshot()
            .iter()
            .map(|i| (i.id.clone(), i.adapter.status()))
            .collect()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Stop and remove every instance
    pub async fn shutdown(&self) {
        let _admin = self.admin.lock().await;

        let instances: Vec<_> = self.instances.write().drain().map(|(_, i)| i).collect();
        for instance in instances {
            self.stop(&instance).await;
            debug!("Adapter '{}': stopped for shutdown", instance.id);
        }
    }
}
