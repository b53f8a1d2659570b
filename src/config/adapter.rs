//! Protocol adapter instance configuration.

use serde::Deserialize;

/// One configured adapter instance
///
/// `config` is kept opaque here; it is validated against the adapter type's
/// schema and converted by the type's factory when the instance is added.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterInstanceConfig {
    /// Protocol id of the adapter type (e.g. `simulation`)
    #[serde(rename = "type")]
    pub adapter_type: String,

    /// Unique instance id
    pub id: String,

    /// Type-specific configuration object
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
