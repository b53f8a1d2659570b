//! Bridge Configuration
//!
//! Configuration structures for bridge links and their subscriptions.

use serde::Deserialize;

use crate::error::{AdminError, FieldError};
use crate::topic::validate_topic_filter;

use super::is_valid_id;

/// Destination pattern that forwards a message on its original topic
pub const DEFAULT_DESTINATION_PATTERN: &str = "{#}";

/// Upper bound of `loop_prevention_hop_count`
pub const MAX_HOP_COUNT: u32 = 100;

/// A user property appended to every message forwarded by a subscription
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomUserProperty {
    pub key: String,
    pub value: String,
}

/// A local or remote subscription of a bridge
///
/// Local subscriptions select messages on the local broker to publish on the
/// remote broker; remote subscriptions do the reverse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeSubscription {
    /// Topic filters the subscription listens on
    pub filters: Vec<String>,

    /// Destination topic pattern (`{#}` keeps the original topic)
    #[serde(default = "default_destination")]
    pub destination: String,

    /// Topic filters that are never forwarded
    #[serde(default)]
    pub excludes: Vec<String>,

    /// User properties appended to forwarded messages
    #[serde(default)]
    pub custom_user_properties: Vec<CustomUserProperty>,

    /// Keep the retain flag of retained messages
    #[serde(default)]
    pub preserve_retain: bool,

    /// QoS ceiling for forwarded messages
    #[serde(default = "default_max_qos")]
    pub max_qos: u8,
}

fn default_destination() -> String {
    DEFAULT_DESTINATION_PATTERN.to_string()
}

fn default_max_qos() -> u8 {
    1
}

impl BridgeSubscription {
    /// Subscription on the given filters with default settings
    pub fn new<I, S>(filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filters: filters.into_iter().map(Into::into).collect(),
            destination: default_destination(),
            excludes: Vec::new(),
            custom_user_properties: Vec::new(),
            preserve_retain: false,
            max_qos: default_max_qos(),
        }
    }

    fn validate_into(&self, prefix: &str, errors: &mut Vec<FieldError>) {
        if self.filters.is_empty() {
            errors.push(FieldError::new(
                format!("{}.filters", prefix),
                "At least one topic filter is required",
            ));
        }
        for (i, filter) in self.filters.iter().enumerate() {
            if let Err(e) = validate_topic_filter(filter) {
                errors.push(FieldError::new(format!("{}.filters[{}]", prefix, i), e.to_string()));
            }
        }
        for (i, exclude) in self.excludes.iter().enumerate() {
            if let Err(e) = validate_topic_filter(exclude) {
                errors.push(FieldError::new(
                    format!("{}.excludes[{}]", prefix, i),
                    e.to_string(),
                ));
            }
        }
        if self.destination.is_empty() {
            errors.push(FieldError::new(
                format!("{}.destination", prefix),
                "Destination pattern cannot be empty",
            ));
        }
        if self.max_qos > 2 {
            errors.push(FieldError::new(
                format!("{}.max_qos", prefix),
                "max_qos must be 0, 1, or 2",
            ));
        }
    }
}

/// Configuration for a single bridge link
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Unique bridge id, also substituted for `{bridge.name}` in destinations
    pub id: String,

    /// Remote broker host
    pub host: String,

    /// Remote broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client ID used on the remote broker (defaults to the bridge id)
    #[serde(default)]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,

    /// Session expiry interval in seconds
    #[serde(default = "default_session_expiry")]
    pub session_expiry: u32,

    /// Use clean start (no session persistence)
    #[serde(default = "default_true")]
    pub clean_start: bool,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Tag forwarded messages with a hop count and drop looping ones
    #[serde(default = "default_true")]
    pub loop_prevention_enabled: bool,

    /// Hop count at which a message is no longer forwarded
    #[serde(default = "default_hop_count")]
    pub loop_prevention_hop_count: u32,

    /// Local → remote subscriptions
    #[serde(default)]
    pub local_subscriptions: Vec<BridgeSubscription>,

    /// Remote → local subscriptions
    #[serde(default)]
    pub remote_subscriptions: Vec<BridgeSubscription>,

    /// TLS configuration for the remote connection
    #[serde(default)]
    pub tls: Option<BridgeTlsConfig>,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u16 {
    60
}

fn default_session_expiry() -> u32 {
    3600
}

fn default_hop_count() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            host: "localhost".to_string(),
            port: default_port(),
            client_id: None,
            keep_alive: default_keep_alive(),
            session_expiry: default_session_expiry(),
            clean_start: true,
            username: None,
            password: None,
            loop_prevention_enabled: true,
            loop_prevention_hop_count: default_hop_count(),
            local_subscriptions: Vec::new(),
            remote_subscriptions: Vec::new(),
            tls: None,
        }
    }
}

impl BridgeConfig {
    /// Remote endpoint as `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Client ID to present to the remote broker
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(&self.id)
    }

    /// Check the link for user-correctable mistakes
    pub fn validate(&self) -> Result<(), AdminError> {
        let mut errors = Vec::new();

        if !is_valid_id(&self.id) {
            errors.push(FieldError::new(
                "id",
                "Bridge id must be non-empty and contain only letters, digits, '_' or '-'",
            ));
        }
        if self.host.is_empty() {
            errors.push(FieldError::new("host", "Host cannot be empty"));
        }
        if self.port == 0 {
            errors.push(FieldError::new("port", "Port must be between 1 and 65535"));
        }
        if self.loop_prevention_hop_count > MAX_HOP_COUNT {
            errors.push(FieldError::new(
                "loop_prevention_hop_count",
                format!("Loop prevention hop count must be between 0 and {}", MAX_HOP_COUNT),
            ));
        }
        for (i, sub) in self.local_subscriptions.iter().enumerate() {
            sub.validate_into(&format!("local_subscriptions[{}]", i), &mut errors);
        }
        for (i, sub) in self.remote_subscriptions.iter().enumerate() {
            sub.validate_into(&format!("remote_subscriptions[{}]", i), &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AdminError::Validation(errors))
        }
    }
}

/// TLS configuration for bridge connections
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BridgeTlsConfig {
    /// Path to CA certificate file (PEM format)
    pub ca_cert: Option<String>,

    /// Path to client certificate file (PEM format)
    pub client_cert: Option<String>,

    /// Path to client private key file (PEM format)
    pub client_key: Option<String>,

    /// Skip server certificate verification (insecure, for testing only)
    #[serde(default)]
    pub insecure: bool,

    /// Server name for SNI (defaults to the host)
    pub server_name: Option<String>,
}
