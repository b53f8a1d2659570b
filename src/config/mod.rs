//! Configuration Module
//!
//! TOML-based configuration for EdgeBridge:
//! - Logging
//! - Forwarding (drain behaviour)
//! - Bridge links and their subscriptions
//! - Protocol adapter instances
//! - Environment variable overrides (EDGEBRIDGE__* prefix)

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

pub use adapter::AdapterInstanceConfig;
pub use bridge::{
    BridgeConfig, BridgeSubscription, BridgeTlsConfig, CustomUserProperty,
    DEFAULT_DESTINATION_PATTERN, MAX_HOP_COUNT,
};

mod adapter;
mod bridge;


fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("env var pattern is valid")
    })
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("id pattern is valid"))
}

/// Check a bridge or adapter id: non-empty, ASCII letters, digits, `_` and `-`
pub fn is_valid_id(id: &str) -> bool {
    id_pattern().is_match(id)
}

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .to_string()
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Forwarding engine configuration
    pub forwarding: ForwardingConfig,
    /// Bridge links
    pub bridge: Vec<BridgeConfig>,
    /// Protocol adapter instances
    pub adapter: Vec<AdapterInstanceConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Forwarding engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardingConfig {
    /// How long a stopped forwarder waits for in-flight messages
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply `EDGEBRIDGE__*`
    /// environment overrides. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("forwarding.drain_timeout", "5s")?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys (EDGEBRIDGE__LOG__LEVEL)
        let cfg = builder
            .add_source(
                Environment::with_prefix("EDGEBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a string (no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut bridge_ids = HashSet::new();
        for bridge in &self.bridge {
            if !bridge_ids.insert(bridge.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate bridge id '{}'",
                    bridge.id
                )));
            }
            bridge.validate().map_err(|e| {
                ConfigError::Validation(format!("Bridge '{}': {}", bridge.id, e))
            })?;
        }

        let mut adapter_ids = HashSet::new();
        for adapter in &self.adapter {
            if !is_valid_id(&adapter.id) {
                return Err(ConfigError::Validation(format!(
                    "Adapter id '{}' must be non-empty and contain only letters, digits, '_' or '-'",
                    adapter.id
                )));
            }
            if !adapter_ids.insert(adapter.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate adapter id '{}'",
                    adapter.id
                )));
            }
        }

        Ok(())
    }
}
