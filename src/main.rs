//! EdgeBridge - MQTT edge gateway
//!
//! Usage:
//!   edgebridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   --check                Validate the configuration and exit
//!   -h, --help             Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{debug, error, info, trace, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use edgebridge::adapter::{simulation, AdapterServices, BasicSchemaValidator, ProtocolAdapterRegistry};
use edgebridge::bridge::{AckToken, BridgeManager, DryRunRemote, ForwardingServices, PassThrough};
use edgebridge::config::Config;
use edgebridge::local::LocalBroker;
use edgebridge::metrics::Metrics;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// EdgeBridge - MQTT edge gateway
#[derive(Parser, Debug)]
#[command(name = "edgebridge")]
#[command(author = "EdgeBridge Contributors")]
#[command(version)]
#[command(about = "MQTT edge gateway: bridges and protocol adapters")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, default_value = "edgebridge.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    // RUST_LOG directives refine the chosen level
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(log_level.to_tracing_level()).into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.check {
        println!(
            "Configuration {:?} is valid: {} bridge(s), {} adapter(s)",
            args.config,
            config.bridge.len(),
            config.adapter.len()
        );
        return Ok(());
    }

    info!("Starting EdgeBridge");
    info!("  Configuration: {:?}", args.config);
    info!("  Drain timeout: {:?}", config.forwarding.drain_timeout);

    let metrics = Metrics::new()?;
    let runtime = tokio::runtime::Handle::current();
    let local = Arc::new(LocalBroker::default());

    let forwarding = ForwardingServices {
        interceptor: Arc::new(PassThrough),
        callback: Arc::new(|ack: AckToken, permanent: bool| {
            trace!(
                "Acknowledged message {} of queue '{}' (permanent failure: {})",
                ack.message_id,
                ack.queue_id,
                permanent
            );
        }),
        metrics: metrics.clone(),
        runtime: runtime.clone(),
    };
    let bridges = Arc::new(BridgeManager::new(
        local.clone(),
        forwarding,
        config.forwarding.drain_timeout,
    ));
    local.attach_bridges(&bridges);

    info!("  Bridges: {} configured", config.bridge.len());
    for bridge in &config.bridge {
        info!(
            "    - {} -> {} ({} local, {} remote subscription(s))",
            bridge.id,
            bridge.endpoint(),
            bridge.local_subscriptions.len(),
            bridge.remote_subscriptions.len()
        );
        let remote = Arc::new(DryRunRemote::new(&bridge.id, bridge.endpoint()));
        if let Err(e) = bridges.add_bridge(bridge.clone(), remote).await {
            error!("Bridge '{}' not started: {}", bridge.id, e);
        }
    }

    let registry = ProtocolAdapterRegistry::new(
        AdapterServices {
            publish: local.clone(),
            metrics: metrics.clone(),
            runtime,
        },
        Arc::new(BasicSchemaValidator),
    );
    registry.register_type(simulation::descriptor())?;

    info!("  Adapters: {} configured", config.adapter.len());
    for adapter in &config.adapter {
        info!("    - {} ({})", adapter.id, adapter.adapter_type);
        if let Err(e) = registry
            .add_instance(&adapter.adapter_type, &adapter.id, adapter.config.clone())
            .await
        {
            error!("Adapter '{}' not started: {}", adapter.id, e);
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    registry.shutdown().await;
    bridges.stop_all();
    if !bridges.drain_all(config.forwarding.drain_timeout).await {
        error!("Shut down with messages still in flight");
    }

    match metrics.encode() {
        Ok(text) => debug!("Final metrics:\n{}", text),
        Err(e) => error!("Could not encode metrics: {}", e),
    }

    Ok(())
}
