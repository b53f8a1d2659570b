//! Prometheus metrics for bridges and protocol adapters
//!
//! `Metrics` owns the registry and the labelled counter families. Each
//! forwarder and adapter gets its own handle (`BridgeMetrics`,
//! `AdapterMetrics`) cut from those families, so no component touches a
//! global registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Registry and counter families for the whole process
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Bridge forwarding, labelled by bridge id and direction
    bridge_received: IntCounterVec,
    bridge_forward_success: IntCounterVec,
    bridge_forward_failed: IntCounterVec,
    bridge_loop_prevention_drops: IntCounterVec,
    bridge_excluded: IntCounterVec,
    bridge_intercept_dropped: IntCounterVec,
    bridge_disconnected_drops: IntCounterVec,

    // Adapter publishing, labelled by adapter id
    adapter_publish_success: IntCounterVec,
    adapter_publish_failed: IntCounterVec,
    adapter_subscription_keepalive: IntCounterVec,
    adapter_subscription_transfer_failed: IntCounterVec,
}

/// Counters for one forwarder (one bridge, one direction)
#[derive(Clone)]
pub struct BridgeMetrics {
    pub received: IntCounter,
    pub forward_success: IntCounter,
    pub forward_failed: IntCounter,
    pub loop_prevention_drops: IntCounter,
    pub excluded: IntCounter,
    pub intercept_dropped: IntCounter,
    pub disconnected_drops: IntCounter,
}

/// Counters for one adapter instance
#[derive(Clone)]
pub struct AdapterMetrics {
    pub publish_success: IntCounter,
    pub publish_failed: IntCounter,
    pub subscription_keepalive: IntCounter,
    pub subscription_transfer_failed: IntCounter,
}

const BRIDGE_LABELS: &[&str] = &["bridge", "direction"];
const ADAPTER_LABELS: &[&str] = &["adapter"];

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, prometheus::Error> {
    let vec = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        Ok(Self {
            bridge_received: counter_vec(
                &registry,
                "edgebridge_bridge_messages_received_total",
                "Messages handed to a bridge forwarder",
                BRIDGE_LABELS,
            )?,
            bridge_forward_success: counter_vec(
                &registry,
                "edgebridge_bridge_forward_success_total",
                "Messages successfully published by a bridge forwarder",
                BRIDGE_LABELS,
            )?,
            bridge_forward_failed: counter_vec(
                &registry,
                "edgebridge_bridge_forward_failed_total",
                "Messages a bridge forwarder failed to transform or publish",
                BRIDGE_LABELS,
            )?,
            bridge_loop_prevention_drops: counter_vec(
                &registry,
                "edgebridge_bridge_loop_prevention_drops_total",
                "Messages dropped because the hop limit was reached",
                BRIDGE_LABELS,
            )?,
            bridge_excluded: counter_vec(
                &registry,
                "edgebridge_bridge_excluded_total",
                "Messages skipped by an exclude filter",
                BRIDGE_LABELS,
            )?,
            bridge_intercept_dropped: counter_vec(
                &registry,
                "edgebridge_bridge_intercept_dropped_total",
                "Messages dropped by a bridge interceptor",
                BRIDGE_LABELS,
            )?,
            bridge_disconnected_drops: counter_vec(
                &registry,
                "edgebridge_bridge_disconnected_drops_total",
                "Messages dropped because the destination was disconnected",
                BRIDGE_LABELS,
            )?,
            adapter_publish_success: counter_vec(
                &registry,
                "edgebridge_adapter_publish_success_total",
                "Adapter values published to the local broker",
                ADAPTER_LABELS,
            )?,
            adapter_publish_failed: counter_vec(
                &registry,
                "edgebridge_adapter_publish_failed_total",
                "Adapter values that could not be published",
                ADAPTER_LABELS,
            )?,
            adapter_subscription_keepalive: counter_vec(
                &registry,
                "edgebridge_adapter_subscription_keepalive_total",
                "Field-protocol subscription keep-alives observed",
                ADAPTER_LABELS,
            )?,
            adapter_subscription_transfer_failed: counter_vec(
                &registry,
                "edgebridge_adapter_subscription_transfer_failed_total",
                "Field-protocol subscription transfers that failed",
                ADAPTER_LABELS,
            )?,
            registry,
        })
    }

    /// Counter handles for one bridge forwarder
    pub fn bridge(&self, bridge_id: &str, direction: &str) -> BridgeMetrics {
        let labels = [bridge_id, direction];
        BridgeMetrics {
            received: self.bridge_received.with_label_values(&labels),
            forward_success: self.bridge_forward_success.with_label_values(&labels),
            forward_failed: self.bridge_forward_failed.with_label_values(&labels),
            loop_prevention_drops: self.bridge_loop_prevention_drops.with_label_values(&labels),
            excluded: self.bridge_excluded.with_label_values(&labels),
            intercept_dropped: self.bridge_intercept_dropped.with_label_values(&labels),
            disconnected_drops: self.bridge_disconnected_drops.with_label_values(&labels),
        }
    }

    /// Counter handles for one adapter instance
    pub fn adapter(&self, adapter_id: &str) -> AdapterMetrics {
        let labels = [adapter_id];
        AdapterMetrics {
            publish_success: self.adapter_publish_success.with_label_values(&labels),
            publish_failed: self.adapter_publish_failed.with_label_values(&labels),
            subscription_keepalive: self.adapter_subscription_keepalive.with_label_values(&labels),
            subscription_transfer_failed: self
                .adapter_subscription_transfer_failed
                .with_label_values(&labels),
        }
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
