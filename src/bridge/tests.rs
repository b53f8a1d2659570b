//! Bridge Module Tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::config::{BridgeConfig, BridgeSubscription, CustomUserProperty};
use crate::error::{AdminError, PublishError};
use crate::metrics::Metrics;
use crate::protocol::{Message, QoS, UserProperty};
use crate::status::ConnectionStatus;

use super::*;

// =============================================================================
// Test doubles
// =============================================================================

/// Target recording everything published to it
struct RecordingTarget {
    name: String,
    connected: AtomicBool,
    fail: AtomicBool,
    /// When set, each publish waits for a permit
    gate: Option<Semaphore>,
    published: Mutex<Vec<Message>>,
}

impl RecordingTarget {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            connected: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            gate: None,
            published: Mutex::new(Vec::new()),
        })
    }

    fn gated(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            connected: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            gate: Some(Semaphore::new(0)),
            published: Mutex::new(Vec::new()),
        })
    }

    fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    fn published(&self) -> Vec<Message> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl ForwardTarget for RecordingTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, message: Message) -> Result<(), PublishError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected("quota exceeded".to_string()));
        }
        self.published.lock().push(message);
        Ok(())
    }
}

struct DropInterceptor;

#[async_trait]
impl BridgeInterceptor for DropInterceptor {
    async fn intercept_outbound(
        &self,
        _message: Message,
        _context: &BridgeContext,
    ) -> Result<InterceptOutcome, InterceptorError> {
        Ok(InterceptOutcome::Drop)
    }
}

struct FailingInterceptor;

#[async_trait]
impl BridgeInterceptor for FailingInterceptor {
    async fn intercept_outbound(
        &self,
        _message: Message,
        _context: &BridgeContext,
    ) -> Result<InterceptOutcome, InterceptorError> {
        Err(InterceptorError::Internal("policy engine unavailable".to_string()))
    }
}

type Completions = Arc<Mutex<Vec<(AckToken, bool)>>>;

struct Harness {
    services: ForwardingServices,
    completions: Completions,
    metrics: Metrics,
}

impl Harness {
    fn new() -> Self {
        Self::with_interceptor(Arc::new(PassThrough))
    }

    fn with_interceptor(interceptor: Arc<dyn BridgeInterceptor>) -> Self {
        let completions: Completions = Arc::new(Mutex::new(Vec::new()));
        let recorded = completions.clone();
        let metrics = Metrics::new().unwrap();
        let services = ForwardingServices {
            interceptor,
            callback: Arc::new(move |ack: AckToken, permanent: bool| {
                recorded.lock().push((ack, permanent));
            }),
            metrics: metrics.clone(),
            runtime: Handle::current(),
        };
        Self {
            services,
            completions,
            metrics,
        }
    }

    fn forwarder(
        &self,
        bridge: &BridgeConfig,
        subscription: &BridgeSubscription,
        target: Arc<RecordingTarget>,
    ) -> BridgeForwarder {
        let forwarder =
            BridgeForwarder::new(bridge, Direction::Outbound, 0, subscription, target, &self.services)
                .unwrap();
        forwarder.start();
        forwarder
    }

    fn completions(&self) -> Vec<(AckToken, bool)> {
        self.completions.lock().clone()
    }

    fn outbound(&self, bridge: &str) -> crate::metrics::BridgeMetrics {
        self.metrics.bridge(bridge, "outbound")
    }
}

fn bridge(id: &str) -> BridgeConfig {
    BridgeConfig {
        id: id.to_string(),
        host: "remote.example.com".to_string(),
        local_subscriptions: vec![BridgeSubscription::new(["#"])],
        ..Default::default()
    }
}

fn ack(id: u64) -> AckToken {
    AckToken {
        queue_id: "b1-outbound-0".to_string(),
        message_id: id,
    }
}

// =============================================================================
// Forwarding scenarios
// =============================================================================

#[tokio::test]
async fn test_fresh_message_gets_hop_count_one() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());

    let outcome = fwd
        .forward(Message::new("sensors/temp", "21.5", QoS::AtLeastOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(outcome, ForwardOutcome::Forwarded);
    let published = target.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].user_property(HOP_COUNT_PROPERTY), Some("1"));
    assert_eq!(h.completions(), vec![(ack(1), false)]);
}

#[tokio::test]
async fn test_hop_limit_reached_is_dropped_before_publish() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());
    let before = fwd.inflight();

    let msg = Message::new("sensors/temp", "21.5", QoS::AtLeastOnce)
        .with_user_property(HOP_COUNT_PROPERTY, "1");
    let outcome = fwd.forward(msg, ack(1)).outcome().await;

    assert_eq!(outcome, ForwardOutcome::Dropped(DropReason::LoopPrevention));
    assert_eq!(fwd.inflight(), before);
    assert!(target.published().is_empty());
    assert_eq!(h.completions(), vec![(ack(1), false)]);
    assert_eq!(h.outbound("b1").loop_prevention_drops.get(), 1);
}

#[tokio::test]
async fn test_passthrough_keeps_topic() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["sensors/#"]), target.clone());

    fwd.forward(Message::new("sensors/temp", "x", QoS::AtMostOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(target.published()[0].topic, "sensors/temp");
}

#[tokio::test]
async fn test_qos_capped_by_ceiling() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let sub = BridgeSubscription {
        max_qos: 1,
        ..BridgeSubscription::new(["#"])
    };
    let fwd = h.forwarder(&bridge("b1"), &sub, target.clone());

    fwd.forward(Message::new("a", "x", QoS::ExactlyOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(target.published()[0].qos, QoS::AtLeastOnce);
}

#[tokio::test]
async fn test_destination_pattern_and_properties() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let sub = BridgeSubscription {
        destination: "edge/{bridge.name}/{#}".to_string(),
        custom_user_properties: vec![CustomUserProperty {
            key: "site".to_string(),
            value: "plant-7".to_string(),
        }],
        ..BridgeSubscription::new(["sensors/#"])
    };
    let fwd = h.forwarder(&bridge("b1"), &sub, target.clone());

    let msg = Message::new("sensors/temp", "x", QoS::AtLeastOnce)
        .with_user_property("origin", "plc-1")
        .with_user_property(HOP_COUNT_PROPERTY, "0");
    fwd.forward(msg, ack(1)).outcome().await;

    let published = target.published();
    assert_eq!(published[0].topic, "edge/b1/sensors/temp");
    assert_eq!(
        published[0].user_properties,
        vec![
            UserProperty::new("origin", "plc-1"),
            UserProperty::new("site", "plant-7"),
            UserProperty::new(HOP_COUNT_PROPERTY, "1"),
        ]
    );
}

#[tokio::test]
async fn test_retain_cleared_unless_preserved() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let cleared = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());
    cleared
        .forward(Message::new("a", "x", QoS::AtMostOnce).with_retain(true), ack(1))
        .outcome()
        .await;

    let preserving = BridgeSubscription {
        preserve_retain: true,
        ..BridgeSubscription::new(["#"])
    };
    let kept = h.forwarder(&bridge("b2"), &preserving, target.clone());
    kept.forward(Message::new("a", "x", QoS::AtMostOnce).with_retain(true), ack(2))
        .outcome()
        .await;

    let published = target.published();
    assert!(!published[0].retain);
    assert!(published[1].retain);
}

#[tokio::test]
async fn test_loop_prevention_disabled_adds_no_hop_count() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let config = BridgeConfig {
        loop_prevention_enabled: false,
        ..bridge("b1")
    };
    let fwd = h.forwarder(&config, &BridgeSubscription::new(["#"]), target.clone());

    let msg = Message::new("a", "x", QoS::AtMostOnce).with_user_property(HOP_COUNT_PROPERTY, "9");
    let outcome = fwd.forward(msg, ack(1)).outcome().await;

    assert_eq!(outcome, ForwardOutcome::Forwarded);
    assert_eq!(target.published()[0].user_property(HOP_COUNT_PROPERTY), None);
}

#[tokio::test]
async fn test_excluded_topic_never_forwarded() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let sub = BridgeSubscription {
        excludes: vec!["sensors/debug/#".to_string()],
        ..BridgeSubscription::new(["sensors/#"])
    };
    let fwd = h.forwarder(&bridge("b1"), &sub, target.clone());

    let outcome = fwd
        .forward(Message::new("sensors/debug/trace", "x", QoS::AtMostOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(outcome, ForwardOutcome::Excluded);
    assert!(target.published().is_empty());
    assert_eq!(h.completions(), vec![(ack(1), false)]);
    assert_eq!(h.outbound("b1").excluded.get(), 1);
}

#[tokio::test]
async fn test_excluded_topic_never_forwarded_without_loop_prevention() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let sub = BridgeSubscription {
        excludes: vec!["sensors/debug/#".to_string()],
        ..BridgeSubscription::new(["sensors/#"])
    };
    let config = BridgeConfig {
        loop_prevention_enabled: false,
        ..bridge("b1")
    };
    let fwd = h.forwarder(&config, &sub, target.clone());

    let outcome = fwd
        .forward(Message::new("sensors/debug/trace", "x", QoS::AtMostOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(outcome, ForwardOutcome::Excluded);
    assert!(target.published().is_empty());
    assert_eq!(h.completions(), vec![(ack(1), false)]);
    assert_eq!(h.outbound("b1").excluded.get(), 1);
}

#[tokio::test]
async fn test_stopped_forwarder_completes_as_permanent_failure() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());
    fwd.stop();

    let outcome = fwd
        .forward(Message::new("a", "x", QoS::AtMostOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(outcome, ForwardOutcome::Dropped(DropReason::Stopped));
    assert_eq!(fwd.inflight(), 0);
    assert_eq!(h.completions(), vec![(ack(1), true)]);
}

#[tokio::test]
async fn test_disconnected_target_drops_without_error() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    target.connected.store(false, Ordering::SeqCst);
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());

    let outcome = fwd
        .forward(Message::new("a", "x", QoS::AtMostOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(outcome, ForwardOutcome::Dropped(DropReason::Disconnected));
    assert_eq!(h.outbound("b1").forward_failed.get(), 0);
    assert_eq!(h.completions(), vec![(ack(1), false)]);
}

#[tokio::test]
async fn test_publish_failure_counted_and_completed() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    target.fail.store(true, Ordering::SeqCst);
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());

    let outcome = fwd
        .forward(Message::new("a", "x", QoS::AtMostOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(outcome, ForwardOutcome::Failed);
    assert_eq!(h.outbound("b1").forward_failed.get(), 1);
    assert_eq!(h.completions(), vec![(ack(1), false)]);
    assert_eq!(fwd.inflight(), 0);
}

#[tokio::test]
async fn test_transform_failure_counted_and_completed() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let sub = BridgeSubscription {
        destination: "out/{4}".to_string(),
        ..BridgeSubscription::new(["#"])
    };
    let fwd = h.forwarder(&bridge("b1"), &sub, target.clone());

    let outcome = fwd
        .forward(Message::new("a/b", "x", QoS::AtMostOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(outcome, ForwardOutcome::Failed);
    assert!(target.published().is_empty());
    assert_eq!(h.outbound("b1").forward_failed.get(), 1);
    assert_eq!(h.completions(), vec![(ack(1), false)]);
}

#[tokio::test]
async fn test_interceptor_drop() {
    let h = Harness::with_interceptor(Arc::new(DropInterceptor));
    let target = RecordingTarget::new("remote");
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());

    let outcome = fwd
        .forward(Message::new("a", "x", QoS::AtMostOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(outcome, ForwardOutcome::Dropped(DropReason::Interceptor));
    assert!(target.published().is_empty());
    assert_eq!(h.completions(), vec![(ack(1), false)]);
}

#[tokio::test]
async fn test_interceptor_error_is_a_failure() {
    let h = Harness::with_interceptor(Arc::new(FailingInterceptor));
    let target = RecordingTarget::new("remote");
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());

    let outcome = fwd
        .forward(Message::new("a", "x", QoS::AtMostOnce), ack(1))
        .outcome()
        .await;

    assert_eq!(outcome, ForwardOutcome::Failed);
    assert_eq!(h.outbound("b1").forward_failed.get(), 1);
    assert_eq!(h.completions(), vec![(ack(1), false)]);
}

#[tokio::test]
async fn test_aborted_publish_still_completes_once() {
    let h = Harness::new();
    let target = RecordingTarget::gated("remote");
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());

    let handle = fwd.forward(Message::new("a", "x", QoS::AtMostOnce), ack(1));
    assert_eq!(fwd.inflight(), 1);
    let ForwardHandle::Pending(task) = handle else {
        panic!("publish should be pending");
    };
    task.abort();
    let _ = task.await;

    assert_eq!(fwd.inflight(), 0);
    assert_eq!(h.completions(), vec![(ack(1), false)]);
    assert_eq!(h.outbound("b1").forward_failed.get(), 1);
}

#[tokio::test]
async fn test_drain_waits_for_inflight() {
    let h = Harness::new();
    let target = RecordingTarget::gated("remote");
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());

    let handles: Vec<_> = (0..3)
        .map(|i| fwd.forward(Message::new("a", "x", QoS::AtMostOnce), ack(i)))
        .collect();
    assert_eq!(fwd.inflight(), 3);
    fwd.stop();

    assert!(!fwd.drain(Duration::from_millis(30)).await);
    target.release(3);
    assert!(fwd.drain(Duration::from_secs(2)).await);

    for handle in handles {
        assert_eq!(handle.outcome().await, ForwardOutcome::Forwarded);
    }
    assert_eq!(h.completions().len(), 3);
}

#[tokio::test]
async fn test_concurrent_forwards_complete_exactly_once() {
    let h = Harness::new();
    let target = RecordingTarget::new("remote");
    let fwd = h.forwarder(&bridge("b1"), &BridgeSubscription::new(["#"]), target.clone());

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let msg = Message::new("a", "x", QoS::AtMostOnce);
            let msg = if i % 5 == 0 {
                msg.with_user_property(HOP_COUNT_PROPERTY, "3")
            } else {
                msg
            };
            fwd.forward(msg, ack(i))
        })
        .collect();
    for handle in handles {
        handle.outcome().await;
    }

    let mut ids: Vec<u64> = h.completions().iter().map(|(a, _)| a.message_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..50).collect::<Vec<_>>());
    assert_eq!(target.published().len(), 40);
    assert_eq!(fwd.inflight(), 0);
}

#[tokio::test]
async fn test_invalid_qos_ceiling_rejected_at_build() {
    let h = Harness::new();
    let sub = BridgeSubscription {
        max_qos: 3,
        ..BridgeSubscription::new(["#"])
    };
    let result = BridgeForwarder::new(
        &bridge("b1"),
        Direction::Outbound,
        0,
        &sub,
        RecordingTarget::new("remote"),
        &h.services,
    );
    assert!(matches!(result, Err(crate::error::TransformError::InvalidQos(3))));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_qos_is_min_of_original_and_ceiling(original in 0u8..=2, ceiling in 0u8..=2) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let published = rt.block_on(async {
                let h = Harness::new();
                let target = RecordingTarget::new("remote");
                let sub = BridgeSubscription {
                    max_qos: ceiling,
                    ..BridgeSubscription::new(["#"])
                };
                let fwd = h.forwarder(&bridge("b1"), &sub, target.clone());
                let qos = QoS::from_u8(original).unwrap();
                fwd.forward(Message::new("a", "x", qos), ack(1)).outcome().await;
                target.published()
            });
            prop_assert_eq!(published[0].qos.as_u8(), original.min(ceiling));
        }
    }
}

// =============================================================================
// Bridge manager
// =============================================================================

fn manager(h: &Harness, local: Arc<RecordingTarget>) -> BridgeManager {
    BridgeManager::new(local, h.services.clone(), Duration::from_secs(1))
}

#[tokio::test]
async fn test_manager_add_and_forward_local() {
    let h = Harness::new();
    let mgr = manager(&h, RecordingTarget::new("local"));
    let remote = RecordingTarget::new("remote");

    mgr.add_bridge(bridge("b1"), remote.clone()).await.unwrap();
    assert_eq!(mgr.bridge_count(), 1);
    assert!(mgr.should_forward("any/topic"));

    let handles = mgr.forward_local(&Message::new("a/b", "x", QoS::AtMostOnce), 7);
    assert_eq!(handles.len(), 1);
    for handle in handles {
        assert_eq!(handle.outcome().await, ForwardOutcome::Forwarded);
    }
    assert_eq!(remote.published().len(), 1);
    assert_eq!(
        h.completions(),
        vec![(
            AckToken {
                queue_id: "b1-outbound-0".to_string(),
                message_id: 7
            },
            false
        )]
    );
}

#[tokio::test]
async fn test_manager_duplicate_bridge_rejected() {
    let h = Harness::new();
    let mgr = manager(&h, RecordingTarget::new("local"));
    mgr.add_bridge(bridge("b1"), RecordingTarget::new("r1")).await.unwrap();

    let err = mgr
        .add_bridge(bridge("b1"), RecordingTarget::new("r2"))
        .await
        .unwrap_err();
    assert_eq!(err, AdminError::duplicate("bridge", "b1"));
    assert_eq!(mgr.get("b1").unwrap().remote().name(), "r1");
}

#[tokio::test]
async fn test_manager_invalid_bridge_rejected() {
    let h = Harness::new();
    let mgr = manager(&h, RecordingTarget::new("local"));
    let config = BridgeConfig {
        local_subscriptions: vec![BridgeSubscription::new(["a/#/b"])],
        ..bridge("b1")
    };

    let err = mgr
        .add_bridge(config, RecordingTarget::new("remote"))
        .await
        .unwrap_err();
    let AdminError::Validation(fields) = err else {
        panic!("expected validation error");
    };
    assert_eq!(fields[0].field, "local_subscriptions[0].filters[0]");
    assert_eq!(mgr.bridge_count(), 0);
}

#[tokio::test]
async fn test_manager_malformed_bridge_id_rejected() {
    let h = Harness::new();
    let mgr = manager(&h, RecordingTarget::new("local"));
    let config = BridgeConfig {
        local_subscriptions: vec![BridgeSubscription {
            destination: "{bridge.name}/{#}".to_string(),
            ..BridgeSubscription::new(["#"])
        }],
        ..bridge("edge/+")
    };
    assert!(config.validate().is_err());

    let err = mgr
        .add_bridge(config, RecordingTarget::new("remote"))
        .await
        .unwrap_err();
    let AdminError::Validation(fields) = err else {
        panic!("expected validation error");
    };
    assert_eq!(fields[0].field, "id");
    assert_eq!(mgr.bridge_count(), 0);
}

#[tokio::test]
async fn test_manager_inbound_goes_to_local() {
    let h = Harness::new();
    let local = RecordingTarget::new("local");
    let mgr = manager(&h, local.clone());
    let config = BridgeConfig {
        remote_subscriptions: vec![BridgeSubscription {
            destination: "from/{bridge.name}/{#}".to_string(),
            ..BridgeSubscription::new(["cmd/#"])
        }],
        ..bridge("b1")
    };
    mgr.add_bridge(config, RecordingTarget::new("remote")).await.unwrap();

    let handles = mgr
        .forward_remote("b1", &Message::new("cmd/reboot", "now", QoS::AtLeastOnce), 1)
        .unwrap();
    for handle in handles {
        handle.outcome().await;
    }

    let delivered = local.published();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].topic, "from/b1/cmd/reboot");
    assert!(matches!(
        mgr.forward_remote("nope", &Message::default(), 2),
        Err(AdminError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_manager_update_replaces_subscriptions() {
    let h = Harness::new();
    let mgr = manager(&h, RecordingTarget::new("local"));
    let remote = RecordingTarget::new("remote");
    mgr.add_bridge(bridge("b1"), remote.clone()).await.unwrap();

    let updated = BridgeConfig {
        local_subscriptions: vec![BridgeSubscription::new(["only/this"])],
        ..bridge("b1")
    };
    mgr.update_bridge(updated, remote.clone()).await.unwrap();

    assert!(mgr.forward_local(&Message::new("other", "x", QoS::AtMostOnce), 1).is_empty());
    assert_eq!(
        mgr.forward_local(&Message::new("only/this", "x", QoS::AtMostOnce), 2).len(),
        1
    );

    let err = mgr
        .update_bridge(bridge("missing"), remote)
        .await
        .unwrap_err();
    assert_eq!(err, AdminError::not_found("bridge", "missing"));
}

#[tokio::test]
async fn test_manager_delete_and_status() {
    let h = Harness::new();
    let mgr = manager(&h, RecordingTarget::new("local"));
    let remote = RecordingTarget::new("remote");
    mgr.add_bridge(bridge("b2"), remote.clone()).await.unwrap();
    mgr.add_bridge(bridge("b1"), RecordingTarget::new("other")).await.unwrap();
    remote.connected.store(false, Ordering::SeqCst);

    let status = mgr.status();
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].id, "b1");
    assert_eq!(status[1].connection, ConnectionStatus::Disconnected);
    assert_eq!(mgr.connection_status("b1").unwrap(), ConnectionStatus::Connected);

    mgr.delete_bridge("b2").await.unwrap();
    assert_eq!(mgr.bridge_count(), 1);
    assert!(mgr.connection_status("b2").is_err());
    assert_eq!(
        mgr.delete_bridge("b2").await.unwrap_err(),
        AdminError::not_found("bridge", "b2")
    );
}

#[tokio::test]
async fn test_manager_stop_all_returns_messages() {
    let h = Harness::new();
    let mgr = manager(&h, RecordingTarget::new("local"));
    mgr.add_bridge(bridge("b1"), RecordingTarget::new("remote")).await.unwrap();

    mgr.stop_all();
    let outcomes: Vec<_> = mgr.forward_local(&Message::new("a", "x", QoS::AtMostOnce), 1);
    for handle in outcomes {
        assert_eq!(handle.outcome().await, ForwardOutcome::Dropped(DropReason::Stopped));
    }
    assert!(mgr.drain_all(Duration::from_millis(100)).await);
    assert!(h.completions()[0].1);

    mgr.start_all();
    let handles = mgr.forward_local(&Message::new("a", "x", QoS::AtMostOnce), 2);
    assert_eq!(handles.len(), 1);
}
