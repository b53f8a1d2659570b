//! Bridge Forwarder
//!
//! One forwarder per bridge subscription. Receipt (running check, loop
//! prevention, excludes, transform) happens synchronously on the caller;
//! interception and the publish to the target run on a spawned task.
//!
//! Every message handed to `forward` is completed exactly once through the
//! `ForwardCallback`, whatever branch it takes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus::IntCounter;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::{BridgeConfig, BridgeSubscription, CustomUserProperty};
use crate::error::{PublishError, TransformError};
use crate::metrics::{BridgeMetrics, Metrics};
use crate::protocol::{Message, QoS, UserProperty};
use crate::topic::topic_matches_filter;

use super::interceptor::{BridgeContext, BridgeInterceptor, InterceptOutcome};
use super::loop_guard::{LoopDecision, LoopPreventionGuard};
use super::remapper::TopicRemapper;
use super::remote::ForwardTarget;
use super::{BRIDGE_NAME_TOKEN, HOP_COUNT_PROPERTY};

/// Identifies a message towards the source that handed it over
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken {
    /// Queue (forwarder) the message was consumed from
    pub queue_id: String,
    pub message_id: u64,
}

/// Completion notification for forwarded messages
///
/// Called exactly once per message. `permanent_failure` is only set when
/// the forwarder was not running; the source should then keep the message
/// for a later attempt instead of acknowledging it.
pub trait ForwardCallback: Send + Sync {
    fn on_complete(&self, ack: AckToken, permanent_failure: bool);
}

impl<F> ForwardCallback for F
where
    F: Fn(AckToken, bool) + Send + Sync,
{
    fn on_complete(&self, ack: AckToken, permanent_failure: bool) {
        self(ack, permanent_failure)
    }
}

/// Direction a forwarder moves messages in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local broker to remote broker
    Outbound,
    /// Remote broker to local broker
    Inbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Stopped,
    LoopPrevention,
    Interceptor,
    Disconnected,
}

/// Terminal outcome of one forwarded message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Forwarded,
    Dropped(DropReason),
    Excluded,
    Failed,
}

/// Result of `BridgeForwarder::forward`
///
/// Messages that end during receipt complete immediately; the others finish
/// on a spawned task.
#[derive(Debug)]
pub enum ForwardHandle {
    Completed(ForwardOutcome),
    Pending(JoinHandle<ForwardOutcome>),
}

impl ForwardHandle {
    /// Wait for the terminal outcome
    pub async fn outcome(self) -> ForwardOutcome {
        match self {
            ForwardHandle::Completed(outcome) => outcome,
            ForwardHandle::Pending(handle) => handle.await.unwrap_or(ForwardOutcome::Failed),
        }
    }
}

/// Shared collaborators injected into every forwarder
#[derive(Clone)]
pub struct ForwardingServices {
    pub interceptor: Arc<dyn BridgeInterceptor>,
    pub callback: Arc<dyn ForwardCallback>,
    pub metrics: Metrics,
    pub runtime: Handle,
}

/// Completes a message exactly once
///
/// Dropping an unfinished completion (task aborted, runtime shut down,
/// panic) completes the message as failed.
struct Completion {
    ack: Option<AckToken>,
    callback: Arc<dyn ForwardCallback>,
    inflight: Arc<AtomicUsize>,
    failed: IntCounter,
}

impl Completion {
    fn finish(mut self) {
        self.complete();
    }

    fn complete(&mut self) {
        if let Some(ack) = self.ack.take() {
            self.inflight.fetch_sub(1, Ordering::AcqRel);
            self.callback.on_complete(ack, false);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(ack) = &self.ack {
            warn!(
                "Forwarder '{}': message {} abandoned before completion",
                ack.queue_id, ack.message_id
            );
            self.failed.inc();
            self.complete();
        }
    }
}

struct Inner {
    id: String,
    bridge_id: String,
    direction: Direction,
    filters: Vec<String>,
    excludes: Vec<String>,
    remapper: TopicRemapper,
    max_qos: QoS,
    preserve_retain: bool,
    custom_user_properties: Vec<CustomUserProperty>,
    guard: LoopPreventionGuard,
    target: Arc<dyn ForwardTarget>,
    interceptor: Arc<dyn BridgeInterceptor>,
    callback: Arc<dyn ForwardCallback>,
    metrics: BridgeMetrics,
    runtime: Handle,
    running: AtomicBool,
    inflight: Arc<AtomicUsize>,
}

/// Forwards the messages of one bridge subscription to its target
pub struct BridgeForwarder {
    inner: Arc<Inner>,
}

impl BridgeForwarder {
    /// Build a stopped forwarder for `subscription` of `bridge`
    ///
    /// `index` is the position of the subscription within its direction and
    /// becomes part of the forwarder id (`<bridge>-<direction>-<index>`).
    pub fn new(
        bridge: &BridgeConfig,
        direction: Direction,
        index: usize,
        subscription: &BridgeSubscription,
        target: Arc<dyn ForwardTarget>,
        services: &ForwardingServices,
    ) -> Result<Self, TransformError> {
        let max_qos = QoS::from_u8(subscription.max_qos)
            .ok_or(TransformError::InvalidQos(subscription.max_qos))?;
        let remapper = TopicRemapper::new(&subscription.destination)?;
        let metrics = services.metrics.bridge(&bridge.id, direction.as_str());
        let guard = LoopPreventionGuard::new(
            bridge.loop_prevention_enabled,
            bridge.loop_prevention_hop_count,
            metrics.loop_prevention_drops.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                id: format!("{}-{}-{}", bridge.id, direction, index),
                bridge_id: bridge.id.clone(),
                direction,
                filters: subscription.filters.clone(),
                excludes: subscription.excludes.clone(),
                remapper,
                max_qos,
                preserve_retain: subscription.preserve_retain,
                custom_user_properties: subscription.custom_user_properties.clone(),
                guard,
                target,
                interceptor: services.interceptor.clone(),
                callback: services.callback.clone(),
                metrics,
                runtime: services.runtime.clone(),
                running: AtomicBool::new(false),
                inflight: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn bridge_id(&self) -> &str {
        &self.inner.bridge_id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Topic filters this forwarder consumes
    pub fn topics(&self) -> &[String] {
        &self.inner.filters
    }

    /// Whether `topic` is covered by one of the subscription filters
    pub fn matches(&self, topic: &str) -> bool {
        self.inner
            .filters
            .iter()
            .any(|filter| topic_matches_filter(topic, filter))
    }

    pub fn target(&self) -> &Arc<dyn ForwardTarget> {
        &self.inner.target
    }

    pub fn start(&self) {
        self.inner.running.store(true, Ordering::Release);
        debug!("Forwarder '{}': started", self.inner.id);
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        debug!("Forwarder '{}': stopped", self.inner.id);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Messages received but not yet completed
    pub fn inflight(&self) -> usize {
        self.inner.inflight.load(Ordering::Acquire)
    }

    /// Wait until no message is in flight
    ///
    /// Returns false if messages were still in flight when `timeout` elapsed.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            while self.inflight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                "Forwarder '{}': {} message(s) still in flight after {:?}",
                self.inner.id,
                self.inflight(),
                timeout
            );
        }
        drained
    }

    /// Forward one message
    pub fn forward(&self, message: Message, ack: AckToken) -> ForwardHandle {
        let inner = &self.inner;
        inner.metrics.received.inc();

        if !self.is_running() {
            trace!(
                "Forwarder '{}': not running, returning message on '{}'",
                inner.id,
                message.topic
            );
            inner.callback.on_complete(ack, true);
            return ForwardHandle::Completed(ForwardOutcome::Dropped(DropReason::Stopped));
        }

        inner.inflight.fetch_add(1, Ordering::AcqRel);
        let completion = Completion {
            ack: Some(ack),
            callback: inner.callback.clone(),
            inflight: inner.inflight.clone(),
            failed: inner.metrics.forward_failed.clone(),
        };

        let hop_count = inner.guard.extract_hop_count(&message);
        if inner.guard.check(hop_count) == LoopDecision::Drop {
            debug!(
                "Message on topic '{}' ignored for bridge '{}', max hop count exceeded",
                message.topic, inner.bridge_id
            );
            completion.finish();
            return ForwardHandle::Completed(ForwardOutcome::Dropped(DropReason::LoopPrevention));
        }

        if inner
            .excludes
            .iter()
            .any(|exclude| topic_matches_filter(&message.topic, exclude))
        {
            inner.metrics.excluded.inc();
            completion.finish();
            return ForwardHandle::Completed(ForwardOutcome::Excluded);
        }

        let original_topic = message.topic.clone();
        let candidate = match inner.transform(message, hop_count) {
            Ok(candidate) => candidate,
            Err(e) => {
                inner.forward_failed(&original_topic, &e);
                completion.finish();
                return ForwardHandle::Completed(ForwardOutcome::Failed);
            }
        };

        let task = self.inner.clone();
        ForwardHandle::Pending(
            inner
                .runtime
                .spawn(async move { task.deliver(candidate, original_topic, completion).await }),
        )
    }
}

impl Inner {
    /// Build the message that goes to the target
    fn transform(&self, message: Message, hop_count: u32) -> Result<Message, TransformError> {
        let topic = self
            .remapper
            .apply(&message.topic, &[(BRIDGE_NAME_TOKEN, self.bridge_id.as_str())])?;
        let qos = message.qos.min(self.max_qos);
        let retain = self.preserve_retain && message.retain;

        let mut user_properties: Vec<UserProperty> = message
            .user_properties
            .into_iter()
            .filter(|p| p.name != HOP_COUNT_PROPERTY)
            .collect();
        user_properties.extend(
            self.custom_user_properties
                .iter()
                .map(|p| UserProperty::new(&p.key, &p.value)),
        );
        if self.guard.enabled() {
            user_properties.push(UserProperty::new(
                HOP_COUNT_PROPERTY,
                hop_count.saturating_add(1).to_string(),
            ));
        }

        Ok(Message {
            topic,
            qos,
            retain,
            user_properties,
            ..message
        })
    }

    async fn deliver(
        &self,
        candidate: Message,
        original_topic: String,
        completion: Completion,
    ) -> ForwardOutcome {
        let context = BridgeContext {
            bridge_id: self.bridge_id.clone(),
            direction: self.direction,
        };

        let outcome = match self.interceptor.intercept_outbound(candidate, &context).await {
            Ok(InterceptOutcome::Drop) => {
                self.metrics.intercept_dropped.inc();
                ForwardOutcome::Dropped(DropReason::Interceptor)
            }
            Ok(InterceptOutcome::Success(message)) => self.publish(message, &original_topic).await,
            Err(e) => {
                self.forward_failed(&original_topic, &PublishError::Interceptor(e.to_string()));
                ForwardOutcome::Failed
            }
        };

        completion.finish();
        outcome
    }

    async fn publish(&self, message: Message, original_topic: &str) -> ForwardOutcome {
        if !self.target.is_connected() {
            trace!(
                "Forwarder '{}': cannot send publish to disconnected target '{}', finishing",
                self.id,
                self.target.name()
            );
            self.metrics.disconnected_drops.inc();
            return ForwardOutcome::Dropped(DropReason::Disconnected);
        }

        match self.target.publish(message).await {
            Ok(()) => {
                self.metrics.forward_success.inc();
                ForwardOutcome::Forwarded
            }
            Err(e) => {
                self.forward_failed(original_topic, &e);
                ForwardOutcome::Failed
            }
        }
    }

    fn forward_failed(&self, topic: &str, reason: &dyn fmt::Display) {
        self.metrics.forward_failed.inc();
        warn!(
            "Unable to forward message on topic '{}' for bridge '{}', reason: {}",
            topic, self.bridge_id, reason
        );
    }
}
