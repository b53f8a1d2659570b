//! Hop-count based loop prevention
//!
//! Every bridge with loop prevention enabled tags forwarded messages with a
//! hop-count user property. A message whose hop count reached the bridge's
//! limit is dropped before anything else happens to it.

use prometheus::IntCounter;
use tracing::debug;

use crate::protocol::Message;

use super::HOP_COUNT_PROPERTY;

/// Outcome of a loop-prevention check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    Allow,
    Drop,
}

/// Drop/allow decision for one bridge
#[derive(Clone)]
pub struct LoopPreventionGuard {
    enabled: bool,
    hop_limit: u32,
    drops: IntCounter,
}

impl LoopPreventionGuard {
    pub fn new(enabled: bool, hop_limit: u32, drops: IntCounter) -> Self {
        Self {
            enabled,
            hop_limit,
            drops,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Pure decision: drop iff enabled, hop count > 0, and hop count >= limit.
    ///
    /// A message without hops is never dropped, whatever the limit.
    pub fn evaluate(hop_count: u32, enabled: bool, limit: u32) -> LoopDecision {
        if enabled && hop_count > 0 && hop_count >= limit {
            LoopDecision::Drop
        } else {
            LoopDecision::Allow
        }
    }

    /// Evaluate against this bridge's settings, counting drops
    pub fn check(&self, hop_count: u32) -> LoopDecision {
        let decision = Self::evaluate(hop_count, self.enabled, self.hop_limit);
        if decision == LoopDecision::Drop {
            self.drops.inc();
        }
        decision
    }

    /// Hop count carried by `message`
    ///
    /// Missing or non-numeric metadata counts as 0; always 0 while loop
    /// prevention is disabled.
    pub fn extract_hop_count(&self, message: &Message) -> u32 {
        if !self.enabled {
            return 0;
        }
        match message.user_property(HOP_COUNT_PROPERTY) {
            None => 0,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                debug!(
                    "Hop count could not be determined, user property '{}' is not a number: '{}'",
                    HOP_COUNT_PROPERTY, raw
                );
                0
            }),
        }
    }
}
