//! Bridge Interceptors
//!
//! Extensibility point invoked for every message a forwarder is about to
//! publish. An interceptor may rewrite the message or drop it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::Message;

use super::forwarder::Direction;

/// Interceptor error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptorError {
    #[error("Internal error: {0}")]
    Internal(String),
}

/// What a forwarder should do with an intercepted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptOutcome {
    /// Do not forward the message
    Drop,
    /// Forward the (possibly rewritten) message
    Success(Message),
}

/// Information about the bridge a message is travelling through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeContext {
    pub bridge_id: String,
    pub direction: Direction,
}

/// Outbound interception hook
///
/// The default implementation forwards every message unchanged.
#[async_trait]
pub trait BridgeInterceptor: Send + Sync {
    /// Called with the already transformed message, before it is published
    ///
    /// # Returns
    /// * `Ok(InterceptOutcome::Success(msg))` - publish `msg`
    /// * `Ok(InterceptOutcome::Drop)` - complete the message without publishing
    /// * `Err(_)` - treated as a publish failure
    async fn intercept_outbound(
        &self,
        message: Message,
        _context: &BridgeContext,
    ) -> Result<InterceptOutcome, InterceptorError> {
        Ok(InterceptOutcome::Success(message))
    }
}

/// Interceptor that forwards everything unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

#[async_trait]
impl BridgeInterceptor for PassThrough {}

#[async_trait]
impl<T: BridgeInterceptor + ?Sized> BridgeInterceptor for Arc<T> {
    async fn intercept_outbound(
        &self,
        message: Message,
        context: &BridgeContext,
    ) -> Result<InterceptOutcome, InterceptorError> {
        (**self).intercept_outbound(message, context).await
    }
}

/// Runs interceptors in order, feeding each the previous one's output
///
/// The first `Drop` or error ends the chain.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: Vec<Box<dyn BridgeInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I: BridgeInterceptor + 'static>(&mut self, interceptor: I) {
        self.interceptors.push(Box::new(interceptor));
    }

    pub fn with<I: BridgeInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.add(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

#[async_trait]
impl BridgeInterceptor for InterceptorChain {
    async fn intercept_outbound(
        &self,
        message: Message,
        context: &BridgeContext,
    ) -> Result<InterceptOutcome, InterceptorError> {
        let mut current = message;
        for interceptor in &self.interceptors {
            match interceptor.intercept_outbound(current, context).await? {
                InterceptOutcome::Drop => return Ok(InterceptOutcome::Drop),
                InterceptOutcome::Success(next) => current = next,
            }
        }
        Ok(InterceptOutcome::Success(current))
    }
}
