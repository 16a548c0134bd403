//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the runtime with mock implementations.

use crate::session::{ExecutionError, TransportError};
use crate::transcript::{AgentEvent, Turn};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Items yielded by an agent stream
pub type AgentEventStream = BoxStream<'static, Result<AgentEvent, TransportError>>;

/// One open agent stream
pub struct AgentSubscription {
    pub events: AgentEventStream,
    cancel: CancellationToken,
}

impl AgentSubscription {
    pub fn new(events: AgentEventStream) -> Self {
        Self {
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` so the producer can observe `close()`
    pub fn with_cancel(events: AgentEventStream, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Idempotent cancellation
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Source of agent turns
#[async_trait]
pub trait AgentStream: Send + Sync {
    /// Open a stream that continues the conversation in `prior_turns`
    async fn open(&self, prior_turns: Vec<Turn>) -> Result<AgentSubscription, TransportError>;
}

/// Executor for tools approved by the user
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `tool_name`; the token fires when the session is reset
    async fn execute(
        &self,
        tool_name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: AgentStream + ?Sized> AgentStream for Arc<T> {
    async fn open(&self, prior_turns: Vec<Turn>) -> Result<AgentSubscription, TransportError> {
        (**self).open(prior_turns).await
    }
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(
        &self,
        tool_name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        (**self).execute(tool_name, input, cancel).await
    }
}
