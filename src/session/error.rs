//! Session error taxonomy

use crate::transcript::ToolState;
use thiserror::Error;

/// Errors surfaced by session operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Invalid caller input; the action is ignored
    #[error("Invalid input: {0}")]
    Validation(String),
    /// No pending call matches the id
    #[error("No pending tool call with id {call_id}")]
    NotFound { call_id: String },
    /// The call already moved past `input-available` or carries a decision
    #[error("Tool call {call_id} was already resolved (state: {state})")]
    AlreadyResolved { call_id: String, state: ToolState },
    /// The agent stream failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    pub fn validation(message: impl Into<String>) -> Self {
        SessionError::Validation(message.into())
    }

    /// Confirmation races that callers may drop silently
    pub fn is_stale_resolution(&self) -> bool {
        matches!(
            self,
            SessionError::NotFound { .. } | SessionError::AlreadyResolved { .. }
        )
    }
}

/// Agent stream interruption
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Agent stream failed: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Tool execution failure after approval; recorded inline as `output-error`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
