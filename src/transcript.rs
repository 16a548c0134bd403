//! Conversation transcript
//!
//! The ordered log of turns and the single-writer store that applies agent
//! stream events to it.

pub mod event;
mod store;
pub mod types;

pub use event::{AgentEvent, SubscriptionId};
pub use store::{TranscriptError, TranscriptStore};
pub use types::{
    Approval, Part, Role, TextPart, ToolInvocationPart, ToolState, Turn, TurnId, DENIED_BY_USER,
    INTERRUPTED,
};
