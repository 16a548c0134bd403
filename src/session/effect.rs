//! Effects produced by session operations

use crate::transcript::{SubscriptionId, Turn};
use serde_json::Value;

/// I/O the runtime performs after a session operation
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new agent stream seeded with the transcript so far
    OpenStream {
        subscription: SubscriptionId,
        prior_turns: Vec<Turn>,
    },

    /// Cancel an agent stream subscription (idempotent)
    CloseStream { subscription: SubscriptionId },

    /// Run an approved tool and report the outcome back
    ExecuteTool {
        call_id: String,
        tool_name: String,
        input: Value,
    },

    /// Abort every running tool execution; their results will be stale
    CancelTools,
}

impl Effect {
    pub fn execute_tool(call_id: impl Into<String>, tool_name: String, input: Value) -> Self {
        Effect::ExecuteTool {
            call_id: call_id.into(),
            tool_name,
            input,
        }
    }
}
