//! Incremental events produced by an agent stream

use super::types::{Part, Role, TurnId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifies one agent stream subscription within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Events yielded by an agent stream. Every event names the turn it targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentEvent {
    TurnOpened {
        turn_id: TurnId,
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created_at: Option<DateTime<Utc>>,
    },
    PartAppended {
        turn_id: TurnId,
        part: Part,
    },
    /// Replaces the part at `index` (text growth or tool state advance)
    PartUpdated {
        turn_id: TurnId,
        index: usize,
        part: Part,
    },
    TurnFinalized {
        turn_id: TurnId,
    },
    /// Any shape this client does not understand
    #[serde(other)]
    Unknown,
}

impl AgentEvent {
    /// Decode a wire event, mapping malformed payloads to `Unknown`
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Unrecognized agent event");
            AgentEvent::Unknown
        })
    }

    pub fn turn_id(&self) -> Option<&TurnId> {
        match self {
            AgentEvent::TurnOpened { turn_id, .. }
            | AgentEvent::PartAppended { turn_id, .. }
            | AgentEvent::PartUpdated { turn_id, .. }
            | AgentEvent::TurnFinalized { turn_id } => Some(turn_id),
            AgentEvent::Unknown => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::TurnOpened { .. } => "turn-opened",
            AgentEvent::PartAppended { .. } => "part-appended",
            AgentEvent::PartUpdated { .. } => "part-updated",
            AgentEvent::TurnFinalized { .. } => "turn-finalized",
            AgentEvent::Unknown => "unknown",
        }
    }
}
