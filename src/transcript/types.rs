//! Transcript data types

use super::event::SubscriptionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Error text recorded when the user refuses a gated tool call
pub const DENIED_BY_USER: &str = "denied by user";

/// Error text recorded on calls left open when their stream ended
pub const INTERRUPTED: &str = "interrupted: the agent stream ended before this call completed";

/// Opaque turn identifier, stable for the turn's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(String);

impl TurnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for a locally created turn
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Lifecycle of a tool invocation.
///
/// Ordered: `InputStreaming < InputAvailable < {OutputAvailable, OutputError}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    /// Arguments still arriving
    InputStreaming,
    /// Arguments complete, not yet executed
    InputAvailable,
    /// Result produced
    OutputAvailable,
    /// Execution failed, was denied, or was interrupted
    OutputError,
}

impl ToolState {
    fn rank(self) -> u8 {
        match self {
            ToolState::InputStreaming => 0,
            ToolState::InputAvailable => 1,
            ToolState::OutputAvailable | ToolState::OutputError => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether moving from `self` to `next` keeps the lifecycle strictly forward.
    /// Re-sending `InputStreaming` is allowed so partial arguments can grow.
    pub fn can_advance_to(self, next: ToolState) -> bool {
        next.rank() > self.rank()
            || (self == ToolState::InputStreaming && next == ToolState::InputStreaming)
    }

    pub fn label(self) -> &'static str {
        match self {
            ToolState::InputStreaming => "input-streaming",
            ToolState::InputAvailable => "input-available",
            ToolState::OutputAvailable => "output-available",
            ToolState::OutputError => "output-error",
        }
    }
}

impl fmt::Display for ToolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Human decision recorded on a gated call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    Approved,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationPart {
    pub tool_name: String,
    pub call_id: String,
    pub state: ToolState,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,
}

impl ToolInvocationPart {
    pub fn new(
        tool_name: impl Into<String>,
        call_id: impl Into<String>,
        state: ToolState,
        input: Value,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            call_id: call_id.into(),
            state,
            input,
            output: None,
            error_text: None,
            approval: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.state = ToolState::OutputAvailable;
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error_text: impl Into<String>) -> Self {
        self.state = ToolState::OutputError;
        self.error_text = Some(error_text.into());
        self
    }

    pub(crate) fn complete(&mut self, output: Value) {
        self.state = ToolState::OutputAvailable;
        self.output = Some(output);
    }

    pub(crate) fn fail(&mut self, error_text: impl Into<String>) {
        self.state = ToolState::OutputError;
        self.error_text = Some(error_text.into());
    }
}

/// A content unit within a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text(TextPart),
    ToolInvocation(ToolInvocationPart),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(TextPart { text: text.into() })
    }

    pub fn as_tool(&self) -> Option<&ToolInvocationPart> {
        match self {
            Part::ToolInvocation(tool) => Some(tool),
            Part::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(part) => Some(&part.text),
            Part::ToolInvocation(_) => None,
        }
    }
}

/// One conversational entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
    /// No parts may be appended once set
    pub finalized: bool,
    /// Stream that produced this turn; `None` for locally created turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionId>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: TurnId::generate(),
            role: Role::User,
            parts: vec![Part::text(text)],
            created_at: Utc::now(),
            finalized: true,
            subscription: None,
        }
    }

    pub fn tool_parts(&self) -> impl Iterator<Item = &ToolInvocationPart> {
        self.parts.iter().filter_map(Part::as_tool)
    }

    pub(crate) fn tool_parts_mut(&mut self) -> impl Iterator<Item = &mut ToolInvocationPart> {
        self.parts.iter_mut().filter_map(|part| match part {
            Part::ToolInvocation(tool) => Some(tool),
            Part::Text(_) => None,
        })
    }

    /// Concatenated text parts, in display order
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
