//! Presentation adapter
//!
//! Maps a transcript and its derived status to render-ready rows. Pure: the
//! turns are only read, and nothing here can fail or block the session.

pub mod markdown;

use crate::session::SessionStatus;
use crate::tracker::ConfirmationPolicy;
use crate::transcript::{Part, Role, ToolInvocationPart, Turn, TurnId};
use chrono::{DateTime, FixedOffset};
use markdown::StyledLine;
use serde_json::Value;

pub const WELCOME_TITLE: &str = "Welcome to Recipe Assistant";
pub const WELCOME_HINT: &str =
    "Tell me what ingredients you have and I'll suggest something to cook.";
pub const PLACEHOLDER_AWAITING: &str = "Please respond to the tool confirmation above...";
pub const PLACEHOLDER_DEFAULT: &str = "Type your ingredients...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// A tool invocation as shown inline in a message
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCard {
    pub call_id: String,
    pub tool_name: String,
    pub state_label: &'static str,
    pub input: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub needs_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(Vec<StyledLine>),
    Tool(ToolCard),
}

/// One message bubble
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub turn_id: TurnId,
    pub role: Role,
    pub align: Align,
    pub timestamp: String,
    pub blocks: Vec<Block>,
    /// Still being produced by the agent
    pub streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputState {
    pub enabled: bool,
    pub placeholder: &'static str,
    pub send_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderModel {
    pub rows: Vec<MessageRow>,
    /// No turns yet; show the welcome card
    pub empty_state: bool,
    pub input: InputState,
    pub stop_enabled: bool,
    pub clear_enabled: bool,
    /// Turn to keep in view after this render
    pub scroll_to: Option<TurnId>,
}

/// Build the render model.
///
/// `now` fixes the display time zone; turns from another day also show
/// their date.
pub fn render(
    turns: &[Turn],
    status: SessionStatus,
    draft: &str,
    policy: &ConfirmationPolicy,
    now: DateTime<FixedOffset>,
) -> RenderModel {
    let enabled = status.accepts_input();
    RenderModel {
        rows: turns.iter().map(|turn| row(turn, policy, now)).collect(),
        empty_state: turns.is_empty(),
        input: InputState {
            enabled,
            placeholder: if enabled {
                PLACEHOLDER_DEFAULT
            } else {
                PLACEHOLDER_AWAITING
            },
            send_enabled: enabled && !draft.trim().is_empty(),
        },
        stop_enabled: status == SessionStatus::Streaming,
        clear_enabled: !turns.is_empty(),
        scroll_to: turns.last().map(|turn| turn.id.clone()),
    }
}

fn row(turn: &Turn, policy: &ConfirmationPolicy, now: DateTime<FixedOffset>) -> MessageRow {
    let blocks = turn
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::Text(text) if text.text.trim().is_empty() => None,
            Part::Text(text) => Some(Block::Text(markdown::to_lines(&text.text))),
            Part::ToolInvocation(tool) => Some(Block::Tool(tool_card(tool, policy))),
        })
        .collect();

    MessageRow {
        turn_id: turn.id.clone(),
        role: turn.role,
        align: if turn.role == Role::User {
            Align::Right
        } else {
            Align::Left
        },
        timestamp: timestamp(turn.created_at.with_timezone(&now.timezone()), now),
        blocks,
        streaming: !turn.finalized,
    }
}

fn timestamp(at: DateTime<FixedOffset>, now: DateTime<FixedOffset>) -> String {
    if at.date_naive() == now.date_naive() {
        at.format("%H:%M").to_string()
    } else {
        at.format("%b %d %H:%M").to_string()
    }
}

fn tool_card(tool: &ToolInvocationPart, policy: &ConfirmationPolicy) -> ToolCard {
    ToolCard {
        call_id: tool.call_id.clone(),
        tool_name: tool.tool_name.clone(),
        state_label: tool.state.label(),
        input: compact(&tool.input),
        output: tool.output.as_ref().map(compact),
        error: tool.error_text.clone(),
        needs_confirmation: policy.is_pending(tool),
    }
}

/// Strings render bare; everything else as compact JSON
fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
