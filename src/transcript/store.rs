//! Transcript store
//!
//! Single-writer owner of the turn log. Every mutation goes through
//! `append_user_turn`, `apply_agent_event`, the tool write-back helpers, or
//! `reset`, and each one either applies fully or leaves the log untouched.

use super::event::{AgentEvent, SubscriptionId};
use super::types::{Part, Role, ToolInvocationPart, ToolState, Turn, TurnId, INTERRUPTED};
use chrono::Utc;
use thiserror::Error;

/// Reasons an operation was rejected without mutating the transcript
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("Message text is empty")]
    EmptyText,
    #[error("Unknown turn: {0}")]
    UnknownTurn(TurnId),
    #[error("Turn already exists: {0}")]
    DuplicateTurn(TurnId),
    #[error("Turn {turn_id} belongs to another stream")]
    ForeignTurn { turn_id: TurnId },
    #[error("Turn {0} is finalized")]
    TurnFinalized(TurnId),
    #[error("Turn {turn_id} has no part at index {index}")]
    PartOutOfRange { turn_id: TurnId, index: usize },
    #[error("Part kind changed at index {index} of turn {turn_id}")]
    PartKindChanged { turn_id: TurnId, index: usize },
    #[error("Text update at index {index} of turn {turn_id} does not extend the existing text")]
    TextNotExtended { turn_id: TurnId, index: usize },
    #[error("Tool call {call_id} already exists")]
    DuplicateCallId { call_id: String },
    #[error("Tool call {call_id} changed name or id in an update")]
    ToolIdentityChanged { call_id: String },
    #[error("Tool call {call_id} cannot move from {from} to {to}")]
    BackwardsState {
        call_id: String,
        from: ToolState,
        to: ToolState,
    },
}

/// Ordered log of conversation turns
#[derive(Debug, Clone, Default)]
pub struct TranscriptStore {
    turns: Vec<Turn>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the log, in display order
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turn(&self, id: &TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| &t.id == id)
    }

    /// Append a finalized user turn holding a single text part
    pub fn append_user_turn(&mut self, text: &str) -> Result<TurnId, TranscriptError> {
        if text.trim().is_empty() {
            return Err(TranscriptError::EmptyText);
        }
        let turn = Turn::user(text);
        let id = turn.id.clone();
        self.turns.push(turn);
        Ok(id)
    }

    /// Apply one event from the stream `subscription`.
    ///
    /// `Unknown` events are accepted and ignored. A rejected event leaves the
    /// transcript exactly as it was.
    pub fn apply_agent_event(
        &mut self,
        subscription: SubscriptionId,
        event: AgentEvent,
    ) -> Result<(), TranscriptError> {
        match event {
            AgentEvent::TurnOpened {
                turn_id,
                role,
                created_at,
            } => {
                if self.turn(&turn_id).is_some() {
                    return Err(TranscriptError::DuplicateTurn(turn_id));
                }
                self.turns.push(Turn {
                    id: turn_id,
                    role,
                    parts: Vec::new(),
                    created_at: created_at.unwrap_or_else(Utc::now),
                    finalized: false,
                    subscription: Some(subscription),
                });
                Ok(())
            }
            AgentEvent::PartAppended { turn_id, mut part } => {
                if let Part::ToolInvocation(tool) = &mut part {
                    if self.find_tool(&tool.call_id).is_some() {
                        return Err(TranscriptError::DuplicateCallId {
                            call_id: tool.call_id.clone(),
                        });
                    }
                    // Only a human decision sets approval
                    tool.approval = None;
                }
                let turn = self.open_turn_mut(subscription, &turn_id)?;
                turn.parts.push(part);
                Ok(())
            }
            AgentEvent::PartUpdated {
                turn_id,
                index,
                part,
            } => {
                let turn = self.open_turn_mut(subscription, &turn_id)?;
                let existing = turn
                    .parts
                    .get_mut(index)
                    .ok_or_else(|| TranscriptError::PartOutOfRange {
                        turn_id: turn_id.clone(),
                        index,
                    })?;
                replace_part(existing, part, &turn_id, index)
            }
            AgentEvent::TurnFinalized { turn_id } => {
                let turn = self.owned_turn_mut(subscription, &turn_id)?;
                turn.finalized = true;
                Ok(())
            }
            AgentEvent::Unknown => Ok(()),
        }
    }

    /// Clear every turn
    pub fn reset(&mut self) {
        self.turns.clear();
    }

    pub fn find_tool(&self, call_id: &str) -> Option<&ToolInvocationPart> {
        self.turns
            .iter()
            .flat_map(Turn::tool_parts)
            .find(|tool| tool.call_id == call_id)
    }

    pub(crate) fn find_tool_mut(&mut self, call_id: &str) -> Option<&mut ToolInvocationPart> {
        self.turns
            .iter_mut()
            .flat_map(Turn::tool_parts_mut)
            .find(|tool| tool.call_id == call_id)
    }

    /// Turn holding `call_id`
    pub fn turn_of_call(&self, call_id: &str) -> Option<&Turn> {
        self.turns
            .iter()
            .find(|turn| turn.tool_parts().any(|tool| tool.call_id == call_id))
    }

    /// Close out everything produced by `subscription`: finalize its open turns
    /// and fail each non-terminal tool call unless `keep_open` holds for it.
    /// Returns the call ids that were interrupted.
    pub fn close_stream<F>(&mut self, subscription: SubscriptionId, keep_open: F) -> Vec<String>
    where
        F: Fn(&ToolInvocationPart) -> bool,
    {
        let mut interrupted = Vec::new();
        for turn in self
            .turns
            .iter_mut()
            .filter(|t| t.subscription == Some(subscription))
        {
            turn.finalized = true;
            for tool in turn.tool_parts_mut() {
                if !tool.state.is_terminal() && !keep_open(tool) {
                    tool.fail(INTERRUPTED);
                    interrupted.push(tool.call_id.clone());
                }
            }
        }
        interrupted
    }

    /// Fail every non-terminal call matching `interrupt`, in any turn.
    /// Returns the call ids that were interrupted.
    pub fn interrupt_calls<F>(&mut self, interrupt: F) -> Vec<String>
    where
        F: Fn(&ToolInvocationPart) -> bool,
    {
        let mut interrupted = Vec::new();
        for tool in self.turns.iter_mut().flat_map(Turn::tool_parts_mut) {
            if !tool.state.is_terminal() && interrupt(tool) {
                tool.fail(INTERRUPTED);
                interrupted.push(tool.call_id.clone());
            }
        }
        interrupted
    }

    /// Whether any turn from `subscription` is still being produced
    pub fn has_open_turn(&self, subscription: SubscriptionId) -> bool {
        self.turns
            .iter()
            .any(|t| t.subscription == Some(subscription) && !t.finalized)
    }

    pub fn last_is_user(&self) -> bool {
        self.turns.last().is_some_and(|t| t.role == Role::User)
    }

    fn owned_turn_mut(
        &mut self,
        subscription: SubscriptionId,
        turn_id: &TurnId,
    ) -> Result<&mut Turn, TranscriptError> {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| &t.id == turn_id)
            .ok_or_else(|| TranscriptError::UnknownTurn(turn_id.clone()))?;
        if turn.subscription != Some(subscription) {
            return Err(TranscriptError::ForeignTurn {
                turn_id: turn_id.clone(),
            });
        }
        Ok(turn)
    }

    fn open_turn_mut(
        &mut self,
        subscription: SubscriptionId,
        turn_id: &TurnId,
    ) -> Result<&mut Turn, TranscriptError> {
        let turn = self.owned_turn_mut(subscription, turn_id)?;
        if turn.finalized {
            return Err(TranscriptError::TurnFinalized(turn_id.clone()));
        }
        Ok(turn)
    }
}

fn replace_part(
    existing: &mut Part,
    update: Part,
    turn_id: &TurnId,
    index: usize,
) -> Result<(), TranscriptError> {
    match (existing, update) {
        (Part::Text(current), Part::Text(next)) => {
            if !next.text.starts_with(current.text.as_str()) {
                return Err(TranscriptError::TextNotExtended {
                    turn_id: turn_id.clone(),
                    index,
                });
            }
            current.text = next.text;
            Ok(())
        }
        (Part::ToolInvocation(current), Part::ToolInvocation(mut next)) => {
            if current.call_id != next.call_id || current.tool_name != next.tool_name {
                return Err(TranscriptError::ToolIdentityChanged {
                    call_id: current.call_id.clone(),
                });
            }
            if !current.state.can_advance_to(next.state) {
                return Err(TranscriptError::BackwardsState {
                    call_id: current.call_id.clone(),
                    from: current.state,
                    to: next.state,
                });
            }
            next.approval = current.approval;
            *current = next;
            Ok(())
        }
        _ => Err(TranscriptError::PartKindChanged {
            turn_id: turn_id.clone(),
            index,
        }),
    }
}
