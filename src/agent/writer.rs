//! Turns streamed chat completion deltas into transcript events

use crate::session::ExecutionError;
use crate::transcript::{AgentEvent, Part, Role, ToolInvocationPart, ToolState, TurnId};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;

/// A tool call whose arguments have fully arrived
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCall {
    pub part_index: usize,
    pub call_id: String,
    pub tool_name: String,
    pub input: Value,
    /// Raw argument text as sent by the model
    pub arguments: String,
}

#[derive(Debug, Default)]
struct CallBuffer {
    call_id: Option<String>,
    tool_name: Option<String>,
    arguments: String,
    part_index: Option<usize>,
}

/// Builds one assistant turn across one or more model rounds
#[derive(Debug)]
pub struct TurnWriter {
    turn_id: TurnId,
    parts: Vec<Part>,
    /// Text part receiving deltas in the current round
    text_index: Option<usize>,
    /// Calls in the current round keyed by their stream index
    calls: BTreeMap<usize, CallBuffer>,
}

impl TurnWriter {
    pub fn new(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            parts: Vec::new(),
            text_index: None,
            calls: BTreeMap::new(),
        }
    }

    pub fn open(&self) -> AgentEvent {
        AgentEvent::TurnOpened {
            turn_id: self.turn_id.clone(),
            role: Role::Assistant,
            created_at: Some(Utc::now()),
        }
    }

    pub fn text_delta(&mut self, delta: &str) -> Option<AgentEvent> {
        if delta.is_empty() {
            return None;
        }
        if let Some(index) = self.text_index {
            if let Some(Part::Text(text)) = self.parts.get_mut(index) {
                text.text.push_str(delta);
            }
            return Some(self.updated(index));
        }
        self.text_index = Some(self.parts.len());
        Some(self.appended(Part::text(delta)))
    }

    /// Feed one streamed fragment of the call at `index`.
    ///
    /// The part appears once both the id and the name are known.
    pub fn tool_delta(
        &mut self,
        index: usize,
        call_id: Option<&str>,
        tool_name: Option<&str>,
        arguments: Option<&str>,
    ) -> Option<AgentEvent> {
        let next_part = self.parts.len();
        let call = self.calls.entry(index).or_default();
        if let Some(id) = call_id.filter(|id| !id.is_empty()) {
            call.call_id.get_or_insert_with(|| id.to_string());
        }
        if let Some(name) = tool_name.filter(|name| !name.is_empty()) {
            call.tool_name.get_or_insert_with(|| name.to_string());
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(arguments);
        }

        let part = ToolInvocationPart::new(
            call.tool_name.clone()?,
            call.call_id.clone()?,
            ToolState::InputStreaming,
            Value::String(call.arguments.clone()),
        );
        match call.part_index {
            Some(part_index) => {
                self.parts[part_index] = Part::ToolInvocation(part);
                Some(self.updated(part_index))
            }
            None => {
                call.part_index = Some(next_part);
                Some(self.appended(Part::ToolInvocation(part)))
            }
        }
    }

    /// Close the current round: every complete call moves to `input-available`.
    ///
    /// Calls that never received an id or a name are dropped.
    pub fn finish_round(&mut self) -> (Vec<AgentEvent>, Vec<CompletedCall>) {
        self.text_index = None;
        let mut events = Vec::new();
        let mut completed = Vec::new();
        for (_, call) in std::mem::take(&mut self.calls) {
            let (Some(part_index), Some(call_id), Some(tool_name)) =
                (call.part_index, call.call_id, call.tool_name)
            else {
                tracing::warn!("Dropping tool call without id or name");
                continue;
            };
            let input = parse_arguments(&call.arguments);
            self.parts[part_index] = Part::ToolInvocation(ToolInvocationPart::new(
                tool_name.clone(),
                call_id.clone(),
                ToolState::InputAvailable,
                input.clone(),
            ));
            events.push(self.updated(part_index));
            completed.push(CompletedCall {
                part_index,
                call_id,
                tool_name,
                input,
                arguments: call.arguments,
            });
        }
        (events, completed)
    }

    /// Record the outcome of a call this writer executed itself
    pub fn tool_result(
        &mut self,
        call: &CompletedCall,
        outcome: &Result<Value, ExecutionError>,
    ) -> AgentEvent {
        let part = ToolInvocationPart::new(
            call.tool_name.clone(),
            call.call_id.clone(),
            ToolState::InputAvailable,
            call.input.clone(),
        );
        let part = match outcome {
            Ok(output) => part.with_output(output.clone()),
            Err(e) => part.with_error(e.message.clone()),
        };
        self.parts[call.part_index] = Part::ToolInvocation(part);
        self.updated(call.part_index)
    }

    pub fn finalize(&self) -> AgentEvent {
        AgentEvent::TurnFinalized {
            turn_id: self.turn_id.clone(),
        }
    }

    fn appended(&mut self, part: Part) -> AgentEvent {
        self.parts.push(part.clone());
        AgentEvent::PartAppended {
            turn_id: self.turn_id.clone(),
            part,
        }
    }

    fn updated(&self, index: usize) -> AgentEvent {
        AgentEvent::PartUpdated {
            turn_id: self.turn_id.clone(),
            index,
            part: self.parts[index].clone(),
        }
    }
}

/// Models occasionally send empty or broken argument JSON; fall back to `{}`
fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Unparseable tool arguments");
        Value::Object(serde_json::Map::new())
    })
}
