//! Tool invocation tracker
//!
//! Decides which tool calls block on a human and applies the human's
//! decision to the transcript. The allow-list is fixed at startup.

use crate::session::{ExecutionError, SessionError};
use crate::transcript::{
    Approval, ToolInvocationPart, ToolState, TranscriptStore, Turn, DENIED_BY_USER,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

/// Tool names that must be confirmed before they run
#[derive(Debug, Clone, Default)]
pub struct ConfirmationPolicy {
    tools: HashSet<String>,
}

/// Human answer to a confirmation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
}

/// What the caller must do after a decision has been recorded
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Denied; the call is now `output-error`
    Denied,
    /// Approved with a caller-supplied result; the call is now `output-available`
    Completed,
    /// Approved; the tool must be executed and the outcome recorded
    Execute { tool_name: String, input: Value },
}

impl ConfirmationPolicy {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
        }
    }

    pub fn requires_confirmation(&self, tool_name: &str) -> bool {
        self.tools.contains(tool_name)
    }

    /// Gated tool names, sorted
    pub fn tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// A call is pending iff it is exactly `input-available`, its tool is gated,
    /// and nobody has decided on it yet.
    pub fn is_pending(&self, tool: &ToolInvocationPart) -> bool {
        tool.state == ToolState::InputAvailable
            && tool.approval.is_none()
            && self.requires_confirmation(&tool.tool_name)
    }

    /// Pending calls across every turn, not only the latest one
    pub fn pending_confirmations(&self, turns: &[Turn]) -> BTreeSet<String> {
        turns
            .iter()
            .flat_map(Turn::tool_parts)
            .filter(|tool| self.is_pending(tool))
            .map(|tool| tool.call_id.clone())
            .collect()
    }

    pub fn is_awaiting_confirmation(&self, turns: &[Turn]) -> bool {
        turns
            .iter()
            .flat_map(Turn::tool_parts)
            .any(|tool| self.is_pending(tool))
    }

    /// Record a decision on a pending call.
    ///
    /// Fails with `NotFound` when no gated call with complete arguments carries
    /// `call_id`, and with `AlreadyResolved` once the call has left
    /// `input-available` or already carries a decision.
    pub fn resolve(
        &self,
        store: &mut TranscriptStore,
        call_id: &str,
        decision: Decision,
        result: Option<Value>,
    ) -> Result<Resolution, SessionError> {
        let not_found = || SessionError::NotFound {
            call_id: call_id.to_string(),
        };
        let tool = store.find_tool_mut(call_id).ok_or_else(not_found)?;
        if !self.requires_confirmation(&tool.tool_name) || tool.state == ToolState::InputStreaming
        {
            return Err(not_found());
        }
        if tool.state != ToolState::InputAvailable || tool.approval.is_some() {
            return Err(SessionError::AlreadyResolved {
                call_id: call_id.to_string(),
                state: tool.state,
            });
        }

        match (decision, result) {
            (Decision::Deny, _) => {
                tool.approval = Some(Approval::Denied);
                tool.fail(DENIED_BY_USER);
                Ok(Resolution::Denied)
            }
            (Decision::Approve, Some(output)) => {
                tool.approval = Some(Approval::Approved);
                tool.complete(output);
                Ok(Resolution::Completed)
            }
            (Decision::Approve, None) => {
                tool.approval = Some(Approval::Approved);
                Ok(Resolution::Execute {
                    tool_name: tool.tool_name.clone(),
                    input: tool.input.clone(),
                })
            }
        }
    }

    /// Write the outcome of an approved execution back into its part
    pub fn record_execution(
        store: &mut TranscriptStore,
        call_id: &str,
        outcome: Result<Value, ExecutionError>,
    ) -> Result<(), SessionError> {
        let tool = store
            .find_tool_mut(call_id)
            .ok_or_else(|| SessionError::NotFound {
                call_id: call_id.to_string(),
            })?;
        if tool.state != ToolState::InputAvailable || tool.approval != Some(Approval::Approved) {
            return Err(SessionError::AlreadyResolved {
                call_id: call_id.to_string(),
                state: tool.state,
            });
        }
        match outcome {
            Ok(output) => tool.complete(output),
            Err(e) => tool.fail(e.message),
        }
        Ok(())
    }

    /// Approved calls whose execution has not reported back yet
    pub fn executing(turns: &[Turn]) -> impl Iterator<Item = &ToolInvocationPart> {
        turns
            .iter()
            .flat_map(Turn::tool_parts)
            .filter(|tool| Self::is_executing(tool))
    }

    pub fn is_executing(tool: &ToolInvocationPart) -> bool {
        tool.state == ToolState::InputAvailable && tool.approval == Some(Approval::Approved)
    }
}
