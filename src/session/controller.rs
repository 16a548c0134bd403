//! Session state machine
//!
//! `status` is never stored. It is recomputed from the transcript, the open
//! streams and the last unrecovered error every time it is asked for.

use super::effect::Effect;
use super::error::{ExecutionError, SessionError, TransportError};
use crate::tracker::{ConfirmationPolicy, Decision, Resolution};
use crate::transcript::{
    AgentEvent, SubscriptionId, ToolInvocationPart, TranscriptError, TranscriptStore, Turn,
    TurnId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// UI-facing session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// No agent activity, nothing pending
    Idle,
    /// An agent turn is being produced or an approved tool is running
    Streaming,
    /// At least one gated call waits for a human decision
    AwaitingConfirmation,
    /// The last stream failed and nothing has succeeded since
    Error,
}

impl SessionStatus {
    /// Input is disabled only while a confirmation is owed
    pub fn accepts_input(self) -> bool {
        self != SessionStatus::AwaitingConfirmation
    }
}

/// Behavior switches fixed at construction
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    /// Reopen the agent stream once every confirmation-driven result of a
    /// turn has been written and no stream is open, so the agent sees them.
    pub continue_after_tools: bool,
}

/// Result of feeding one stream event to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    /// The event came from a stream that is no longer open
    Stale,
    /// The store refused the event; nothing changed
    Rejected(TranscriptError),
}

/// Live state of one conversation
#[derive(Debug)]
pub struct Session {
    store: TranscriptStore,
    policy: Arc<ConfirmationPolicy>,
    config: SessionConfig,
    draft_input: String,
    open_streams: BTreeSet<SubscriptionId>,
    next_subscription: u64,
    last_error: Option<SessionError>,
    /// Set once a human decision produced a result the agent has not seen
    results_unsent: bool,
}

impl Session {
    pub fn new(policy: Arc<ConfirmationPolicy>, config: SessionConfig) -> Self {
        Self {
            store: TranscriptStore::new(),
            policy,
            config,
            draft_input: String::new(),
            open_streams: BTreeSet::new(),
            next_subscription: 1,
            last_error: None,
            results_unsent: false,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        self.store.turns()
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    pub fn draft_input(&self) -> &str {
        &self.draft_input
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft_input = text.into();
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn open_streams(&self) -> impl Iterator<Item = SubscriptionId> + '_ {
        self.open_streams.iter().copied()
    }

    pub fn pending_confirmations(&self) -> BTreeSet<String> {
        self.policy.pending_confirmations(self.store.turns())
    }

    pub fn status(&self) -> SessionStatus {
        let turns = self.store.turns();
        if self.policy.is_awaiting_confirmation(turns) {
            SessionStatus::AwaitingConfirmation
        } else if self.last_error.is_some() {
            SessionStatus::Error
        } else if ConfirmationPolicy::executing(turns).next().is_some()
            || self.open_streams.iter().any(|s| self.is_producing(*s))
        {
            SessionStatus::Streaming
        } else {
            SessionStatus::Idle
        }
    }

    /// A stream is producing until it has opened a turn and finalized all of them
    fn is_producing(&self, subscription: SubscriptionId) -> bool {
        let mut from_stream = self
            .store
            .turns()
            .iter()
            .filter(|t| t.subscription == Some(subscription))
            .peekable();
        from_stream.peek().is_none() || from_stream.any(|t| !t.finalized)
    }

    /// Submit the user's text and open an agent stream for the reply
    pub fn send(&mut self, text: &str) -> Result<(TurnId, Vec<Effect>), SessionError> {
        if self.status() == SessionStatus::AwaitingConfirmation {
            return Err(SessionError::validation(
                "resolve the pending tool confirmation first",
            ));
        }
        let turn_id = self
            .store
            .append_user_turn(text)
            .map_err(|e| SessionError::validation(e.to_string()))?;
        self.draft_input.clear();
        self.last_error = None;
        self.results_unsent = false;

        tracing::info!(turn_id = %turn_id, "User turn appended");
        Ok((turn_id, vec![self.open_stream()]))
    }

    fn open_stream(&mut self) -> Effect {
        let subscription = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.open_streams.insert(subscription);
        tracing::debug!(subscription = %subscription, "Opening agent stream");
        Effect::OpenStream {
            subscription,
            prior_turns: self.store.turns().to_vec(),
        }
    }

    /// Apply one event from `subscription`. Events from closed streams are dropped.
    pub fn apply_agent_event(
        &mut self,
        subscription: SubscriptionId,
        event: AgentEvent,
    ) -> EventOutcome {
        if !self.open_streams.contains(&subscription) {
            tracing::debug!(
                subscription = %subscription,
                kind = event.kind(),
                "Dropping event from closed stream"
            );
            return EventOutcome::Stale;
        }
        let kind = event.kind();
        match self.store.apply_agent_event(subscription, event) {
            Ok(()) => EventOutcome::Applied,
            Err(e) => {
                tracing::warn!(subscription = %subscription, kind, error = %e, "Agent event rejected");
                EventOutcome::Rejected(e)
            }
        }
    }

    /// The agent closed `subscription` normally
    pub fn stream_ended(&mut self, subscription: SubscriptionId) -> Vec<Effect> {
        if !self.close(subscription) {
            return Vec::new();
        }
        tracing::debug!(subscription = %subscription, "Agent stream ended");
        self.maybe_continue().into_iter().collect()
    }

    /// `subscription` failed mid-stream; the session enters `error`
    pub fn stream_failed(&mut self, subscription: SubscriptionId, error: TransportError) {
        if !self.close(subscription) {
            return;
        }
        tracing::warn!(subscription = %subscription, error = %error, "Agent stream failed");
        self.last_error = Some(SessionError::Transport(error));
    }

    /// Cancel every open stream and approved execution. Pending
    /// confirmations survive.
    pub fn stop(&mut self) -> Vec<Effect> {
        let open: Vec<SubscriptionId> = self.open_streams.iter().copied().collect();
        let mut effects = Vec::with_capacity(open.len() + 1);
        for subscription in open {
            self.close(subscription);
            effects.push(Effect::CloseStream { subscription });
        }
        let cancelled = self.store.interrupt_calls(ConfirmationPolicy::is_executing);
        if !cancelled.is_empty() {
            tracing::info!(calls = ?cancelled, "Cancelled approved tool executions");
            effects.push(Effect::CancelTools);
        }
        self.last_error = None;
        self.results_unsent = false;
        if !effects.is_empty() {
            tracing::info!(effects = effects.len(), "Stopped agent work");
        }
        effects
    }

    /// Drop the whole conversation, cancelling streams and tool executions
    pub fn reset(&mut self) -> Vec<Effect> {
        let mut effects: Vec<Effect> = std::mem::take(&mut self.open_streams)
            .into_iter()
            .map(|subscription| Effect::CloseStream { subscription })
            .collect();
        effects.push(Effect::CancelTools);
        self.store.reset();
        self.last_error = None;
        self.results_unsent = false;
        tracing::info!("Session reset");
        effects
    }

    /// Clear history; same as `reset`
    pub fn clear(&mut self) -> Vec<Effect> {
        self.reset()
    }

    /// Record a human decision on a pending confirmation
    pub fn resolve_confirmation(
        &mut self,
        call_id: &str,
        decision: Decision,
        result: Option<Value>,
    ) -> Result<Vec<Effect>, SessionError> {
        let resolution = self
            .policy
            .resolve(&mut self.store, call_id, decision, result)?;
        self.last_error = None;
        tracing::info!(call_id, ?decision, "Tool confirmation resolved");

        match resolution {
            Resolution::Execute { tool_name, input } => {
                Ok(vec![Effect::execute_tool(call_id, tool_name, input)])
            }
            Resolution::Denied | Resolution::Completed => {
                self.results_unsent = true;
                Ok(self.maybe_continue().into_iter().collect())
            }
        }
    }

    /// Record the outcome of an approved tool execution
    pub fn record_tool_result(
        &mut self,
        call_id: &str,
        outcome: Result<Value, ExecutionError>,
    ) -> Result<Vec<Effect>, SessionError> {
        if let Err(e) = &outcome {
            tracing::warn!(call_id, error = %e, "Tool execution failed");
        }
        ConfirmationPolicy::record_execution(&mut self.store, call_id, outcome)?;
        self.results_unsent = true;
        Ok(self.maybe_continue().into_iter().collect())
    }

    /// Close `subscription` in the transcript; false if it was not open
    fn close(&mut self, subscription: SubscriptionId) -> bool {
        if !self.open_streams.remove(&subscription) {
            return false;
        }
        let policy = Arc::clone(&self.policy);
        let interrupted = self
            .store
            .close_stream(subscription, |tool| keep_open(&policy, tool));
        if !interrupted.is_empty() {
            tracing::warn!(
                subscription = %subscription,
                calls = ?interrupted,
                "Interrupted open tool calls"
            );
        }
        true
    }

    fn maybe_continue(&mut self) -> Option<Effect> {
        if !self.config.continue_after_tools
            || !self.results_unsent
            || !self.open_streams.is_empty()
            || self.policy.is_awaiting_confirmation(self.store.turns())
            || ConfirmationPolicy::executing(self.store.turns()).next().is_some()
        {
            return None;
        }
        self.results_unsent = false;
        tracing::debug!("Continuing agent with tool results");
        Some(self.open_stream())
    }

    /// Call ids with an approved execution still in flight
    pub fn executing_calls(&self) -> HashSet<String> {
        ConfirmationPolicy::executing(self.store.turns())
            .map(|tool| tool.call_id.clone())
            .collect()
    }
}

/// Calls owed to a human, or approved and running, outlive their stream
fn keep_open(policy: &ConfirmationPolicy, tool: &ToolInvocationPart) -> bool {
    policy.is_pending(tool) || tool.approval.is_some()
}
