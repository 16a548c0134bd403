//! Session runtime executor

use super::traits::{AgentStream, ToolExecutor};
use super::{Command, SessionSnapshot};
use crate::session::{
    Effect, EventOutcome, ExecutionError, Session, SessionError, TransportError,
};
use crate::transcript::{AgentEvent, SubscriptionId, Turn};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Most queued events folded into one snapshot
const MAX_EVENT_BATCH: usize = 64;

/// Events fed back into the runtime by its background tasks
#[derive(Debug)]
enum RuntimeEvent {
    Agent {
        subscription: SubscriptionId,
        event: AgentEvent,
    },
    StreamEnded {
        subscription: SubscriptionId,
    },
    StreamFailed {
        subscription: SubscriptionId,
        error: TransportError,
    },
    ToolFinished {
        call_id: String,
        outcome: Result<Value, ExecutionError>,
    },
}

/// Generic session runtime that can work with any agent and tool implementations
pub struct SessionRuntime<A, T>
where
    A: AgentStream + 'static,
    T: ToolExecutor + 'static,
{
    session: Session,
    agent: Arc<A>,
    tools: Arc<T>,
    command_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    snapshot_tx: broadcast::Sender<SessionSnapshot>,
    /// Cancellation for each open agent stream
    streams: HashMap<SubscriptionId, CancellationToken>,
    /// Parent token for running tool executions; replaced on reset
    tool_cancel_token: CancellationToken,
}

impl<A, T> SessionRuntime<A, T>
where
    A: AgentStream + 'static,
    T: ToolExecutor + 'static,
{
    pub fn new(
        session: Session,
        agent: A,
        tools: T,
        command_rx: mpsc::Receiver<Command>,
        snapshot_tx: broadcast::Sender<SessionSnapshot>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            session,
            agent: Arc::new(agent),
            tools: Arc::new(tools),
            command_rx,
            event_tx,
            event_rx,
            snapshot_tx,
            streams: HashMap::new(),
            tool_cancel_token: CancellationToken::new(),
        }
    }

    /// Process commands and stream events until every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("Starting session runtime");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.event_rx.recv() => self.handle_event_burst(event),
            }
        }

        for (_, token) in self.streams.drain() {
            token.cancel();
        }
        self.tool_cancel_token.cancel();
        tracing::info!("Session runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetDraft(text) => {
                self.session.set_draft(text);
            }
            Command::Send { text, reply } => {
                let result = self.session.send(&text).map(|(turn_id, effects)| {
                    self.execute_effects(effects);
                    turn_id
                });
                if let Err(e) = &result {
                    tracing::debug!(error = %e, "Send rejected");
                }
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let effects = self.session.stop();
                self.execute_effects(effects);
                let _ = reply.send(());
            }
            Command::Clear { reply } => {
                let effects = self.session.clear();
                self.execute_effects(effects);
                let _ = reply.send(());
            }
            Command::Resolve {
                call_id,
                decision,
                result,
                reply,
            } => {
                let outcome = self
                    .session
                    .resolve_confirmation(&call_id, decision, result)
                    .map(|effects| self.execute_effects(effects));
                if let Err(e) = &outcome {
                    log_resolution_error(&call_id, e);
                }
                let _ = reply.send(outcome);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(SessionSnapshot::of(&self.session));
                return;
            }
        }
        self.publish();
    }

    /// Handle `first` and whatever is already queued behind it, then publish
    /// one snapshot for the lot
    fn handle_event_burst(&mut self, first: RuntimeEvent) {
        let mut changed = self.handle_event(first);
        for _ in 1..MAX_EVENT_BATCH {
            match self.event_rx.try_recv() {
                Ok(event) => changed |= self.handle_event(event),
                Err(_) => break,
            }
        }
        if changed {
            self.publish();
        }
    }

    /// Returns whether the session changed
    fn handle_event(&mut self, event: RuntimeEvent) -> bool {
        match event {
            RuntimeEvent::Agent {
                subscription,
                event,
            } => {
                return self.session.apply_agent_event(subscription, event)
                    == EventOutcome::Applied;
            }
            RuntimeEvent::StreamEnded { subscription } => {
                self.streams.remove(&subscription);
                let effects = self.session.stream_ended(subscription);
                self.execute_effects(effects);
            }
            RuntimeEvent::StreamFailed {
                subscription,
                error,
            } => {
                self.streams.remove(&subscription);
                self.session.stream_failed(subscription, error);
            }
            RuntimeEvent::ToolFinished { call_id, outcome } => {
                match self.session.record_tool_result(&call_id, outcome) {
                    Ok(effects) => self.execute_effects(effects),
                    Err(e) => {
                        log_resolution_error(&call_id, &e);
                        return false;
                    }
                }
            }
        }
        true
    }

    fn publish(&self) {
        // No receivers is fine; observers come and go
        let _ = self.snapshot_tx.send(SessionSnapshot::of(&self.session));
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.execute_effect(effect);
        }
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::OpenStream {
                subscription,
                prior_turns,
            } => self.open_stream(subscription, prior_turns),

            Effect::CloseStream { subscription } => {
                if let Some(token) = self.streams.remove(&subscription) {
                    tracing::info!(subscription = %subscription, "Cancelling agent stream");
                    token.cancel();
                }
            }

            Effect::ExecuteTool {
                call_id,
                tool_name,
                input,
            } => {
                let cancel_token = self.tool_cancel_token.child_token();
                let tools = Arc::clone(&self.tools);
                let event_tx = self.event_tx.clone();

                tokio::spawn(async move {
                    tracing::info!(tool = %tool_name, call_id = %call_id, "Executing tool (background)");
                    let outcome = tokio::select! {
                        biased;

                        () = cancel_token.cancelled() => {
                            tracing::info!(call_id = %call_id, "Tool execution cancelled");
                            return;
                        }

                        outcome = tools.execute(&tool_name, input, cancel_token.clone()) => outcome,
                    };
                    let _ = event_tx
                        .send(RuntimeEvent::ToolFinished { call_id, outcome })
                        .await;
                });
            }

            Effect::CancelTools => {
                let fresh = CancellationToken::new();
                std::mem::replace(&mut self.tool_cancel_token, fresh).cancel();
            }
        }
    }

    fn open_stream(&mut self, subscription: SubscriptionId, prior_turns: Vec<Turn>) {
        let cancel_token = CancellationToken::new();
        self.streams.insert(subscription, cancel_token.clone());

        let agent = Arc::clone(&self.agent);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let opened = tokio::select! {
                biased;

                () = cancel_token.cancelled() => return,
                opened = agent.open(prior_turns) => opened,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(error) => {
                    let _ = event_tx
                        .send(RuntimeEvent::StreamFailed {
                            subscription,
                            error,
                        })
                        .await;
                    return;
                }
            };

            loop {
                tokio::select! {
                    biased;

                    () = cancel_token.cancelled() => {
                        stream.close();
                        tracing::debug!(subscription = %subscription, "Agent stream closed");
                        break;
                    }

                    next = stream.events.next() => {
                        let event = match next {
                            Some(Ok(event)) => RuntimeEvent::Agent { subscription, event },
                            Some(Err(error)) => {
                                stream.close();
                                RuntimeEvent::StreamFailed { subscription, error }
                            }
                            None => RuntimeEvent::StreamEnded { subscription },
                        };
                        let last = !matches!(event, RuntimeEvent::Agent { .. });
                        if event_tx.send(event).await.is_err() || last {
                            break;
                        }
                    }
                }
            }
        });
    }
}

fn log_resolution_error(call_id: &str, error: &SessionError) {
    if error.is_stale_resolution() {
        tracing::debug!(call_id, error = %error, "Ignoring stale tool resolution");
    } else {
        tracing::warn!(call_id, error = %error, "Tool resolution failed");
    }
}
