//! Runtime for driving a session
//!
//! One task owns the `Session` and is the only writer. Commands from the UI
//! and events from agent streams and tool executions are funnelled into it
//! over channels; snapshots fan out to observers over a broadcast channel.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::session::{Session, SessionError, SessionStatus};
use crate::tracker::Decision;
use crate::transcript::{Turn, TurnId};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Read-only view of the session published after every change
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub turns: Arc<Vec<Turn>>,
    pub status: SessionStatus,
    pub draft_input: String,
    pub pending: BTreeSet<String>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub fn of(session: &Session) -> Self {
        Self {
            turns: Arc::new(session.turns().to_vec()),
            status: session.status(),
            draft_input: session.draft_input().to_string(),
            pending: session.pending_confirmations(),
            last_error: session.last_error().map(ToString::to_string),
        }
    }
}

/// Requests handled by the runtime task
#[derive(Debug)]
pub enum Command {
    SetDraft(String),
    Send {
        text: String,
        reply: oneshot::Sender<Result<TurnId, SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Resolve {
        call_id: String,
        decision: Decision,
        result: Option<Value>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("Session runtime has stopped")]
    Closed,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<Command>,
    snapshot_tx: broadcast::Sender<SessionSnapshot>,
}

impl SessionHandle {
    /// Start the runtime for `session` on the current tokio runtime
    pub fn spawn<A, T>(session: Session, agent: A, tools: T) -> Self
    where
        A: AgentStream + 'static,
        T: ToolExecutor + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (snapshot_tx, _) = broadcast::channel(128);

        let runtime = SessionRuntime::new(session, agent, tools, command_rx, snapshot_tx.clone());
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!("Session runtime finished");
        });

        Self {
            command_tx,
            snapshot_tx,
        }
    }

    /// Subscribe to snapshots. Slow observers miss snapshots rather than
    /// holding up the session.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn set_draft(&self, text: impl Into<String>) -> Result<(), HandleError> {
        self.command_tx
            .send(Command::SetDraft(text.into()))
            .await
            .map_err(|_| HandleError::Closed)
    }

    pub async fn send(&self, text: impl Into<String>) -> Result<TurnId, HandleError> {
        let text = text.into();
        let turn_id = self
            .request(|reply| Command::Send { text, reply })
            .await??;
        Ok(turn_id)
    }

    pub async fn stop(&self) -> Result<(), HandleError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn clear(&self) -> Result<(), HandleError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    pub async fn resolve_confirmation(
        &self,
        call_id: impl Into<String>,
        decision: Decision,
        result: Option<Value>,
    ) -> Result<(), HandleError> {
        let call_id = call_id.into();
        self.request(|reply| Command::Resolve {
            call_id,
            decision,
            result,
            reply,
        })
        .await??;
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, HandleError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, HandleError> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| HandleError::Closed)?;
        response.await.map_err(|_| HandleError::Closed)
    }
}
