//! Mock implementations for testing
//!
//! These mocks enable integration testing of the runtime without a network.

use super::traits::*;
use crate::session::{ExecutionError, TransportError};
use crate::transcript::{AgentEvent, Turn};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Agent
// ============================================================================

pub type ScriptedItem = Result<AgentEvent, TransportError>;

enum Script {
    /// Yield these items, then end the stream
    Events(Vec<ScriptedItem>),
    /// Yield whatever the test pushes until the sender is dropped
    Channel(mpsc::UnboundedReceiver<ScriptedItem>),
    /// Fail before any event is produced
    OpenError(TransportError),
}

/// Mock agent that replays one queued script per opened stream
#[derive(Default)]
pub struct MockAgent {
    scripts: Mutex<VecDeque<Script>>,
    /// Prior turns passed to every `open` call
    pub opened: Mutex<Vec<Vec<Turn>>>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a stream that yields `events` and then ends
    pub fn queue_events(&self, events: Vec<AgentEvent>) {
        self.queue_items(events.into_iter().map(Ok).collect());
    }

    /// Queue a stream that may fail part way through
    pub fn queue_items(&self, items: Vec<ScriptedItem>) {
        self.scripts.lock().unwrap().push_back(Script::Events(items));
    }

    /// Queue a stream driven by the returned sender
    pub fn queue_channel(&self) -> mpsc::UnboundedSender<ScriptedItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push_back(Script::Channel(rx));
        tx
    }

    pub fn queue_open_error(&self, error: TransportError) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::OpenError(error));
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentStream for MockAgent {
    async fn open(&self, prior_turns: Vec<Turn>) -> Result<AgentSubscription, TransportError> {
        self.opened.lock().unwrap().push(prior_turns);
        let script = self.scripts.lock().unwrap().pop_front();
        let events = match script {
            Some(Script::Events(items)) => futures::stream::iter(items).boxed(),
            Some(Script::Channel(rx)) => UnboundedReceiverStream::new(rx).boxed(),
            Some(Script::OpenError(error)) => return Err(error),
            None => futures::stream::empty().boxed(),
        };
        Ok(AgentSubscription::new(events))
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

/// Mock tool executor with predefined outputs
#[derive(Default)]
pub struct MockToolExecutor {
    outputs: HashMap<String, Result<Value, ExecutionError>>,
    delay: Option<Duration>,
    /// Record of tool executions
    pub executions: Mutex<Vec<(String, Value)>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: impl Into<String>, output: Value) -> Self {
        self.outputs.insert(name.into(), Ok(output));
        self
    }

    pub fn with_failing_tool(mut self, name: impl Into<String>, message: &str) -> Self {
        self.outputs
            .insert(name.into(), Err(ExecutionError::new(message)));
        self
    }

    /// Sleep before answering, giving tests a window to cancel
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn recorded_executions(&self) -> Vec<(String, Value)> {
        self.executions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        self.executions
            .lock()
            .unwrap()
            .push((tool_name.to_string(), input));
        if let Some(delay) = self.delay {
            tokio::select! {
                () = cancel.cancelled() => return Err(ExecutionError::new("cancelled")),
                () = tokio::time::sleep(delay) => {}
            }
        }
        self.outputs
            .get(tool_name)
            .cloned()
            .unwrap_or_else(|| Err(ExecutionError::new(format!("unknown tool: {tool_name}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{HandleError, SessionHandle, SessionSnapshot};
    use crate::session::{Session, SessionConfig, SessionError, SessionStatus};
    use crate::tracker::{ConfirmationPolicy, Decision};
    use crate::transcript::{
        Part, Role, ToolInvocationPart, ToolState, TurnId, DENIED_BY_USER, INTERRUPTED,
    };
    use serde_json::json;
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(2);

    fn session(config: SessionConfig) -> Session {
        Session::new(
            Arc::new(ConfirmationPolicy::new(["getWeatherInformation"])),
            config,
        )
    }

    fn spawn(agent: &Arc<MockAgent>, tools: &Arc<MockToolExecutor>) -> SessionHandle {
        SessionHandle::spawn(
            session(SessionConfig::default()),
            Arc::clone(agent),
            Arc::clone(tools),
        )
    }

    /// Poll snapshots until `pred` holds
    async fn wait_for(
        handle: &SessionHandle,
        pred: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let snapshot = handle.snapshot().await.unwrap();
            if pred(&snapshot) {
                return snapshot;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "Timed out waiting; last snapshot: {snapshot:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_closed(tx: &mpsc::UnboundedSender<ScriptedItem>) {
        tokio::time::timeout(WAIT, tx.closed())
            .await
            .expect("agent stream was never dropped");
    }

    fn opened(id: &str) -> AgentEvent {
        AgentEvent::TurnOpened {
            turn_id: TurnId::new(id),
            role: Role::Assistant,
            created_at: None,
        }
    }

    fn text(id: &str, text: &str) -> AgentEvent {
        AgentEvent::PartAppended {
            turn_id: TurnId::new(id),
            part: Part::text(text),
        }
    }

    fn finalized(id: &str) -> AgentEvent {
        AgentEvent::TurnFinalized {
            turn_id: TurnId::new(id),
        }
    }

    fn weather_call(id: &str) -> AgentEvent {
        AgentEvent::PartAppended {
            turn_id: TurnId::new(id),
            part: Part::ToolInvocation(ToolInvocationPart::new(
                "getWeatherInformation",
                "call-1",
                ToolState::InputAvailable,
                json!({"city": "Austin"}),
            )),
        }
    }

    fn weather(snapshot: &SessionSnapshot) -> Option<&ToolInvocationPart> {
        snapshot
            .turns
            .iter()
            .flat_map(Turn::tool_parts)
            .find(|tool| tool.call_id == "call-1")
    }

    fn settled(snapshot: &SessionSnapshot) -> bool {
        snapshot.status == SessionStatus::Idle
    }

    #[tokio::test]
    async fn test_simple_text_response() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(MockToolExecutor::new());
        agent.queue_events(vec![
            opened("a1"),
            text("a1", "Try a frittata."),
            finalized("a1"),
        ]);
        let handle = spawn(&agent, &tools);

        handle.set_draft("eggs").await.unwrap();
        handle.send("eggs").await.unwrap();
        let snapshot = wait_for(&handle, |s| s.turns.len() == 2 && settled(s)).await;

        assert_eq!(snapshot.turns[0].role, Role::User);
        assert_eq!(snapshot.turns[0].text(), "eggs");
        assert_eq!(snapshot.turns[1].text(), "Try a frittata.");
        assert!(snapshot.turns[1].finalized);
        assert_eq!(snapshot.draft_input, "");
        assert!(snapshot.last_error.is_none());
        assert_eq!(agent.open_count(), 1);
        assert_eq!(agent.opened.lock().unwrap()[0].len(), 1);
    }

    #[tokio::test]
    async fn test_blank_send_is_rejected() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(MockToolExecutor::new());
        let handle = spawn(&agent, &tools);

        let err = handle.send("   ").await.unwrap_err();
        assert!(matches!(
            err,
            HandleError::Session(SessionError::Validation(_))
        ));
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.turns.is_empty());
        assert_eq!(agent.open_count(), 0);
    }

    #[tokio::test]
    async fn test_approved_confirmation_runs_tool_once() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(
            MockToolExecutor::new().with_tool("getWeatherInformation", json!("sunny, 75F")),
        );
        agent.queue_events(vec![opened("a1"), weather_call("a1")]);
        let handle = spawn(&agent, &tools);

        handle.send("Weather in Austin?").await.unwrap();
        let snapshot = wait_for(&handle, |s| {
            s.status == SessionStatus::AwaitingConfirmation
        })
        .await;
        assert_eq!(
            snapshot.pending.iter().collect::<Vec<_>>(),
            vec!["call-1"]
        );

        // Input is locked until the call is resolved
        let err = handle.send("hello?").await.unwrap_err();
        assert!(matches!(
            err,
            HandleError::Session(SessionError::Validation(_))
        ));

        handle
            .resolve_confirmation("call-1", Decision::Approve, None)
            .await
            .unwrap();
        let snapshot = wait_for(&handle, |s| {
            settled(s) && weather(s).is_some_and(|t| t.state.is_terminal())
        })
        .await;

        let tool = weather(&snapshot).unwrap();
        assert_eq!(tool.state, ToolState::OutputAvailable);
        assert_eq!(tool.output, Some(json!("sunny, 75F")));
        assert!(snapshot.pending.is_empty());
        assert_eq!(
            tools.recorded_executions(),
            vec![(
                "getWeatherInformation".to_string(),
                json!({"city": "Austin"})
            )]
        );

        // A second decision is stale
        let err = handle
            .resolve_confirmation("call-1", Decision::Deny, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandleError::Session(SessionError::AlreadyResolved { .. })
        ));
        assert_eq!(tools.recorded_executions().len(), 1);
    }

    #[tokio::test]
    async fn test_denied_confirmation_never_executes() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(
            MockToolExecutor::new().with_tool("getWeatherInformation", json!("sunny")),
        );
        agent.queue_events(vec![opened("a1"), weather_call("a1")]);
        let handle = spawn(&agent, &tools);

        handle.send("Weather?").await.unwrap();
        wait_for(&handle, |s| s.status == SessionStatus::AwaitingConfirmation).await;
        handle
            .resolve_confirmation("call-1", Decision::Deny, None)
            .await
            .unwrap();

        let snapshot = wait_for(&handle, settled).await;
        let tool = weather(&snapshot).unwrap();
        assert_eq!(tool.state, ToolState::OutputError);
        assert_eq!(tool.error_text.as_deref(), Some(DENIED_BY_USER));
        assert!(tools.recorded_executions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_execution_is_recorded_inline() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(
            MockToolExecutor::new().with_failing_tool("getWeatherInformation", "service down"),
        );
        agent.queue_events(vec![opened("a1"), weather_call("a1"), finalized("a1")]);
        let handle = spawn(&agent, &tools);

        handle.send("Weather?").await.unwrap();
        wait_for(&handle, |s| s.status == SessionStatus::AwaitingConfirmation).await;
        handle
            .resolve_confirmation("call-1", Decision::Approve, None)
            .await
            .unwrap();

        let snapshot = wait_for(&handle, |s| {
            settled(s) && weather(s).is_some_and(|t| t.state.is_terminal())
        })
        .await;
        let tool = weather(&snapshot).unwrap();
        assert_eq!(tool.state, ToolState::OutputError);
        assert_eq!(tool.error_text.as_deref(), Some("service down"));
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn test_continuation_sends_tool_result_back_to_agent() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(
            MockToolExecutor::new().with_tool("getWeatherInformation", json!("rainy")),
        );
        agent.queue_events(vec![opened("a1"), weather_call("a1"), finalized("a1")]);
        agent.queue_events(vec![
            opened("a2"),
            text("a2", "Soup weather, then."),
            finalized("a2"),
        ]);
        let handle = SessionHandle::spawn(
            session(SessionConfig {
                continue_after_tools: true,
            }),
            Arc::clone(&agent),
            Arc::clone(&tools),
        );

        handle.send("Weather?").await.unwrap();
        wait_for(&handle, |s| s.status == SessionStatus::AwaitingConfirmation).await;
        handle
            .resolve_confirmation("call-1", Decision::Approve, None)
            .await
            .unwrap();

        let snapshot = wait_for(&handle, |s| s.turns.len() == 3 && settled(s)).await;
        assert_eq!(snapshot.turns[2].text(), "Soup weather, then.");
        assert_eq!(agent.open_count(), 2);

        let prior = agent.opened.lock().unwrap()[1].clone();
        let tool = prior
            .iter()
            .flat_map(Turn::tool_parts)
            .next()
            .cloned()
            .unwrap();
        assert_eq!(tool.output, Some(json!("rainy")));
    }

    #[tokio::test]
    async fn test_reset_mid_stream_drops_late_events() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(MockToolExecutor::new());
        let tx = agent.queue_channel();
        let handle = spawn(&agent, &tools);

        handle.send("eggs").await.unwrap();
        tx.send(Ok(opened("a1"))).unwrap();
        tx.send(Ok(text("a1", "Partial"))).unwrap();
        wait_for(&handle, |s| s.turns.len() == 2 && s.turns[1].text() == "Partial").await;

        handle.set_draft("half typed").await.unwrap();
        handle.clear().await.unwrap();
        // Late events either fail to send or are ignored
        let _ = tx.send(Ok(finalized("a1")));
        wait_closed(&tx).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.turns.is_empty());
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(snapshot.draft_input, "half typed");
    }

    #[tokio::test]
    async fn test_reset_cancels_running_tool() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(
            MockToolExecutor::new()
                .with_tool("getWeatherInformation", json!("sunny"))
                .with_delay(Duration::from_secs(30)),
        );
        agent.queue_events(vec![opened("a1"), weather_call("a1"), finalized("a1")]);
        let handle = spawn(&agent, &tools);

        handle.send("Weather?").await.unwrap();
        wait_for(&handle, |s| s.status == SessionStatus::AwaitingConfirmation).await;
        handle
            .resolve_confirmation("call-1", Decision::Approve, None)
            .await
            .unwrap();
        tokio::time::timeout(WAIT, async {
            while tools.recorded_executions().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(
            handle.snapshot().await.unwrap().status,
            SessionStatus::Streaming
        );

        handle.clear().await.unwrap();
        let snapshot = wait_for(&handle, settled).await;
        assert!(snapshot.turns.is_empty());
        assert_eq!(tools.recorded_executions().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_running_tool() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(
            MockToolExecutor::new()
                .with_tool("getWeatherInformation", json!("sunny"))
                .with_delay(Duration::from_millis(300)),
        );
        agent.queue_events(vec![opened("a1"), weather_call("a1"), finalized("a1")]);
        let handle = SessionHandle::spawn(
            session(SessionConfig {
                continue_after_tools: true,
            }),
            Arc::clone(&agent),
            Arc::clone(&tools),
        );

        handle.send("Weather?").await.unwrap();
        wait_for(&handle, |s| s.status == SessionStatus::AwaitingConfirmation).await;
        handle
            .resolve_confirmation("call-1", Decision::Approve, None)
            .await
            .unwrap();
        tokio::time::timeout(WAIT, async {
            while tools.recorded_executions().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        handle.stop().await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        let tool = weather(&snapshot).unwrap();
        assert_eq!(tool.state, ToolState::OutputError);
        assert_eq!(tool.error_text.as_deref(), Some(INTERRUPTED));

        // Past the tool's delay: nothing was written back and no stream reopened
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(weather(&snapshot).unwrap().state, ToolState::OutputError);
        assert_eq!(agent.open_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_transcript() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(MockToolExecutor::new());
        agent.queue_items(vec![
            Ok(opened("a1")),
            Ok(text("a1", "Let me th")),
            Err(TransportError::new("connection reset")),
        ]);
        let handle = spawn(&agent, &tools);

        handle.send("eggs").await.unwrap();
        let snapshot = wait_for(&handle, |s| s.status == SessionStatus::Error).await;
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.turns[1].text(), "Let me th");
        assert!(snapshot.turns[1].finalized);
        assert!(snapshot
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("connection reset")));

        // The next send clears the error
        agent.queue_events(vec![opened("a2"), text("a2", "Hi"), finalized("a2")]);
        handle.send("again").await.unwrap();
        let snapshot = wait_for(&handle, |s| s.turns.len() == 4 && settled(s)).await;
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn test_open_failure_enters_error() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(MockToolExecutor::new());
        agent.queue_open_error(TransportError::new("401 Unauthorized"));
        let handle = spawn(&agent, &tools);

        handle.send("eggs").await.unwrap();
        let snapshot = wait_for(&handle, |s| s.status == SessionStatus::Error).await;
        assert_eq!(snapshot.turns.len(), 1);
        assert!(snapshot.status.accepts_input());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(MockToolExecutor::new());
        let tx = agent.queue_channel();
        let handle = spawn(&agent, &tools);

        handle.send("eggs").await.unwrap();
        tx.send(Ok(opened("a1"))).unwrap();
        tx.send(Ok(text("a1", "Beat the"))).unwrap();
        wait_for(&handle, |s| s.turns.len() == 2).await;

        handle.stop().await.unwrap();
        handle.stop().await.unwrap();
        wait_closed(&tx).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.turns[1].text(), "Beat the");
        assert!(snapshot.turns[1].finalized);
    }

    #[tokio::test]
    async fn test_snapshots_are_broadcast() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(MockToolExecutor::new());
        agent.queue_events(vec![opened("a1"), finalized("a1")]);
        let handle = spawn(&agent, &tools);
        let mut rx = handle.subscribe();

        handle.send("eggs").await.unwrap();
        let first = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.turns.len(), 1);
        assert_eq!(first.status, SessionStatus::Streaming);
    }

    #[tokio::test]
    async fn test_dropped_handle_reports_closed() {
        let agent = Arc::new(MockAgent::new());
        let tools = Arc::new(MockToolExecutor::new());
        let handle = spawn(&agent, &tools);
        let mut rx = handle.subscribe();
        drop(handle);
        // Runtime exits once the last command sender is gone
        let closed = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
        assert!(closed.is_err());
    }
}
