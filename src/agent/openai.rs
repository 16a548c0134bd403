//! `OpenAI`-compatible streaming chat completions

use super::tools::{LocalTools, ToolDefinition};
use super::writer::{CompletedCall, TurnWriter};
use super::SYSTEM_PROMPT;
use crate::config::Config;
use crate::runtime::{AgentStream, AgentSubscription, ToolExecutor};
use crate::session::{ExecutionError, TransportError};
use crate::tracker::ConfirmationPolicy;
use crate::transcript::{AgentEvent, Part, Role, ToolState, Turn, TurnId};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Upper bound on model round trips within one assistant turn
const MAX_ROUNDS: usize = 8;

/// Terminal `data` payload of a completion stream
const DONE: &str = "[DONE]";

/// Agent backed by a chat completions endpoint
pub struct OpenAiAgent {
    client: Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
    policy: Arc<ConfirmationPolicy>,
    tools: LocalTools,
}

impl OpenAiAgent {
    pub fn new(config: &Config, policy: Arc<ConfirmationPolicy>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::new(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            policy,
            tools: LocalTools::new(),
        })
    }

    fn context(&self, api_key: String) -> StreamContext {
        StreamContext {
            client: self.client.clone(),
            api_key,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            policy: Arc::clone(&self.policy),
            tools: self.tools.clone(),
        }
    }
}

#[async_trait]
impl AgentStream for OpenAiAgent {
    async fn open(&self, prior_turns: Vec<Turn>) -> Result<AgentSubscription, TransportError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| TransportError::new("OpenAI API key not configured"))?;

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let context = self.context(api_key);
        let token = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!("Agent request cancelled");
                }
                () = context.run(prior_turns, tx) => {}
            }
        });

        Ok(AgentSubscription::with_cancel(
            ReceiverStream::new(rx).boxed(),
            cancel,
        ))
    }
}

type EventSender = mpsc::Sender<Result<AgentEvent, TransportError>>;

/// Everything one background stream needs, detached from the agent
struct StreamContext {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    policy: Arc<ConfirmationPolicy>,
    tools: LocalTools,
}

impl StreamContext {
    async fn run(self, prior_turns: Vec<Turn>, tx: EventSender) {
        if let Err(e) = self.produce_turn(prior_turns, &tx).await {
            tracing::warn!(error = %e, "Agent stream failed");
            let _ = tx.send(Err(e)).await;
        }
    }

    async fn produce_turn(
        &self,
        prior_turns: Vec<Turn>,
        tx: &EventSender,
    ) -> Result<(), TransportError> {
        let mut messages = translate_turns(&prior_turns);
        let definitions = self.tools.definitions();
        let mut writer = TurnWriter::new(TurnId::generate());
        emit(tx, writer.open()).await?;

        for round in 0..MAX_ROUNDS {
            let reply = self.stream_round(&messages, &definitions, &mut writer, tx).await?;
            let (events, calls) = writer.finish_round();
            for event in events {
                emit(tx, event).await?;
            }
            if calls.is_empty() {
                break;
            }

            messages.push(assistant_message(reply, &calls));
            let mut gated = false;
            for call in &calls {
                if self.policy.requires_confirmation(&call.tool_name) {
                    gated = true;
                    continue;
                }
                let outcome = self
                    .tools
                    .execute(&call.tool_name, call.input.clone(), CancellationToken::new())
                    .await;
                tracing::info!(
                    tool = %call.tool_name,
                    call_id = %call.call_id,
                    ok = outcome.is_ok(),
                    "Ran automatic tool"
                );
                messages.push(tool_message(&call.call_id, &outcome));
                emit(tx, writer.tool_result(call, &outcome)).await?;
            }
            if gated {
                tracing::info!(round, "Waiting for tool confirmation");
                break;
            }
        }

        emit(tx, writer.finalize()).await
    }

    /// Run one streamed completion, returning the assistant text it produced
    async fn stream_round(
        &self,
        messages: &[ChatMessage],
        definitions: &[ToolDefinition],
        writer: &mut TurnWriter,
        tx: &EventSender,
    ) -> Result<String, TransportError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tools: definitions.iter().map(ChatTool::from).collect(),
            stream: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::new(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    TransportError::new(format!("Connection failed: {e}"))
                } else {
                    TransportError::new(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error(status.as_u16(), &body));
        }

        self.read_stream(response.bytes_stream(), writer, tx).await
    }

    /// Feed an event-stream body through `writer`, returning the assistant text
    async fn read_stream<S, B, E>(
        &self,
        body: S,
        writer: &mut TurnWriter,
        tx: &EventSender,
    ) -> Result<String, TransportError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let mut text = String::new();
        let mut events = Box::pin(body.eventsource());
        while let Some(event) = events.next().await {
            let event =
                event.map_err(|e| TransportError::new(format!("Failed to read response: {e}")))?;
            if event.data == DONE {
                break;
            }
            self.apply_data(&event.data, &mut text, writer, tx).await?;
        }
        Ok(text)
    }

    /// Apply one SSE `data` payload
    async fn apply_data(
        &self,
        data: &str,
        text: &mut String,
        writer: &mut TurnWriter,
        tx: &EventSender,
    ) -> Result<(), TransportError> {
        let chunk: ChatChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable chunk");
                return Ok(());
            }
        };
        if let Some(error) = chunk.error {
            return Err(TransportError::new(error.message));
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.as_deref() {
                text.push_str(content);
                if let Some(event) = writer.text_delta(content) {
                    emit(tx, event).await?;
                }
            }
            for call in choice.delta.tool_calls {
                let function = call.function.unwrap_or_default();
                if let Some(event) = writer.tool_delta(
                    call.index,
                    call.id.as_deref(),
                    function.name.as_deref(),
                    function.arguments.as_deref(),
                ) {
                    emit(tx, event).await?;
                }
            }
        }
        Ok(())
    }
}

async fn emit(tx: &EventSender, event: AgentEvent) -> Result<(), TransportError> {
    tx.send(Ok(event))
        .await
        .map_err(|_| TransportError::new("subscriber dropped"))
}

fn http_error(status: u16, body: &str) -> TransportError {
    if let Ok(error) = serde_json::from_str::<ErrorResponse>(body) {
        let message = error.error.message;
        return TransportError::new(match status {
            401 => format!("Authentication failed: {message}"),
            429 => format!("Rate limit exceeded: {message}"),
            400 => format!("Invalid request: {message}"),
            500..=599 => format!("Server error: {message}"),
            _ => format!("HTTP {status}: {message}"),
        });
    }
    TransportError::new(format!("HTTP {status} error: {body}"))
}

// ============================================================================
// Transcript translation
// ============================================================================

/// Translate the transcript into chat messages, system prompt first.
///
/// Tool calls without a result are left out; the endpoint rejects an
/// assistant tool call that is not answered.
fn translate_turns(turns: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::text("system", SYSTEM_PROMPT)];
    for turn in turns {
        match turn.role {
            Role::User => messages.push(ChatMessage::text("user", turn.text())),
            Role::System => messages.push(ChatMessage::text("system", turn.text())),
            Role::Assistant => messages.extend(translate_assistant(turn)),
        }
    }
    messages
}

fn translate_assistant(turn: &Turn) -> Vec<ChatMessage> {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for part in &turn.parts {
        match part {
            Part::Text(text) => text_parts.push(text.text.clone()),
            Part::ToolInvocation(tool) if tool.state.is_terminal() => {
                tool_calls.push(ChatToolCall {
                    id: tool.call_id.clone(),
                    r#type: "function".to_string(),
                    function: ChatFunctionCall {
                        name: tool.tool_name.clone(),
                        arguments: serde_json::to_string(&tool.input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
                let content = match tool.state {
                    ToolState::OutputError => {
                        format!("Error: {}", tool.error_text.as_deref().unwrap_or_default())
                    }
                    _ => output_text(tool.output.as_ref()),
                };
                tool_results.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: Some(tool.call_id.clone()),
                });
            }
            Part::ToolInvocation(_) => {}
        }
    }

    let mut messages = Vec::new();
    if !text_parts.is_empty() || !tool_calls.is_empty() {
        messages.push(ChatMessage {
            role: "assistant".to_string(),
            content: (!text_parts.is_empty()).then(|| text_parts.join("\n")),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        });
    }
    messages.extend(tool_results);
    messages
}

fn assistant_message(text: String, calls: &[CompletedCall]) -> ChatMessage {
    ChatMessage {
        role: "assistant".to_string(),
        content: (!text.is_empty()).then_some(text),
        tool_calls: Some(
            calls
                .iter()
                .map(|call| ChatToolCall {
                    id: call.call_id.clone(),
                    r#type: "function".to_string(),
                    function: ChatFunctionCall {
                        name: call.tool_name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
        ),
        tool_call_id: None,
    }
}

fn tool_message(
    call_id: &str,
    outcome: &Result<Value, ExecutionError>,
) -> ChatMessage {
    let content = match outcome {
        Ok(output) => output_text(Some(output)),
        Err(e) => format!("Error: {}", e.message),
    };
    ChatMessage {
        role: "tool".to_string(),
        content: Some(content),
        tool_calls: None,
        tool_call_id: Some(call_id.to_string()),
    }
}

fn output_text(output: Option<&Value>) -> String {
    match output {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatTool {
    r#type: String,
    function: ChatFunction,
}

impl From<&ToolDefinition> for ChatTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            r#type: "function".to_string(),
            function: ChatFunction {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.input_schema.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
struct ChatToolCall {
    id: String,
    r#type: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    /// Some providers report failures inside the event stream
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}
