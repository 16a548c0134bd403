//! Tools the recipe assistant may call

use crate::runtime::ToolExecutor;
use crate::session::ExecutionError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub const GET_WEATHER_INFORMATION: &str = "getWeatherInformation";
pub const GET_LOCAL_TIME: &str = "getLocalTime";

/// Tool definition offered to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct LocationInput {
    #[serde(alias = "city")]
    location: String,
}

/// In-process implementations of every tool the assistant knows
#[derive(Debug, Clone, Default)]
pub struct LocalTools {
    /// Fixed clock for tests
    now: Option<DateTime<Local>>,
}

impl LocalTools {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn at(now: DateTime<Local>) -> Self {
        Self { now: Some(now) }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: GET_WEATHER_INFORMATION.to_string(),
                description: "Show the weather in a given city to the user".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "city": { "type": "string", "description": "City name" }
                    },
                    "required": ["city"]
                }),
            },
            ToolDefinition {
                name: GET_LOCAL_TIME.to_string(),
                description: "Get the local time for a specified location".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "location": { "type": "string", "description": "Place name" }
                    },
                    "required": ["location"]
                }),
            },
        ]
    }

    pub fn knows(&self, tool_name: &str) -> bool {
        matches!(tool_name, GET_WEATHER_INFORMATION | GET_LOCAL_TIME)
    }

    fn run(&self, tool_name: &str, input: Value) -> Result<Value, ExecutionError> {
        let parsed: LocationInput = serde_json::from_value(input)
            .map_err(|e| ExecutionError::new(format!("Invalid input for {tool_name}: {e}")))?;
        match tool_name {
            GET_WEATHER_INFORMATION => Ok(Value::String(format!(
                "The weather in {} is sunny",
                parsed.location
            ))),
            GET_LOCAL_TIME => {
                let now = self.now.unwrap_or_else(Local::now);
                Ok(Value::String(format!(
                    "It is {} in {}",
                    now.format("%H:%M"),
                    parsed.location
                )))
            }
            other => Err(ExecutionError::new(format!("Unknown tool: {other}"))),
        }
    }
}

#[async_trait]
impl ToolExecutor for LocalTools {
    async fn execute(
        &self,
        tool_name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::new("cancelled"));
        }
        tracing::debug!(tool = tool_name, "Running local tool");
        self.run(tool_name, input)
    }
}
