//! Context tools: local time and the weather demo.
//!
//! `get_weather_information` is the confirmation-required example: it has a
//! real implementation, but execution is deferred until the user approves
//! the pending call.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::{Tool, ToolContext, ToolError, ToolOutput};

// ============================================================================
// get_local_time
// ============================================================================

pub struct GetLocalTimeTool;

#[async_trait]
impl Tool for GetLocalTimeTool {
    fn name(&self) -> &str {
        "get_local_time"
    }

    fn description(&self) -> &str {
        "Get the current time (UTC, RFC 3339)"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _ctx: &mut ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::ok(serde_json::json!({
            "time": Utc::now().to_rfc3339(),
        })))
    }
}

// ============================================================================
// get_weather_information
// ============================================================================

pub struct GetWeatherInformationTool;

#[async_trait]
impl Tool for GetWeatherInformationTool {
    fn name(&self) -> &str {
        "get_weather_information"
    }

    fn description(&self) -> &str {
        "Get current weather information for a city. Requires user confirmation before running."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "City to look up"
                }
            },
            "required": ["city"]
        })
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let city = args
            .get("city")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::new("Missing 'city' parameter"))?;

        // Demo implementation; swap in a real weather client here.
        Ok(ToolOutput::ok(serde_json::json!({
            "city": city,
            "report": format!("The weather in {city} is sunny"),
        })))
    }
}

// ============================================================================
// Tests
// ============================================================================
