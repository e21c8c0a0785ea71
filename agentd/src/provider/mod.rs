//! Model provider abstraction
//!
//! The streaming controller talks to an LLM through the `ModelProvider`
//! trait: one call opens one streamed model turn. `AnthropicProvider` is the
//! production implementation (SSE over the gateway); `MockProvider` drives
//! tests with scripted turns.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;

use shared_types::{Message, MessagePart, Role, ToolCallState, ToolDef};

pub mod anthropic;
pub mod mock;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockTurn};

/// One request to the model provider for a single streamed turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub credential: String,
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDef>,
}

/// Incremental events from the model stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Primary output channel.
    TextDelta(String),
    /// Reasoning trace; forwarded to clients as a distinct event type.
    ThinkingDelta(String),
    /// The model requested a tool invocation.
    ToolCall {
        call_id: String,
        tool_name: String,
        input: Value,
    },
}

/// Stream of provider events for one turn.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

#[derive(Debug, thiserror::Error, Clone)]
pub enum ProviderError {
    /// Authorization failure reported by the provider. The only error class
    /// eligible for the bounded credential-refresh retry.
    #[error("Provider authorization failure: {0}")]
    Auth(String),

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider protocol error: {0}")]
    Protocol(String),
}

impl ProviderError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ProviderError::Auth(_))
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Open one streamed model turn.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ProviderStream, ProviderError>;
}

// ============================================================================
// Wire Conversion
// ============================================================================

/// Convert the message log to provider wire messages.
///
/// Tool calls live inside assistant messages in our log; on the wire an
/// assistant `tool_use` block must be followed by a user message carrying the
/// matching `tool_result` blocks, so resolved calls are split out here.
/// Messages with no convertible content are dropped (providers reject empty
/// content).
pub fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                // System text is carried in the request's system field.
                continue;
            }
            Role::User => {
                let text = message.text();
                if !text.is_empty() {
                    wire.push(serde_json::json!({
                        "role": "user",
                        "content": [{"type": "text", "text": text}],
                    }));
                }
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                let mut results = Vec::new();
                for part in &message.parts {
                    match part {
                        MessagePart::Text { content } => {
                            if !content.is_empty() {
                                blocks.push(serde_json::json!({
                                    "type": "text",
                                    "text": content,
                                }));
                            }
                        }
                        MessagePart::ToolCall {
                            tool_name,
                            call_id,
                            input,
                            output_state,
                            output,
                        } => {
                            // The wire requires use/result pairs; a call still
                            // pending confirmation is omitted entirely.
                            let Some(output) = output else { continue };
                            blocks.push(serde_json::json!({
                                "type": "tool_use",
                                "id": call_id,
                                "name": tool_name,
                                "input": input,
                            }));
                            results.push(serde_json::json!({
                                "type": "tool_result",
                                "tool_use_id": call_id,
                                "content": output_text(output),
                                "is_error": *output_state == ToolCallState::Error,
                            }));
                        }
                    }
                }
                if !blocks.is_empty() {
                    wire.push(serde_json::json!({
                        "role": "assistant",
                        "content": blocks,
                    }));
                }
                if !results.is_empty() {
                    wire.push(serde_json::json!({
                        "role": "user",
                        "content": results,
                    }));
                }
            }
        }
    }

    wire
}

fn output_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
