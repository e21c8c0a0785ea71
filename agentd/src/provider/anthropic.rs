//! Anthropic-compatible streaming client
//!
//! Talks to the messages API through the configured gateway and surfaces the
//! SSE stream as `ProviderEvent`s. HTTP 401/403 and provider-reported
//! authentication/permission errors map to `ProviderError::Auth` so the
//! controller can run its bounded refresh-retry; everything else is
//! transport/protocol.

use std::collections::HashMap;

use futures_util::StreamExt;
use serde_json::Value;

use super::{ChatRequest, ModelProvider, ProviderError, ProviderEvent, ProviderStream};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    http: reqwest::Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn request_body(request: &ChatRequest) -> Value {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                })
            })
            .collect();

        serde_json::json!({
            "model": request.model,
            "max_tokens": MAX_TOKENS,
            "system": request.system,
            "messages": super::to_wire_messages(&request.messages),
            "tools": tools,
            "stream": true,
        })
    }
}

#[async_trait::async_trait]
impl ModelProvider for AnthropicProvider {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ProviderStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = Self::request_body(&request);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &request.credential)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 401 || status.as_u16() == 403 {
                ProviderError::Auth(format!("{status}: {detail}"))
            } else {
                ProviderError::Transport(format!("{status}: {detail}"))
            });
        }

        // Parse the SSE byte stream on a task; the returned stream drains the
        // channel so backpressure stays bounded by the parser.
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut parser = SseParser::default();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for item in parser.feed(&chunk) {
                            let failed = item.is_err();
                            if tx.send(item).is_err() {
                                return;
                            }
                            if failed {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Transport(e.to_string())));
                        return;
                    }
                }
            }
            for item in parser.finish() {
                if tx.send(item).is_err() {
                    return;
                }
            }
        });

        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

// ============================================================================
// SSE Parsing
// ============================================================================

#[derive(Debug, Default)]
struct ToolUseAccumulator {
    call_id: String,
    tool_name: String,
    input_json: String,
}

/// Incremental parser over the messages-API event stream. Tool-use input
/// arrives as partial JSON deltas and is assembled per content-block index.
#[derive(Debug, Default)]
struct SseParser {
    buffer: String,
    tool_blocks: HashMap<u64, ToolUseAccumulator>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Result<ProviderEvent, ProviderError>> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut out = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let raw_event = self.buffer[..boundary].to_string();
            self.buffer.drain(..boundary + 2);
            out.extend(self.parse_event(&raw_event));
        }
        out
    }

    fn finish(&mut self) -> Vec<Result<ProviderEvent, ProviderError>> {
        let remainder = std::mem::take(&mut self.buffer);
        if remainder.trim().is_empty() {
            return Vec::new();
        }
        self.parse_event(&remainder)
    }

    fn parse_event(&mut self, raw: &str) -> Vec<Result<ProviderEvent, ProviderError>> {
        let data: String = raw
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect::<Vec<_>>()
            .join("\n");
        if data.is_empty() {
            return Vec::new();
        }

        let value: Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(e) => {
                return vec![Err(ProviderError::Protocol(format!(
                    "unparseable stream event: {e}"
                )))]
            }
        };

        match value.get("type").and_then(Value::as_str) {
            Some("content_block_start") => {
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
                let block = value.get("content_block").cloned().unwrap_or(Value::Null);
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    self.tool_blocks.insert(
                        index,
                        ToolUseAccumulator {
                            call_id: block
                                .get("id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            tool_name: block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            input_json: String::new(),
                        },
                    );
                }
                Vec::new()
            }
            Some("content_block_delta") => {
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
                let delta = value.get("delta").cloned().unwrap_or(Value::Null);
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => delta
                        .get("text")
                        .and_then(Value::as_str)
                        .map(|text| vec![Ok(ProviderEvent::TextDelta(text.to_string()))])
                        .unwrap_or_default(),
                    Some("thinking_delta") => delta
                        .get("thinking")
                        .and_then(Value::as_str)
                        .map(|text| vec![Ok(ProviderEvent::ThinkingDelta(text.to_string()))])
                        .unwrap_or_default(),
                    Some("input_json_delta") => {
                        if let (Some(acc), Some(partial)) = (
                            self.tool_blocks.get_mut(&index),
                            delta.get("partial_json").and_then(Value::as_str),
                        ) {
                            acc.input_json.push_str(partial);
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            Some("content_block_stop") => {
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);
                let Some(acc) = self.tool_blocks.remove(&index) else {
                    return Vec::new();
                };
                let input = if acc.input_json.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    match serde_json::from_str(&acc.input_json) {
                        Ok(input) => input,
                        Err(e) => {
                            return vec![Err(ProviderError::Protocol(format!(
                                "invalid tool input json for {}: {e}",
                                acc.tool_name
                            )))]
                        }
                    }
                };
                vec![Ok(ProviderEvent::ToolCall {
                    call_id: acc.call_id,
                    tool_name: acc.tool_name,
                    input,
                })]
            }
            Some("error") => {
                let error = value.get("error").cloned().unwrap_or(Value::Null);
                let kind = error.get("type").and_then(Value::as_str).unwrap_or("");
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown provider error")
                    .to_string();
                let mapped = if kind == "authentication_error" || kind == "permission_error" {
                    ProviderError::Auth(message)
                } else {
                    ProviderError::Protocol(message)
                };
                vec![Err(mapped)]
            }
            // message_start / message_delta / message_stop / ping carry no
            // content we forward.
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut SseParser, raw: &str) -> Vec<Result<ProviderEvent, ProviderError>> {
        let mut out = parser.feed(raw.as_bytes());
        out.extend(parser.finish());
        out
    }

    #[test]
    fn test_text_deltas() {
        let mut parser = SseParser::default();
        let events = feed_all(
            &mut parser,
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n\
             event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
        );
        assert_eq!(
            events
                .into_iter()
                .map(|e| e.unwrap())
                .collect::<Vec<_>>(),
            vec![
                ProviderEvent::TextDelta("Hel".to_string()),
                ProviderEvent::TextDelta("lo".to_string()),
            ]
        );
    }

    #[test]
    fn test_thinking_is_distinct_channel() {
        let mut parser = SseParser::default();
        let events = feed_all(
            &mut parser,
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"hmm\"}}\n\n",
        );
        assert_eq!(
            events[0].as_ref().unwrap(),
            &ProviderEvent::ThinkingDelta("hmm".to_string())
        );
    }

    #[test]
    fn test_tool_use_assembled_from_partial_json() {
        let mut parser = SseParser::default();
        let events = feed_all(
            &mut parser,
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"add_ball\",\"input\":{}}}\n\n\
             data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"color\\\":\"}}\n\n\
             data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"blue\\\"}\"}}\n\n\
             data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
        );
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            ProviderEvent::ToolCall {
                call_id,
                tool_name,
                input,
            } => {
                assert_eq!(call_id, "toolu_1");
                assert_eq!(tool_name, "add_ball");
                assert_eq!(input, &serde_json::json!({"color": "blue"}));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_auth_error_classified() {
        let mut parser = SseParser::default();
        let events = feed_all(
            &mut parser,
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"authentication_error\",\"message\":\"expired\"}}\n\n",
        );
        assert!(matches!(
            events[0].as_ref().unwrap_err(),
            ProviderError::Auth(_)
        ));
    }

    #[test]
    fn test_overload_error_is_not_auth() {
        let mut parser = SseParser::default();
        let events = feed_all(
            &mut parser,
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"busy\"}}\n\n",
        );
        assert!(matches!(
            events[0].as_ref().unwrap_err(),
            ProviderError::Protocol(_)
        ));
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::default();
        let mut events = parser.feed(b"data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_de");
        assert!(events.is_empty());
        events.extend(parser.feed(b"lta\",\"text\":\"joined\"}}\n\n"));
        assert_eq!(
            events[0].as_ref().unwrap(),
            &ProviderEvent::TextDelta("joined".to_string())
        );
    }
}
