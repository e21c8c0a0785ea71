//! Scripted model provider for tests and local runs without provider keys.
//!
//! Each `stream_chat` call consumes the next scripted turn (or replays a
//! fixed one in repeating mode) and records the request it saw, so tests can
//! assert on credentials and history without a live provider.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use super::{ChatRequest, ModelProvider, ProviderError, ProviderEvent, ProviderStream};

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// A successful stream yielding these events.
    Events(Vec<ProviderEvent>),
    /// `stream_chat` itself fails (e.g. an auth failure at open).
    FailOpen(ProviderError),
    /// The stream yields some events, then fails.
    FailMid {
        events: Vec<ProviderEvent>,
        error: ProviderError,
    },
}

#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<MockTurn>>,
    repeating: Option<MockTurn>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            repeating: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replay the same turn on every call. Used for local runs with
    /// simulated thinking output.
    pub fn repeating(turn: MockTurn) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeating: Some(turn),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Simulated thinking + response, mirroring the thinking side channel.
    pub fn thinking_demo() -> Self {
        Self::repeating(MockTurn::Events(vec![
            ProviderEvent::ThinkingDelta("Let me think about this request...".to_string()),
            ProviderEvent::TextDelta(
                "Thinking tokens are working; the indicator you saw came from the side channel."
                    .to_string(),
            ),
        ]))
    }

    /// Requests observed so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("mock lock poisoned").clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("mock lock poisoned").len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ProviderStream, ProviderError> {
        self.requests
            .lock()
            .expect("mock lock poisoned")
            .push(request);

        let turn = match self.repeating.clone() {
            Some(turn) => turn,
            None => self
                .script
                .lock()
                .expect("mock lock poisoned")
                .pop_front()
                .ok_or_else(|| ProviderError::Protocol("mock script exhausted".to_string()))?,
        };

        match turn {
            MockTurn::FailOpen(error) => Err(error),
            MockTurn::Events(events) => {
                Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
            }
            MockTurn::FailMid { events, error } => {
                let items: Vec<Result<ProviderEvent, ProviderError>> = events
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(error)))
                    .collect();
                Ok(Box::pin(stream::iter(items)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use shared_types::Message;

    fn request(credential: &str) -> ChatRequest {
        ChatRequest {
            credential: credential.to_string(),
            model: "mock-model".to_string(),
            system: "test".to_string(),
            messages: vec![Message::user_text("hi")],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_scripted_turns_consumed_in_order() {
        let provider = MockProvider::new(vec![
            MockTurn::Events(vec![ProviderEvent::TextDelta("one".to_string())]),
            MockTurn::FailOpen(ProviderError::Auth("expired".to_string())),
        ]);

        let mut stream = provider.stream_chat(request("tok")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, ProviderEvent::TextDelta("one".to_string()));

        let err = provider.stream_chat(request("tok")).await.err().unwrap();
        assert!(err.is_auth_failure());

        let err = provider.stream_chat(request("tok")).await.err().unwrap();
        assert!(matches!(err, ProviderError::Protocol(_)));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_records_credentials_seen() {
        let provider = MockProvider::new(vec![
            MockTurn::Events(vec![]),
            MockTurn::Events(vec![]),
        ]);
        let _ = provider.stream_chat(request("tok-a")).await.unwrap();
        let _ = provider.stream_chat(request("tok-b")).await.unwrap();

        let creds: Vec<String> = provider
            .requests()
            .into_iter()
            .map(|r| r.credential)
            .collect();
        assert_eq!(creds, vec!["tok-a".to_string(), "tok-b".to_string()]);
    }
}
