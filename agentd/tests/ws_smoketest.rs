//! WebSocket attach smoke test
//!
//! Boots the real server on an ephemeral port and drives the attach
//! handshake plus one streamed turn over a live socket.

use futures_util::{SinkExt, Stream, StreamExt};
use ractor::Actor;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite;

use agentd::actors::credentials::{
    put_credential, CredentialStoreActor, CredentialStoreArguments, CredentialStoreMsg,
};
use agentd::actors::state_store::{StateStoreActor, StateStoreArguments};
use agentd::api;
use agentd::app_state::AppState;
use agentd::auth::ScriptedRefresher;
use agentd::provider::{MockProvider, MockTurn, ProviderEvent};
use agentd::tools::ToolRegistry;
use ractor::ActorRef;

async fn serve(
    provider_turns: Vec<MockTurn>,
) -> (SocketAddr, ActorRef<CredentialStoreMsg>) {
    let (state_store, _handle) =
        Actor::spawn(None, StateStoreActor, StateStoreArguments::InMemory)
            .await
            .unwrap();
    let (credential_store, _handle) = Actor::spawn(
        None,
        CredentialStoreActor,
        CredentialStoreArguments::InMemory,
    )
    .await
    .unwrap();

    let refresher = Arc::new(ScriptedRefresher::new(
        credential_store.clone(),
        "u1",
        vec![],
    ));
    let app_state = Arc::new(AppState::new(
        state_store,
        credential_store.clone(),
        Arc::new(MockProvider::new(provider_turns)),
        refresher,
        Arc::new(ToolRegistry::new()),
        "mock-model".to_string(),
        Duration::from_secs(3600),
    ));

    let app = api::router().with_state(api::ApiState { app_state });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, credential_store)
}

async fn next_json(
    socket: &mut (impl Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin),
) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for ws message")
            .expect("socket closed")
            .expect("socket error");
        if let tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("invalid json from server");
        }
    }
}

#[tokio::test]
async fn test_attach_without_token_is_rejected() {
    let (addr, _creds) = serve(vec![]).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/agent/u1")).await;
    match result {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP 401 rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_attach_sends_ready_then_snapshot() {
    let (addr, _creds) = serve(vec![]).await;

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws/agent/u1?token=tok"))
            .await
            .expect("connect failed");

    let ready = next_json(&mut socket).await;
    assert_eq!(ready["type"], "ready");

    let snapshot = next_json(&mut socket).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["state"]["mode"], "act");
}

#[tokio::test]
async fn test_message_turn_streams_over_socket() {
    let (addr, creds) = serve(vec![MockTurn::Events(vec![
        ProviderEvent::ThinkingDelta("hmm".to_string()),
        ProviderEvent::TextDelta("hello there".to_string()),
    ])])
    .await;

    put_credential(&creds, "u1", "tok").await.unwrap().unwrap();

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws/agent/u1?token=tok"))
            .await
            .expect("connect failed");

    // Skip the handshake events.
    assert_eq!(next_json(&mut socket).await["type"], "ready");
    assert_eq!(next_json(&mut socket).await["type"], "snapshot");

    socket
        .send(tungstenite::Message::Text(
            r#"{"type":"message","text":"hi"}"#.to_string(),
        ))
        .await
        .unwrap();

    let mut saw_thinking = false;
    let mut saw_delta = false;
    let mut assistant_text = None;
    while assistant_text.is_none() {
        let msg = next_json(&mut socket).await;
        match msg["type"].as_str().unwrap_or_default() {
            "thinking" => saw_thinking = true,
            "response_delta" => saw_delta = true,
            "message" => {
                let message = &msg["message"];
                if message["role"] == "assistant" {
                    assistant_text =
                        Some(message["parts"][0]["content"].as_str().unwrap().to_string());
                }
            }
            _ => {}
        }
    }

    assert!(saw_thinking);
    assert!(saw_delta);
    assert_eq!(assistant_text.as_deref(), Some("hello there"));
}

#[tokio::test]
async fn test_ping_pong() {
    let (addr, _creds) = serve(vec![]).await;

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws/agent/u1?token=tok"))
            .await
            .expect("connect failed");

    assert_eq!(next_json(&mut socket).await["type"], "ready");
    assert_eq!(next_json(&mut socket).await["type"], "snapshot");

    socket
        .send(tungstenite::Message::Text(
            r#"{"type":"ping"}"#.to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "pong");
}
