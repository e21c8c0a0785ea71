//! WebSocket attach endpoint
//!
//! A client attaches to its agent on a user-scoped path; connection
//! establishment requires a bearer credential (token query parameter). The
//! agent sends `ready` once its profile load completes; after that every
//! persisted mutation arrives as a snapshot or finer-grained event.

use std::collections::HashMap;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::actors::agent::AgentMsg;
use crate::api::ApiState;
use shared_types::{WsClientMsg, WsServerMsg};

/// WebSocket connection handler for /ws/agent/{user_id}
pub async fn agent_websocket(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<ApiState>,
) -> Response {
    let token = query.get("token").cloned().unwrap_or_default();
    if token.trim().is_empty() {
        return (StatusCode::UNAUTHORIZED, "bearer credential required").into_response();
    }

    tracing::info!(user_id = %user_id, "New agent WebSocket connection");
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: ApiState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let agent = match state.app_state.get_or_create_agent(&user_id).await {
        Ok(agent) => agent,
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Failed to reach agent");
            let msg = WsServerMsg::Error {
                message: "Agent unavailable".to_string(),
            };
            if let Ok(json) = serde_json::to_string(&msg) {
                let _ = ws_sender.send(WsMessage::Text(json.into())).await;
            }
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<WsServerMsg>();
    // Local channel for replies that target only this connection (pong,
    // parse errors) without a round trip through the actor.
    let local_tx = tx.clone();

    let connection_id = match ractor::call!(agent, |reply| AgentMsg::Attach {
        sink: tx,
        reply,
    }) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Attach failed");
            return;
        }
    };

    // Fan out actor events to the socket.
    let forward = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize WS message");
                    continue;
                }
            };
            if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound loop: one logical operation at a time, in arrival order.
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            WsMessage::Text(text) => match serde_json::from_str::<WsClientMsg>(text.as_str()) {
                Ok(WsClientMsg::Message { text }) => {
                    // The reply resolves when the turn completes; errors were
                    // already broadcast by the actor.
                    let _ = ractor::call!(agent, |reply| AgentMsg::UserMessage {
                        text: text.clone(),
                        reply,
                    });
                }
                Ok(WsClientMsg::ToolResult { call_id, output }) => {
                    let _ = ractor::call!(agent, |reply| AgentMsg::ToolDecision {
                        call_id: call_id.clone(),
                        output: output.clone(),
                        reply,
                    });
                }
                Ok(WsClientMsg::Ping) => {
                    let _ = local_tx.send(WsServerMsg::Pong);
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Invalid WebSocket message");
                    let _ = local_tx.send(WsServerMsg::Error {
                        message: "Invalid message format".to_string(),
                    });
                }
            },
            WsMessage::Close(reason) => {
                tracing::info!(
                    user_id = %user_id,
                    reason = ?reason,
                    "WebSocket closing"
                );
                break;
            }
            _ => {}
        }
    }

    let _ = agent.cast(AgentMsg::Detach { connection_id });
    forward.abort();
}
