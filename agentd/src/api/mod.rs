//! HTTP API routes for the agent service
//!
//! Stateless HTTP access plus the websocket attach endpoint. Handlers reach
//! actors through AppState; the actors own all state.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub mod agent;
pub mod websocket;

use crate::app_state::AppState;

#[derive(Clone)]
pub struct ApiState {
    pub app_state: Arc<AppState>,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        // WebSocket attach (bearer token required as query parameter)
        .route("/ws/agent/{user_id}", get(websocket::agent_websocket))
        // Agent routes
        .route("/agent/{user_id}/set-mode", post(agent::set_mode))
        .route("/agent/{user_id}/messages", get(agent::get_messages))
        .route("/agent/{user_id}/clear-messages", post(agent::clear_messages))
        .route("/agent/{user_id}/commands", get(agent::get_commands))
        .route("/agent/{user_id}/export", get(agent::export))
        .route("/agent/{user_id}/import", post(agent::import))
        .route(
            "/agent/{user_id}/store-user-info",
            post(agent::store_user_info),
        )
        .route(
            "/agent/{user_id}/clear-credential",
            post(agent::clear_credential),
        )
}

async fn health_check(State(_state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "agentd",
        })),
    )
}
