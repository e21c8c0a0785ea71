//! Agent HTTP endpoints.
//!
//! Validation failures reject before any state mutation; the messages
//! endpoint is deliberately fail-soft (always an array) so client renderers
//! never crash on a malformed response.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::actors::agent::{AgentError, AgentMsg};
use crate::actors::state_store;
use crate::api::ApiState;
use shared_types::{AgentMode, ExportDocument, ImportOptions, UserProfile};

fn agent_error_response(e: AgentError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        AgentError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        AgentError::Forbidden(_) => StatusCode::FORBIDDEN,
        AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AgentError::NotFound(_) => StatusCode::NOT_FOUND,
        AgentError::Provider(_) | AgentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "error": e.to_string(),
            "success": false,
        })),
    )
}

fn unreachable_agent(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": format!("Agent unavailable: {e}"),
            "success": false,
        })),
    )
}

// ============================================================================
// set-mode
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: Option<String>,
    #[serde(default)]
    pub force: bool,
    /// Accepted for client compatibility after a history clear; the
    /// transition itself is identical.
    #[serde(default, rename = "after_history_clear")]
    pub _after_history_clear: bool,
}

pub async fn set_mode(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
    Json(req): Json<SetModeRequest>,
) -> impl IntoResponse {
    // Validate before touching any state.
    let mode = match req.mode.as_deref().and_then(AgentMode::parse) {
        Some(mode) => mode,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Invalid mode specified. Valid modes are: plan, act",
                    "success": false,
                })),
            )
                .into_response();
        }
    };

    let agent = match state.app_state.get_or_create_agent(&user_id).await {
        Ok(agent) => agent,
        Err(e) => return unreachable_agent(e).into_response(),
    };

    match ractor::call!(agent, |reply| AgentMsg::SetMode {
        mode,
        force: req.force,
        reply,
    }) {
        Ok(Ok(change)) => (StatusCode::OK, Json(serde_json::to_value(change).unwrap_or_default()))
            .into_response(),
        Ok(Err(e)) => agent_error_response(e).into_response(),
        Err(e) => unreachable_agent(e).into_response(),
    }
}

// ============================================================================
// messages
// ============================================================================

/// ALWAYS returns a JSON array; any internal failure degrades to `[]`.
pub async fn get_messages(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    let store = state.app_state.state_store();
    match state_store::list_messages(&store, user_id).await {
        Ok(Ok(messages)) => Json(serde_json::to_value(messages).unwrap_or_else(|_| json!([]))),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Message listing failed, returning empty array");
            Json(json!([]))
        }
        Err(e) => {
            tracing::error!(error = %e, "State store unreachable, returning empty array");
            Json(json!([]))
        }
    }
}

pub async fn clear_messages(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    let agent = match state.app_state.get_or_create_agent(&user_id).await {
        Ok(agent) => agent,
        Err(e) => return unreachable_agent(e).into_response(),
    };

    match ractor::call!(agent, |reply| AgentMsg::ClearMessages { reply }) {
        Ok(Ok(removed)) => (
            StatusCode::OK,
            Json(json!({"success": true, "removed": removed})),
        )
            .into_response(),
        Ok(Err(e)) => agent_error_response(e).into_response(),
        Err(e) => unreachable_agent(e).into_response(),
    }
}

// ============================================================================
// commands (renderer drain)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CommandsQuery {
    #[serde(default)]
    pub since_seq: i64,
}

pub async fn get_commands(
    Path(user_id): Path<String>,
    Query(query): Query<CommandsQuery>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    let store = state.app_state.state_store();
    match state_store::list_command_batches(&store, user_id, query.since_seq).await {
        Ok(Ok(batches)) => (StatusCode::OK, Json(serde_json::to_value(batches).unwrap_or_default()))
            .into_response(),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string(), "success": false})),
        )
            .into_response(),
        Err(e) => unreachable_agent(e).into_response(),
    }
}

// ============================================================================
// export / import
// ============================================================================

pub async fn export(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    let agent = match state.app_state.get_or_create_agent(&user_id).await {
        Ok(agent) => agent,
        Err(e) => return unreachable_agent(e).into_response(),
    };

    match ractor::call!(agent, |reply| AgentMsg::Export { reply }) {
        Ok(Ok(document)) => (
            StatusCode::OK,
            [(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"agent-export-{user_id}.json\""),
            )],
            Json(serde_json::to_value(document).unwrap_or_default()),
        )
            .into_response(),
        Ok(Err(e)) => agent_error_response(e).into_response(),
        Err(e) => unreachable_agent(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub data: ExportDocument,
    #[serde(default)]
    pub options: ImportOptions,
}

pub async fn import(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
    Json(req): Json<ImportRequest>,
) -> impl IntoResponse {
    let agent = match state.app_state.get_or_create_agent(&user_id).await {
        Ok(agent) => agent,
        Err(e) => return unreachable_agent(e).into_response(),
    };

    match ractor::call!(agent, |reply| AgentMsg::Import {
        document: Box::new(req.data.clone()),
        options: req.options.clone(),
        reply,
    }) {
        Ok(Ok(summary)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "messages_imported": summary.messages_imported,
                "commands_imported": summary.commands_imported,
                "scheduled_tasks_imported": summary.scheduled_tasks_imported,
            })),
        )
            .into_response(),
        Ok(Err(e)) => agent_error_response(e).into_response(),
        Err(e) => unreachable_agent(e).into_response(),
    }
}

// ============================================================================
// store-user-info / clear-credential
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StoreUserInfoRequest {
    pub user_id: String,
    pub credential: String,
    pub email: String,
    pub credits: f64,
    pub payment_method: String,
}

pub async fn store_user_info(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
    Json(req): Json<StoreUserInfoRequest>,
) -> impl IntoResponse {
    if req.user_id != user_id {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Body user_id does not match path",
                "success": false,
            })),
        )
            .into_response();
    }
    if req.credential.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "credential must not be empty",
                "success": false,
            })),
        )
            .into_response();
    }

    let agent = match state.app_state.get_or_create_agent(&user_id).await {
        Ok(agent) => agent,
        Err(e) => return unreachable_agent(e).into_response(),
    };

    let profile = UserProfile {
        id: req.user_id,
        email: req.email,
        credits: req.credits,
        payment_method: req.payment_method,
    };

    match ractor::call!(agent, |reply| AgentMsg::StoreUserInfo {
        profile: profile.clone(),
        credential: req.credential.clone(),
        reply,
    }) {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({"success": true}))).into_response(),
        Ok(Err(e)) => agent_error_response(e).into_response(),
        Err(e) => unreachable_agent(e).into_response(),
    }
}

pub async fn clear_credential(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if presented.is_empty() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Missing bearer credential",
                "success": false,
            })),
        )
            .into_response();
    }

    let agent = match state.app_state.get_or_create_agent(&user_id).await {
        Ok(agent) => agent,
        Err(e) => return unreachable_agent(e).into_response(),
    };

    match ractor::call!(agent, |reply| AgentMsg::ClearCredential {
        presented_token: presented.clone(),
        reply,
    }) {
        Ok(Ok(removed)) => (
            StatusCode::OK,
            Json(json!({"success": true, "removed": removed})),
        )
            .into_response(),
        Ok(Err(e)) => agent_error_response(e).into_response(),
        Err(e) => unreachable_agent(e).into_response(),
    }
}
