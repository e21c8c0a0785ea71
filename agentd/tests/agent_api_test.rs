//! Agent API Integration Tests
//!
//! Full HTTP request/response cycles against the axum router with scripted
//! provider and refresher.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use ractor::Actor;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use agentd::actors::credentials::{CredentialStoreActor, CredentialStoreArguments};
use agentd::actors::state_store::{StateStoreActor, StateStoreArguments};
use agentd::api;
use agentd::app_state::AppState;
use agentd::auth::ScriptedRefresher;
use agentd::provider::MockProvider;
use agentd::tools::ToolRegistry;

async fn setup_test_app() -> axum::Router {
    let (state_store, _handle) =
        Actor::spawn(None, StateStoreActor, StateStoreArguments::InMemory)
            .await
            .expect("Failed to create state store");
    let (credential_store, _handle) = Actor::spawn(
        None,
        CredentialStoreActor,
        CredentialStoreArguments::InMemory,
    )
    .await
    .expect("Failed to create credential store");

    let refresher = Arc::new(ScriptedRefresher::new(
        credential_store.clone(),
        "test-user",
        vec![],
    ));
    let app_state = Arc::new(AppState::new(
        state_store,
        credential_store,
        Arc::new(MockProvider::new(vec![])),
        refresher,
        Arc::new(ToolRegistry::new()),
        "mock-model".to_string(),
        Duration::from_secs(3600),
    ));

    let api_state = api::ApiState { app_state };
    api::router().with_state(api_state)
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup_test_app().await;
    let (status, body) = json_response(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "agentd");
}

#[tokio::test]
async fn test_set_mode_roundtrip() {
    let app = setup_test_app().await;

    let (status, body) = json_response(
        &app,
        post_json("/agent/u1/set-mode", json!({"mode": "plan"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous_mode"], "act");
    assert_eq!(body["current_mode"], "plan");
    assert_eq!(body["success"], true);

    let (status, body) = json_response(
        &app,
        post_json("/agent/u1/set-mode", json!({"mode": "act"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous_mode"], "plan");
    assert_eq!(body["current_mode"], "act");
}

#[tokio::test]
async fn test_set_mode_rejects_invalid_mode() {
    let app = setup_test_app().await;

    for bad in [json!({"mode": "chaos"}), json!({})] {
        let (status, body) = json_response(&app, post_json("/agent/u1/set-mode", bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn test_set_mode_rejects_wrong_method() {
    let app = setup_test_app().await;
    let response = app
        .clone()
        .oneshot(get("/agent/u1/set-mode"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_get_messages_always_returns_array() {
    let app = setup_test_app().await;
    let (status, body) = json_response(&app, get("/agent/u1/messages")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_array());
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_get_commands_returns_array() {
    let app = setup_test_app().await;
    let (status, body) = json_response(&app, get("/agent/u1/commands")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_array());
}

#[tokio::test]
async fn test_store_user_info_and_clear_credential() {
    let app = setup_test_app().await;

    // user_id mismatch between path and body is rejected before mutation.
    let (status, _) = json_response(
        &app,
        post_json(
            "/agent/u1/store-user-info",
            json!({
                "user_id": "someone-else",
                "credential": "tok",
                "email": "u@example.com",
                "credits": 10.0,
                "payment_method": "invoice",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = json_response(
        &app,
        post_json(
            "/agent/u1/store-user-info",
            json!({
                "user_id": "u1",
                "credential": "tok-secret",
                "email": "u@example.com",
                "credits": 10.0,
                "payment_method": "invoice",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // Missing bearer: 401.
    let (status, _) = json_response(
        &app,
        post_json("/agent/u1/clear-credential", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Wrong bearer: 403, credential untouched.
    let req = Request::builder()
        .method("POST")
        .uri("/agent/u1/clear-credential")
        .header("Content-Type", "application/json")
        .header("Authorization", "Bearer wrong-token")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Matching bearer clears it.
    let req = Request::builder()
        .method("POST")
        .uri("/agent/u1/clear-credential")
        .header("Content-Type", "application/json")
        .header("Authorization", "Bearer tok-secret")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);
}

#[tokio::test]
async fn test_export_contains_profile_but_never_credential() {
    let app = setup_test_app().await;

    let (status, _) = json_response(
        &app,
        post_json(
            "/agent/u1/store-user-info",
            json!({
                "user_id": "u1",
                "credential": "tok-super-secret",
                "email": "u@example.com",
                "credits": 10.0,
                "payment_method": "invoice",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = app.clone().oneshot(get("/agent/u1/export")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("u@example.com"));
    assert!(!text.contains("tok-super-secret"));

    let doc: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc["metadata"]["agent_id"], "u1");
    assert_eq!(doc["metadata"]["profile"]["email"], "u@example.com");
}

#[tokio::test]
async fn test_clear_messages() {
    let app = setup_test_app().await;
    let (status, body) =
        json_response(&app, post_json("/agent/u1/clear-messages", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["removed"], 0);
}

#[tokio::test]
async fn test_import_rejects_malformed_document() {
    let app = setup_test_app().await;
    let (status, _) = json_response(
        &app,
        post_json("/agent/u1/import", json!({"options": {}})),
    )
    .await;
    assert!(status.is_client_error());
}
