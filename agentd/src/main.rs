use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use ractor::Actor;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

use agentd::actors::credentials::{CredentialStoreActor, CredentialStoreArguments};
use agentd::actors::state_store::{StateStoreActor, StateStoreArguments};
use agentd::api;
use agentd::app_state::AppState;
use agentd::auth::OAuthRefresher;
use agentd::config::Config;
use agentd::provider::{AnthropicProvider, MockProvider, ModelProvider};
use agentd::tools::ToolRegistry;

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    // Search the current directory and ancestors so running from `agentd/`
    // still picks up a repo-root `.env`.
    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => {
                    tracing::info!(path = %candidate.display(), "Loaded environment from .env");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %candidate.display(),
                        error = %e,
                        "Failed to load .env file"
                    );
                }
            }
            return;
        }

        if !current.pop() {
            break;
        }
    }

    tracing::info!(
        cwd = %cwd.display(),
        "No .env file found in current directory or ancestors; using process environment only"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    load_env_file();
    let config = Config::from_env()?;

    tracing::info!("Starting agentd API server");

    tracing::info!(database = %config.database_url, "Opening state database");
    let (state_store, _state_handle) = Actor::spawn(
        None,
        StateStoreActor,
        StateStoreArguments::File(config.database_url.clone()),
    )
    .await
    .expect("Failed to create state store");

    let (credential_store, _cred_handle) = Actor::spawn(
        None,
        CredentialStoreActor,
        CredentialStoreArguments::File(config.database_url.clone()),
    )
    .await
    .expect("Failed to create credential store");

    let simulate_thinking = std::env::var("SIMULATE_THINKING")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let provider: Arc<dyn ModelProvider> = if simulate_thinking {
        tracing::info!("SIMULATE_THINKING set; using the scripted provider");
        Arc::new(MockProvider::thinking_demo())
    } else {
        Arc::new(
            AnthropicProvider::new(config.gateway_base_url.clone())
                .expect("Failed to build provider client"),
        )
    };

    let refresher = Arc::new(OAuthRefresher::new(
        config.oauth_provider_base_url.clone(),
        credential_store.clone(),
        state_store.clone(),
    ));

    let registry = Arc::new(ToolRegistry::new());
    tracing::info!(
        tools = registry.available_tools().len(),
        "Tool registry validated"
    );

    let app_state = Arc::new(AppState::new(
        state_store,
        credential_store,
        provider,
        refresher,
        registry,
        config.model.clone(),
        config.scheduler_tick,
    ));
    let _ = app_state
        .ensure_supervisor()
        .await
        .expect("Failed to spawn ApplicationSupervisor");

    let allowed_origins = config
        .allowed_origins
        .iter()
        .map(|origin| HeaderValue::from_str(origin).expect("Invalid CORS origin"))
        .collect::<Vec<_>>();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    let api_state = api::ApiState { app_state };
    let app = api::router().with_state(api_state).layer(cors);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting HTTP server on http://{addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
