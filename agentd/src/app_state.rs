use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorRef};
use tokio::sync::Mutex;

use crate::actors::agent::AgentMsg;
use crate::actors::credentials::CredentialStoreMsg;
use crate::actors::state_store::StateStoreMsg;
use crate::auth::CredentialRefresher;
use crate::provider::ModelProvider;
use crate::supervisor::{self, ApplicationSupervisor, ApplicationSupervisorArgs, ApplicationSupervisorMsg};
use crate::tools::ToolRegistry;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    state_store: ActorRef<StateStoreMsg>,
    credential_store: ActorRef<CredentialStoreMsg>,
    provider: Arc<dyn ModelProvider>,
    refresher: Arc<dyn CredentialRefresher>,
    registry: Arc<ToolRegistry>,
    model: String,
    scheduler_tick: Duration,
    supervisor: Mutex<Option<ActorRef<ApplicationSupervisorMsg>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_store: ActorRef<StateStoreMsg>,
        credential_store: ActorRef<CredentialStoreMsg>,
        provider: Arc<dyn ModelProvider>,
        refresher: Arc<dyn CredentialRefresher>,
        registry: Arc<ToolRegistry>,
        model: String,
        scheduler_tick: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                state_store,
                credential_store,
                provider,
                refresher,
                registry,
                model,
                scheduler_tick,
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn state_store(&self) -> ActorRef<StateStoreMsg> {
        self.inner.state_store.clone()
    }

    pub fn credential_store(&self) -> ActorRef<CredentialStoreMsg> {
        self.inner.credential_store.clone()
    }

    pub async fn ensure_supervisor(
        &self,
    ) -> Result<ActorRef<ApplicationSupervisorMsg>, String> {
        let mut guard = self.inner.supervisor.lock().await;
        if let Some(supervisor) = guard.as_ref() {
            return Ok(supervisor.clone());
        }

        let (supervisor, _) = Actor::spawn(
            Some(format!("application_supervisor:{}", ulid::Ulid::new())),
            ApplicationSupervisor,
            ApplicationSupervisorArgs {
                state_store: self.inner.state_store.clone(),
                credential_store: self.inner.credential_store.clone(),
                provider: self.inner.provider.clone(),
                refresher: self.inner.refresher.clone(),
                registry: self.inner.registry.clone(),
                model: self.inner.model.clone(),
                scheduler_tick: self.inner.scheduler_tick,
            },
        )
        .await
        .map_err(|e| e.to_string())?;

        *guard = Some(supervisor.clone());
        Ok(supervisor)
    }

    pub async fn get_or_create_agent(
        &self,
        user_id: impl Into<String>,
    ) -> Result<ActorRef<AgentMsg>, String> {
        let supervisor = self.ensure_supervisor().await?;
        supervisor::get_or_create_agent(&supervisor, user_id)
            .await
            .map_err(|e| e.to_string())
    }
}
