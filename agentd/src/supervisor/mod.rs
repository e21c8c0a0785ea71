//! Application Supervisor - root of the supervision tree
//!
//! One supervisor per process; one supervised AgentActor per user, created
//! lazily on first contact. Durable state lives in the stores, so a crashed
//! agent is simply dropped from the map and recreated (and rehydrated) on
//! the next request for that user.
//!
//! ## Architecture
//!
//! ApplicationSupervisor (one_for_one strategy)
//! └── AgentActor (one per user id)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent};
use tracing::{error, info};

use crate::actors::agent::{AgentActor, AgentArguments, AgentMsg};
use crate::actors::credentials::CredentialStoreMsg;
use crate::actors::state_store::StateStoreMsg;
use crate::auth::CredentialRefresher;
use crate::provider::ModelProvider;
use crate::tools::ToolRegistry;

/// Application supervisor - root of the supervision tree
#[derive(Debug, Default)]
pub struct ApplicationSupervisor;

/// Arguments shared by every agent the supervisor spawns.
#[derive(Clone)]
pub struct ApplicationSupervisorArgs {
    pub state_store: ActorRef<StateStoreMsg>,
    pub credential_store: ActorRef<CredentialStoreMsg>,
    pub provider: Arc<dyn ModelProvider>,
    pub refresher: Arc<dyn CredentialRefresher>,
    pub registry: Arc<ToolRegistry>,
    pub model: String,
    pub scheduler_tick: Duration,
}

/// Application supervisor state
pub struct ApplicationState {
    args: ApplicationSupervisorArgs,
    agents: HashMap<String, ActorRef<AgentMsg>>,
    supervision_event_counts: SupervisionEventCounts,
    last_supervision_failure: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisionEventCounts {
    pub actor_started: u64,
    pub actor_failed: u64,
    pub actor_terminated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSupervisorHealth {
    pub agent_count: usize,
    pub supervision_event_counts: SupervisionEventCounts,
    pub last_supervision_failure: Option<String>,
}

/// Messages handled by ApplicationSupervisor
#[derive(Debug)]
pub enum ApplicationSupervisorMsg {
    /// Get or create the agent actor for a user
    GetOrCreateAgent {
        user_id: String,
        reply: RpcReplyPort<ActorRef<AgentMsg>>,
    },
    /// Return health snapshot and supervision counters.
    GetHealth {
        reply: RpcReplyPort<ApplicationSupervisorHealth>,
    },
}

#[ractor::async_trait]
impl Actor for ApplicationSupervisor {
    type Msg = ApplicationSupervisorMsg;
    type State = ApplicationState;
    type Arguments = ApplicationSupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(
            supervisor = %myself.get_id(),
            "ApplicationSupervisor starting"
        );
        Ok(ApplicationState {
            args,
            agents: HashMap::new(),
            supervision_event_counts: SupervisionEventCounts::default(),
            last_supervision_failure: None,
        })
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        event: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match &event {
            SupervisionEvent::ActorStarted(_) => {
                state.supervision_event_counts.actor_started += 1;
            }
            SupervisionEvent::ActorFailed(actor_cell, failure) => {
                state.supervision_event_counts.actor_failed += 1;
                state.last_supervision_failure =
                    Some(format!("actor_id={} error={failure}", actor_cell.get_id()));
                let before = state.agents.len();
                state
                    .agents
                    .retain(|_, agent| agent.get_id() != actor_cell.get_id());
                error!(
                    supervisor = %myself.get_id(),
                    actor_id = %actor_cell.get_id(),
                    error = %failure,
                    removed = before - state.agents.len(),
                    "Supervised agent failed; it will be recreated on next contact"
                );
            }
            SupervisionEvent::ActorTerminated(actor_cell, _, _) => {
                state.supervision_event_counts.actor_terminated += 1;
                state
                    .agents
                    .retain(|_, agent| agent.get_id() != actor_cell.get_id());
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ApplicationSupervisorMsg::GetOrCreateAgent { user_id, reply } => {
                // Drop dead entries eagerly; supervision events may lag.
                state.agents.retain(|_, agent| {
                    agent.get_cell().get_status() != ractor::ActorStatus::Stopped
                });

                if let Some(agent) = state.agents.get(&user_id) {
                    let _ = reply.send(agent.clone());
                    return Ok(());
                }

                let agent_args = AgentArguments {
                    user_id: user_id.clone(),
                    state_store: state.args.state_store.clone(),
                    credential_store: state.args.credential_store.clone(),
                    provider: state.args.provider.clone(),
                    refresher: state.args.refresher.clone(),
                    registry: state.args.registry.clone(),
                    model: state.args.model.clone(),
                    scheduler_tick: state.args.scheduler_tick,
                };

                match Actor::spawn_linked(None, AgentActor, agent_args, myself.get_cell()).await {
                    Ok((agent, _handle)) => {
                        info!(
                            supervisor = %myself.get_id(),
                            user_id = %user_id,
                            agent_id = %agent.get_id(),
                            "Agent created"
                        );
                        state.agents.insert(user_id, agent.clone());
                        let _ = reply.send(agent);
                    }
                    Err(e) => {
                        error!(
                            supervisor = %myself.get_id(),
                            user_id = %user_id,
                            error = %e,
                            "Failed to spawn agent"
                        );
                        return Err(ActorProcessingErr::from(e));
                    }
                }
            }
            ApplicationSupervisorMsg::GetHealth { reply } => {
                let _ = reply.send(ApplicationSupervisorHealth {
                    agent_count: state.agents.len(),
                    supervision_event_counts: state.supervision_event_counts.clone(),
                    last_supervision_failure: state.last_supervision_failure.clone(),
                });
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        info!(supervisor = %myself.get_id(), "ApplicationSupervisor stopping");
        Ok(())
    }
}

/// Convenience function to get or create a user's agent.
pub async fn get_or_create_agent(
    supervisor: &ActorRef<ApplicationSupervisorMsg>,
    user_id: impl Into<String>,
) -> Result<ActorRef<AgentMsg>, ractor::RactorErr<ApplicationSupervisorMsg>> {
    ractor::call!(supervisor, |reply| {
        ApplicationSupervisorMsg::GetOrCreateAgent {
            user_id: user_id.into(),
            reply,
        }
    })
}
