//! AgentActor - the per-user orchestration actor
//!
//! One instance per user, created lazily on first contact and supervised by
//! the ApplicationSupervisor. It owns an in-memory mirror of the durable
//! state (mode, profile, message log, outbox watermark) and a registry of
//! attached client connections.
//!
//! Two invariants are load-bearing:
//! - the mailbox serializes logical operations, so no state mutation races
//!   another (a turn blocks the actor until its stream closes);
//! - every externally visible mutation is `persist(); broadcast(snapshot)` -
//!   clients never observe a state that is not already durable.

mod authorize;
mod turn;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::actors::credentials::{self, CredentialStoreMsg};
use crate::actors::state_store::{self, ImportSummary, StateStoreMsg};
use crate::auth::CredentialRefresher;
use crate::provider::{ModelProvider, ProviderError};
use crate::tools::{ToolContext, ToolRegistry};
use shared_types::{
    AgentMode, AgentSnapshot, ExportDocument, ImportOptions, Message, MessagePart, ModeChange,
    ToolCallState, UserProfile, WsServerMsg,
};

/// Actor that orchestrates one user's assistant
#[derive(Debug, Default)]
pub struct AgentActor;

/// Arguments for spawning AgentActor
#[derive(Clone)]
pub struct AgentArguments {
    pub user_id: String,
    pub state_store: ActorRef<StateStoreMsg>,
    pub credential_store: ActorRef<CredentialStoreMsg>,
    pub provider: Arc<dyn ModelProvider>,
    pub refresher: Arc<dyn CredentialRefresher>,
    pub registry: Arc<ToolRegistry>,
    pub model: String,
    pub scheduler_tick: Duration,
}

/// State for AgentActor: the in-memory mirror plus connection registry.
pub struct AgentState {
    args: AgentArguments,
    mode: AgentMode,
    last_mode_change: Option<DateTime<Utc>>,
    profile: Option<UserProfile>,
    messages: Vec<Message>,
    /// Batches durable in the outbox (mirror of COUNT(commands)).
    queued_batches: usize,
    connections: HashMap<u64, UnboundedSender<WsServerMsg>>,
    next_connection_id: u64,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by AgentActor
#[derive(Debug)]
pub enum AgentMsg {
    /// Attach a client connection; replies with the connection id after the
    /// profile (re)load completes and the ready event is queued.
    Attach {
        sink: UnboundedSender<WsServerMsg>,
        reply: RpcReplyPort<u64>,
    },
    Detach {
        connection_id: u64,
    },
    /// One user turn: append the message, resolve pending confirmations,
    /// stream the assistant reply.
    UserMessage {
        text: String,
        reply: RpcReplyPort<Result<(), AgentError>>,
    },
    /// The user answered a pending tool confirmation.
    ToolDecision {
        call_id: String,
        output: Value,
        reply: RpcReplyPort<Result<(), AgentError>>,
    },
    SetMode {
        mode: AgentMode,
        force: bool,
        reply: RpcReplyPort<Result<ModeChange, AgentError>>,
    },
    GetSnapshot {
        reply: RpcReplyPort<AgentSnapshot>,
    },
    ClearMessages {
        reply: RpcReplyPort<Result<u64, AgentError>>,
    },
    /// Profile fields go to the relational store, the credential goes to the
    /// credential store; the credential never lands in actor state.
    StoreUserInfo {
        profile: UserProfile,
        credential: String,
        reply: RpcReplyPort<Result<(), AgentError>>,
    },
    /// Clears the stored credential; the presented bearer must match it.
    ClearCredential {
        presented_token: String,
        reply: RpcReplyPort<Result<bool, AgentError>>,
    },
    Export {
        reply: RpcReplyPort<Result<ExportDocument, AgentError>>,
    },
    Import {
        document: Box<ExportDocument>,
        options: ImportOptions,
        reply: RpcReplyPort<Result<ImportSummary, AgentError>>,
    },
    /// Periodic scheduled-task due check.
    SchedulerTick,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone)]
pub enum AgentError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<crate::actors::state_store::StateStoreError> for AgentError {
    fn from(e: crate::actors::state_store::StateStoreError) -> Self {
        AgentError::Storage(e.to_string())
    }
}

impl From<crate::actors::credentials::CredentialStoreError> for AgentError {
    fn from(e: crate::actors::credentials::CredentialStoreError) -> Self {
        AgentError::Storage(e.to_string())
    }
}

// ============================================================================
// Actor Implementation
// ============================================================================

#[async_trait]
impl Actor for AgentActor {
    type Msg = AgentMsg;
    type State = AgentState;
    type Arguments = AgentArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            user_id = %args.user_id,
            "AgentActor starting"
        );

        let mut state = AgentState {
            args,
            mode: AgentMode::default(),
            last_mode_change: None,
            profile: None,
            messages: Vec::new(),
            queued_batches: 0,
            connections: HashMap::new(),
            next_connection_id: 0,
        };

        // Hydrate the mirror. Store failures degrade to defaults so the
        // actor stays usable; they never fail startup closed.
        match state_store::load_agent_state(&state.args.state_store, &state.args.user_id).await {
            Ok(Ok(Some(row))) => {
                state.mode = row.mode;
                state.last_mode_change = row.last_mode_change;
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                tracing::warn!(user_id = %state.args.user_id, error = %e, "State load failed, using defaults");
            }
            Err(e) => {
                tracing::warn!(user_id = %state.args.user_id, error = %e, "State store unreachable, using defaults");
            }
        }

        state.profile = Self::load_profile(&state.args).await;

        match state_store::list_messages(&state.args.state_store, &state.args.user_id).await {
            Ok(Ok(messages)) => state.messages = messages,
            other => {
                tracing::warn!(user_id = %state.args.user_id, result = ?other.is_err(), "Message load failed, starting empty");
            }
        }

        if let Ok(Ok(count)) = ractor::call!(&state.args.state_store, |reply| {
            StateStoreMsg::CountCommandBatches {
                user_id: state.args.user_id.clone(),
                reply,
            }
        }) {
            state.queued_batches = count;
        }

        // Kick off periodic scheduled-task checks.
        let tick_ref = myself.clone();
        let period = state.args.scheduler_tick;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if tick_ref.cast(AgentMsg::SchedulerTick).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            AgentMsg::Attach { sink, reply } => {
                let connection_id = self.handle_attach(state, sink).await;
                let _ = reply.send(connection_id);
            }
            AgentMsg::Detach { connection_id } => {
                state.connections.remove(&connection_id);
                tracing::debug!(
                    user_id = %state.args.user_id,
                    connection_id,
                    "Connection detached"
                );
            }
            AgentMsg::UserMessage { text, reply } => {
                let result = self.handle_user_message(state, text).await;
                if let Err(e) = &result {
                    tracing::error!(user_id = %state.args.user_id, error = %e, "Turn failed");
                    self.broadcast(
                        state,
                        WsServerMsg::Error {
                            message: e.to_string(),
                        },
                    );
                }
                let _ = reply.send(result);
            }
            AgentMsg::ToolDecision {
                call_id,
                output,
                reply,
            } => {
                let result = self.handle_tool_decision(state, call_id, output).await;
                if let Err(e) = &result {
                    self.broadcast(
                        state,
                        WsServerMsg::Error {
                            message: e.to_string(),
                        },
                    );
                }
                let _ = reply.send(result);
            }
            AgentMsg::SetMode { mode, force, reply } => {
                let _ = reply.send(self.apply_mode_change(state, mode, force).await);
            }
            AgentMsg::GetSnapshot { reply } => {
                let _ = reply.send(self.snapshot(state));
            }
            AgentMsg::ClearMessages { reply } => {
                let _ = reply.send(self.handle_clear_messages(state).await);
            }
            AgentMsg::StoreUserInfo {
                profile,
                credential,
                reply,
            } => {
                let _ = reply.send(self.handle_store_user_info(state, profile, credential).await);
            }
            AgentMsg::ClearCredential {
                presented_token,
                reply,
            } => {
                let _ = reply.send(self.handle_clear_credential(state, presented_token).await);
            }
            AgentMsg::Export { reply } => {
                let result = ractor::call!(&state.args.state_store, |r| {
                    StateStoreMsg::ExportAgentData {
                        user_id: state.args.user_id.clone(),
                        reply: r,
                    }
                })
                .map_err(|e| AgentError::Storage(e.to_string()))
                .and_then(|inner| inner.map_err(AgentError::from));
                let _ = reply.send(result);
            }
            AgentMsg::Import {
                document,
                options,
                reply,
            } => {
                let _ = reply.send(self.handle_import(state, *document, options).await);
            }
            AgentMsg::SchedulerTick => {
                self.handle_scheduler_tick(state).await;
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            user_id = %state.args.user_id,
            "AgentActor stopped"
        );
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl AgentActor {
    async fn load_profile(args: &AgentArguments) -> Option<UserProfile> {
        match ractor::call!(&args.state_store, |reply| StateStoreMsg::LoadProfile {
            user_id: args.user_id.clone(),
            reply,
        }) {
            Ok(Ok(profile)) => profile,
            other => {
                tracing::warn!(user_id = %args.user_id, result = ?other.is_err(), "Profile load failed, using none");
                None
            }
        }
    }

    async fn handle_attach(
        &self,
        state: &mut AgentState,
        sink: UnboundedSender<WsServerMsg>,
    ) -> u64 {
        // Profile may have been stored since hydration; refresh before the
        // ready event so the first snapshot is current.
        state.profile = Self::load_profile(&state.args).await;

        let connection_id = state.next_connection_id;
        state.next_connection_id += 1;

        let _ = sink.send(WsServerMsg::Ready);
        let _ = sink.send(WsServerMsg::Snapshot {
            state: self.snapshot(state),
        });
        state.connections.insert(connection_id, sink);

        tracing::info!(
            user_id = %state.args.user_id,
            connection_id,
            "Client connection attached"
        );
        connection_id
    }

    async fn handle_user_message(
        &self,
        state: &mut AgentState,
        text: String,
    ) -> Result<(), AgentError> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(AgentError::InvalidRequest(
                "Message cannot be empty".to_string(),
            ));
        }

        self.append_message(state, Message::user_text(text)).await?;

        // Resolve any confirmations carried by the (now) previous turn.
        self.process_pending_tool_calls(state).await?;

        self.run_turn(state).await
    }

    async fn handle_tool_decision(
        &self,
        state: &mut AgentState,
        call_id: String,
        output: Value,
    ) -> Result<(), AgentError> {
        // Decisions only land on the LAST message; older pending calls are
        // considered abandoned.
        let Some(last) = state.messages.last_mut() else {
            return Err(AgentError::NotFound(format!(
                "No pending tool call {call_id}"
            )));
        };

        let mut found = false;
        for part in last.parts.iter_mut() {
            if let MessagePart::ToolCall {
                call_id: part_call_id,
                output_state,
                output: part_output,
                ..
            } = part
            {
                if part_call_id == &call_id && *output_state == ToolCallState::Pending {
                    *part_output = Some(output.clone());
                    *output_state = ToolCallState::Available;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            return Err(AgentError::NotFound(format!(
                "No pending tool call {call_id}"
            )));
        }

        let updated = last.clone();
        self.update_message(state, updated).await?;

        let resolved = self.process_pending_tool_calls(state).await?;
        if resolved {
            // Let the model see the resolution and finish its reply.
            self.run_turn(state).await?;
        }
        Ok(())
    }

    pub(crate) async fn apply_mode_change(
        &self,
        state: &mut AgentState,
        target: AgentMode,
        force: bool,
    ) -> Result<ModeChange, AgentError> {
        let previous = state.mode;

        if previous != target || force {
            let timestamp = Utc::now();
            ractor::call!(&state.args.state_store, |reply| {
                StateStoreMsg::SaveAgentState {
                    user_id: state.args.user_id.clone(),
                    mode: target,
                    last_mode_change: Some(timestamp),
                    reply,
                }
            })
            .map_err(|e| AgentError::Storage(e.to_string()))??;

            state.mode = target;
            state.last_mode_change = Some(timestamp);
            self.broadcast_snapshot(state);

            tracing::info!(
                user_id = %state.args.user_id,
                previous = %previous,
                current = %target,
                "Mode changed"
            );
        }

        Ok(ModeChange {
            previous_mode: previous,
            current_mode: target,
            success: true,
        })
    }

    async fn handle_clear_messages(&self, state: &mut AgentState) -> Result<u64, AgentError> {
        let removed = ractor::call!(&state.args.state_store, |reply| {
            StateStoreMsg::ClearMessages {
                user_id: state.args.user_id.clone(),
                reply,
            }
        })
        .map_err(|e| AgentError::Storage(e.to_string()))??;

        state.messages.clear();
        self.broadcast_snapshot(state);
        Ok(removed)
    }

    async fn handle_store_user_info(
        &self,
        state: &mut AgentState,
        profile: UserProfile,
        credential: String,
    ) -> Result<(), AgentError> {
        ractor::call!(&state.args.state_store, |reply| {
            StateStoreMsg::SaveProfile {
                profile: profile.clone(),
                reply,
            }
        })
        .map_err(|e| AgentError::Storage(e.to_string()))??;

        credentials::put_credential(
            &state.args.credential_store,
            state.args.user_id.clone(),
            credential,
        )
        .await
        .map_err(|e| AgentError::Storage(e.to_string()))??;

        state.profile = Some(profile);
        self.broadcast_snapshot(state);
        Ok(())
    }

    async fn handle_clear_credential(
        &self,
        state: &mut AgentState,
        presented_token: String,
    ) -> Result<bool, AgentError> {
        let stored =
            credentials::get_credential(&state.args.credential_store, state.args.user_id.clone())
                .await
                .map_err(|e| AgentError::Storage(e.to_string()))??;

        if stored.as_deref() != Some(presented_token.as_str()) {
            return Err(AgentError::Forbidden(
                "Caller identity does not match target user".to_string(),
            ));
        }

        let removed =
            credentials::clear_credential(&state.args.credential_store, state.args.user_id.clone())
                .await
                .map_err(|e| AgentError::Storage(e.to_string()))??;
        Ok(removed)
    }

    async fn handle_import(
        &self,
        state: &mut AgentState,
        document: ExportDocument,
        options: ImportOptions,
    ) -> Result<ImportSummary, AgentError> {
        let summary = ractor::call!(&state.args.state_store, |reply| {
            StateStoreMsg::ImportAgentData {
                user_id: state.args.user_id.clone(),
                document: Box::new(document),
                options,
                reply,
            }
        })
        .map_err(|e| AgentError::Storage(e.to_string()))??;

        // Re-hydrate the mirror from what actually landed.
        match state_store::load_agent_state(&state.args.state_store, &state.args.user_id).await {
            Ok(Ok(Some(row))) => {
                state.mode = row.mode;
                state.last_mode_change = row.last_mode_change;
            }
            _ => {
                state.mode = AgentMode::default();
                state.last_mode_change = None;
            }
        }
        state.profile = Self::load_profile(&state.args).await;
        if let Ok(Ok(messages)) =
            state_store::list_messages(&state.args.state_store, &state.args.user_id).await
        {
            state.messages = messages;
        }
        if let Ok(Ok(count)) = ractor::call!(&state.args.state_store, |reply| {
            StateStoreMsg::CountCommandBatches {
                user_id: state.args.user_id.clone(),
                reply,
            }
        }) {
            state.queued_batches = count;
        }

        self.broadcast_snapshot(state);
        Ok(summary)
    }

    async fn handle_scheduler_tick(&self, state: &mut AgentState) {
        let due = match ractor::call!(&state.args.state_store, |reply| {
            StateStoreMsg::ListDueScheduledTasks {
                user_id: state.args.user_id.clone(),
                now: Utc::now(),
                reply,
            }
        }) {
            Ok(Ok(tasks)) => tasks,
            _ => return,
        };

        for task in due {
            // Delete first so a failing turn cannot re-fire the task forever.
            let _ = ractor::call!(&state.args.state_store, |reply| {
                StateStoreMsg::DeleteScheduledTask {
                    user_id: state.args.user_id.clone(),
                    task_id: task.id.clone(),
                    reply,
                }
            });

            tracing::info!(
                user_id = %state.args.user_id,
                task_id = %task.id,
                "Running scheduled task"
            );
            let text = format!("Running scheduled task: {}", task.description);
            if let Err(e) = self.handle_user_message(state, text).await {
                tracing::error!(
                    user_id = %state.args.user_id,
                    task_id = %task.id,
                    error = %e,
                    "Scheduled task turn failed"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared mutation helpers: persist first, then mirror, then broadcast.
    // ------------------------------------------------------------------

    pub(crate) async fn append_message(
        &self,
        state: &mut AgentState,
        message: Message,
    ) -> Result<(), AgentError> {
        ractor::call!(&state.args.state_store, |reply| {
            StateStoreMsg::AppendMessage {
                user_id: state.args.user_id.clone(),
                message: message.clone(),
                reply,
            }
        })
        .map_err(|e| AgentError::Storage(e.to_string()))??;

        state.messages.push(message.clone());
        self.broadcast(state, WsServerMsg::Message { message });
        self.broadcast_snapshot(state);
        Ok(())
    }

    pub(crate) async fn update_message(
        &self,
        state: &mut AgentState,
        message: Message,
    ) -> Result<(), AgentError> {
        ractor::call!(&state.args.state_store, |reply| {
            StateStoreMsg::UpdateMessage {
                user_id: state.args.user_id.clone(),
                message: message.clone(),
                reply,
            }
        })
        .map_err(|e| AgentError::Storage(e.to_string()))??;

        if let Some(slot) = state.messages.iter_mut().rev().find(|m| m.id == message.id) {
            *slot = message;
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self, state: &AgentState) -> AgentSnapshot {
        AgentSnapshot {
            mode: state.mode,
            profile: state.profile.clone(),
            last_mode_change: state.last_mode_change,
            message_count: state.messages.len(),
            pending_commands: state.queued_batches,
        }
    }

    pub(crate) fn broadcast(&self, state: &mut AgentState, msg: WsServerMsg) {
        state.connections.retain(|_, tx| tx.send(msg.clone()).is_ok());
    }

    pub(crate) fn broadcast_snapshot(&self, state: &mut AgentState) {
        let snapshot = self.snapshot(state);
        self.broadcast(state, WsServerMsg::Snapshot { state: snapshot });
    }

    /// Build a tool context from the mirror, and apply its staged effects
    /// back through persist-then-broadcast once the call returns.
    pub(crate) fn tool_context(&self, state: &AgentState) -> ToolContext {
        ToolContext {
            user_id: state.args.user_id.clone(),
            mode: state.mode,
            profile: state.profile.clone(),
            queued_batches: state.queued_batches,
            staged_commands: Vec::new(),
            requested_mode_change: None,
            state_store: state.args.state_store.clone(),
        }
    }

    pub(crate) async fn apply_tool_effects(
        &self,
        state: &mut AgentState,
        ctx: ToolContext,
    ) -> Result<(), AgentError> {
        for commands in ctx.staged_commands {
            let batch = ractor::call!(&state.args.state_store, |reply| {
                StateStoreMsg::AppendCommandBatch {
                    user_id: state.args.user_id.clone(),
                    commands: commands.clone(),
                    reply,
                }
            })
            .map_err(|e| AgentError::Storage(e.to_string()))??;

            state.queued_batches += 1;
            self.broadcast(state, WsServerMsg::Commands { batch });
        }

        if let Some((mode, force)) = ctx.requested_mode_change {
            self.apply_mode_change(state, mode, force).await?;
        }
        Ok(())
    }
}
