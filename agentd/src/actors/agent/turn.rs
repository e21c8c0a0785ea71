//! Streaming response controller
//!
//! Produces the assistant's reply for one user turn as incrementally
//! broadcast events, hiding transient credential failures behind exactly one
//! silent refresh-retry. Auto-execute tools run inside the turn, bounded at
//! ten model steps; confirmation-required tools leave pending parts and end
//! the turn.
//!
//! A turn that fails mid-stream discards its partial assistant message; only
//! completed turns are persisted.

use futures_util::StreamExt;
use serde_json::{json, Value};

use super::{AgentActor, AgentError, AgentState};
use crate::actors::credentials;
use crate::prompt;
use crate::provider::{ChatRequest, ProviderError, ProviderEvent};
use shared_types::{Message, MessagePart, Role, ToolCallState, WsServerMsg};

/// At most one silent retry per turn, and only for authorization failures.
const MAX_RETRIES: u32 = 1;
/// Bound on model steps within one turn (tool results feeding back in).
const MAX_STEPS: usize = 10;

impl AgentActor {
    pub(crate) async fn run_turn(&self, state: &mut AgentState) -> Result<(), AgentError> {
        let mut retries = 0u32;
        let mut steps = 0usize;

        while steps < MAX_STEPS {
            // The credential is fetched fresh from the credential store on
            // every provider call; a rotated token takes effect immediately.
            let credential = credentials::get_credential(
                &state.args.credential_store,
                state.args.user_id.clone(),
            )
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))??
            .ok_or(AgentError::AuthenticationRequired)?;

            let request = ChatRequest {
                credential,
                model: state.args.model.clone(),
                system: prompt::system_prompt(&state.args.user_id, state.mode),
                messages: state.messages.clone(),
                tools: state.args.registry.definitions_for_mode(state.mode),
            };

            let mut stream = match state.args.provider.stream_chat(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    if self.should_retry_auth(state, &e, &mut retries).await {
                        continue;
                    }
                    return Err(AgentError::Provider(e));
                }
            };

            let mut text = String::new();
            let mut requested: Vec<(String, String, Value)> = Vec::new();
            let mut failure: Option<ProviderError> = None;

            while let Some(event) = stream.next().await {
                match event {
                    Ok(ProviderEvent::TextDelta(delta)) => {
                        self.broadcast(
                            state,
                            WsServerMsg::ResponseDelta {
                                text: delta.clone(),
                            },
                        );
                        text.push_str(&delta);
                    }
                    Ok(ProviderEvent::ThinkingDelta(delta)) => {
                        // Side channel: clients decide whether to show it.
                        self.broadcast(state, WsServerMsg::Thinking { text: delta });
                    }
                    Ok(ProviderEvent::ToolCall {
                        call_id,
                        tool_name,
                        input,
                    }) => {
                        requested.push((call_id, tool_name, input));
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            if let Some(e) = failure {
                // Partial output is discarded; a permitted retry replays the
                // whole step against the refreshed credential.
                if self.should_retry_auth(state, &e, &mut retries).await {
                    continue;
                }
                return Err(AgentError::Provider(e));
            }

            let mut parts = Vec::new();
            if !text.is_empty() {
                parts.push(MessagePart::Text { content: text });
            }

            let mut executed_auto = false;
            let mut has_pending = false;

            for (call_id, tool_name, input) in requested {
                let part = if !state.args.registry.is_available(&tool_name, state.mode) {
                    // The model asked for a capability this mode does not
                    // expose; resolve it as an error result, no side effect.
                    MessagePart::ToolCall {
                        tool_name: tool_name.clone(),
                        call_id,
                        input,
                        output_state: ToolCallState::Error,
                        output: Some(json!(format!(
                            "Tool '{tool_name}' is not available in {} mode. Please use tools that are appropriate for the current mode.",
                            state.mode
                        ))),
                    }
                } else if state.args.registry.requires_confirmation(&tool_name) {
                    has_pending = true;
                    MessagePart::ToolCall {
                        tool_name,
                        call_id,
                        input,
                        output_state: ToolCallState::Pending,
                        output: None,
                    }
                } else {
                    let mut ctx = self.tool_context(state);
                    let result = state
                        .args
                        .registry
                        .execute(&tool_name, &mut ctx, input.clone())
                        .await;
                    self.apply_tool_effects(state, ctx).await?;
                    executed_auto = true;

                    let (output, output_state) = match result {
                        Ok(output) => (output.content, ToolCallState::Available),
                        // A failing tool never aborts the turn; its message
                        // becomes the result text.
                        Err(e) => (json!(e.message), ToolCallState::Error),
                    };
                    MessagePart::ToolCall {
                        tool_name,
                        call_id,
                        input,
                        output_state,
                        output: Some(output),
                    }
                };

                self.broadcast(state, WsServerMsg::ToolCall { part: part.clone() });
                parts.push(part);
            }

            if parts.is_empty() {
                // The model produced nothing; there is nothing to persist.
                return Ok(());
            }

            let message = Message::new(Role::Assistant, parts);
            self.append_message(state, message).await?;

            if has_pending {
                // The turn ends here; a tool decision resumes it.
                return Ok(());
            }
            if executed_auto {
                steps += 1;
                continue;
            }
            return Ok(());
        }

        tracing::warn!(
            user_id = %state.args.user_id,
            max_steps = MAX_STEPS,
            "Turn hit the step bound"
        );
        Ok(())
    }

    /// Whether an authorization failure earns the single silent retry. The
    /// refresh must succeed AND rotate the stored token; an unchanged token
    /// means the original failure was real and must propagate.
    async fn should_retry_auth(
        &self,
        state: &mut AgentState,
        error: &ProviderError,
        retries: &mut u32,
    ) -> bool {
        if !error.is_auth_failure() || *retries >= MAX_RETRIES {
            return false;
        }

        tracing::warn!(
            user_id = %state.args.user_id,
            error = %error,
            "Provider authorization failure, attempting credential refresh"
        );

        match state.args.refresher.refresh(&state.args.user_id).await {
            Ok(outcome) if outcome.changed => {
                *retries += 1;
                tracing::info!(
                    user_id = %state.args.user_id,
                    retry = *retries,
                    "Credential refreshed, retrying turn"
                );
                true
            }
            Ok(_) => {
                tracing::warn!(
                    user_id = %state.args.user_id,
                    "Credential refresh did not produce a new token"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    user_id = %state.args.user_id,
                    error = %e,
                    "Credential refresh failed"
                );
                false
            }
        }
    }
}
