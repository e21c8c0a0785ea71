//! Tool-call authorization pass
//!
//! Runs once per inbound turn, over the LAST message's parts only. A part is
//! "unsettled" while it is pending a decision or carries one of the approval
//! sentinels as its output; everything else is already resolved and is never
//! touched again.
//!
//! The mode gate runs before confirmation handling and wins regardless of
//! the approval signal.

use serde_json::{json, Value};

use super::{AgentActor, AgentError, AgentState};
use shared_types::{MessagePart, ToolCallState, WsServerMsg, APPROVAL_NO, APPROVAL_YES};

/// Resolution of one unsettled part.
enum Resolution {
    /// Leave the part as it is.
    Untouched,
    Resolved {
        output: Value,
        output_state: ToolCallState,
    },
}

impl AgentActor {
    /// Resolve unsettled tool-call parts on the last message. Returns true
    /// if anything resolved (the caller then lets the model continue).
    pub(crate) async fn process_pending_tool_calls(
        &self,
        state: &mut AgentState,
    ) -> Result<bool, AgentError> {
        let Some(last) = state.messages.last().cloned() else {
            return Ok(false);
        };

        let mut updated = last;
        let mut resolutions: Vec<(String, Value)> = Vec::new();

        for index in 0..updated.parts.len() {
            let MessagePart::ToolCall {
                tool_name,
                call_id,
                input,
                output_state,
                output,
            } = updated.parts[index].clone()
            else {
                continue;
            };

            let resolution = self
                .resolve_part(state, &tool_name, &input, output_state, output.as_ref())
                .await?;

            if let Resolution::Resolved {
                output: new_output,
                output_state: new_state,
            } = resolution
            {
                if let MessagePart::ToolCall {
                    output,
                    output_state,
                    ..
                } = &mut updated.parts[index]
                {
                    *output = Some(new_output.clone());
                    *output_state = new_state;
                }
                resolutions.push((call_id, new_output));
            }
        }

        if resolutions.is_empty() {
            return Ok(false);
        }

        // Write the resolved parts back, then push each resolution onto the
        // live stream so clients see it without re-fetching history.
        self.update_message(state, updated).await?;
        for (call_id, output) in resolutions {
            self.broadcast(state, WsServerMsg::ToolResult { call_id, output });
        }
        Ok(true)
    }

    async fn resolve_part(
        &self,
        state: &mut AgentState,
        tool_name: &str,
        input: &Value,
        output_state: ToolCallState,
        output: Option<&Value>,
    ) -> Result<Resolution, AgentError> {
        let sentinel = match output_state {
            ToolCallState::Error => return Ok(Resolution::Untouched),
            ToolCallState::Pending => None,
            ToolCallState::Available => {
                match output.and_then(Value::as_str) {
                    Some(APPROVAL_YES) => Some(true),
                    Some(APPROVAL_NO) => Some(false),
                    // A real result, or something that is not a decision.
                    _ => return Ok(Resolution::Untouched),
                }
            }
        };

        // Mode gate first: it wins regardless of the approval signal, and
        // also settles pending calls the current mode forbids.
        if !state.args.registry.is_available(tool_name, state.mode) {
            return Ok(Resolution::Resolved {
                output: json!(format!(
                    "Tool '{tool_name}' is not available in {} mode. Please use tools that are appropriate for the current mode.",
                    state.mode
                )),
                output_state: ToolCallState::Error,
            });
        }

        let Some(approved) = sentinel else {
            // Pending and allowed in this mode: still waiting on the user.
            return Ok(Resolution::Untouched);
        };

        if !state.args.registry.requires_confirmation(tool_name) {
            // Sentinels only mean something for confirmation-required tools.
            return Ok(Resolution::Untouched);
        }

        if !approved {
            return Ok(Resolution::Resolved {
                output: json!("Error: User denied access to tool execution"),
                output_state: ToolCallState::Available,
            });
        }

        // Approved: invoke the real implementation with the originally
        // recorded input.
        let mut ctx = self.tool_context(state);
        let result = state
            .args
            .registry
            .execute(tool_name, &mut ctx, input.clone())
            .await;
        self.apply_tool_effects(state, ctx).await?;

        Ok(match result {
            Ok(output) => Resolution::Resolved {
                output: output.content,
                output_state: ToolCallState::Available,
            },
            Err(e) => Resolution::Resolved {
                output: json!(e.message),
                output_state: ToolCallState::Error,
            },
        })
    }
}
