//! State access tools: inspect the agent and switch operating mode.

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, ToolContext, ToolError, ToolOutput};
use shared_types::AgentMode;

// ============================================================================
// get_agent_state
// ============================================================================

pub struct GetAgentStateTool;

#[async_trait]
impl Tool for GetAgentStateTool {
    fn name(&self) -> &str {
        "get_agent_state"
    }

    fn description(&self) -> &str {
        "Get the current agent state including mode and user profile summary"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, ctx: &mut ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        // Only the fields worth the tokens; no credential lives here at all.
        let profile = ctx.profile.as_ref().map(|p| {
            serde_json::json!({
                "id": p.id,
                "email": p.email,
                "credits": p.credits,
                "payment_method": p.payment_method,
            })
        });

        Ok(ToolOutput::ok(serde_json::json!({
            "mode": ctx.mode,
            "profile": profile,
            "pending_commands": ctx.queued_batches,
        })))
    }
}

// ============================================================================
// set_mode
// ============================================================================

pub struct SetModeTool;

#[async_trait]
impl Tool for SetModeTool {
    fn name(&self) -> &str {
        "set_mode"
    }

    fn description(&self) -> &str {
        "Set the agent's operating mode (plan or act)"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "mode": {
                    "type": "string",
                    "enum": ["plan", "act"],
                    "description": "The mode to switch to"
                },
                "force": {
                    "type": "boolean",
                    "description": "Force the mode change even if conditions are not met"
                }
            },
            "required": ["mode"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let raw = args
            .get("mode")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::new("Missing 'mode' parameter"))?;
        let mode = AgentMode::parse(raw).ok_or_else(|| {
            ToolError::new(format!(
                "Invalid mode '{raw}'. Valid modes are: plan, act"
            ))
        })?;
        let force = args.get("force").and_then(Value::as_bool).unwrap_or(false);

        let previous = ctx.mode;
        ctx.requested_mode_change = Some((mode, force));

        Ok(ToolOutput::ok(serde_json::json!({
            "success": true,
            "previous_mode": previous,
            "current_mode": mode,
            "message": format!("Successfully switched to {mode} mode"),
        })))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::test_context;
    use shared_types::UserProfile;

    #[tokio::test]
    async fn test_get_agent_state_reports_mode_and_profile() {
        let mut ctx = test_context(AgentMode::Plan).await;
        ctx.profile = Some(UserProfile {
            id: "user-1".to_string(),
            email: "u@example.com".to_string(),
            credits: 12.5,
            payment_method: "invoice".to_string(),
        });

        let output = GetAgentStateTool
            .execute(&mut ctx, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(output.content["mode"], "plan");
        assert_eq!(output.content["profile"]["email"], "u@example.com");
    }

    #[tokio::test]
    async fn test_set_mode_stages_request() {
        let mut ctx = test_context(AgentMode::Act).await;
        let output = SetModeTool
            .execute(&mut ctx, serde_json::json!({"mode": "plan"}))
            .await
            .unwrap();

        assert_eq!(ctx.requested_mode_change, Some((AgentMode::Plan, false)));
        assert_eq!(output.content["previous_mode"], "act");
        assert_eq!(output.content["current_mode"], "plan");
    }

    #[tokio::test]
    async fn test_set_mode_rejects_invalid() {
        let mut ctx = test_context(AgentMode::Act).await;
        let err = SetModeTool
            .execute(&mut ctx, serde_json::json!({"mode": "chaos"}))
            .await
            .unwrap_err();
        assert!(err.message.contains("Invalid mode"));
        assert_eq!(ctx.requested_mode_change, None);
    }
}
