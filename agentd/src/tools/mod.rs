//! Tool registry for the agent
//!
//! A closed, enumerable set of capabilities the model may invoke. The
//! registry is built once at startup and validated at construction
//! (duplicate names panic before the service accepts traffic); per-call
//! dispatch is a plain map lookup, never stringly-typed reflection.
//!
//! Tools never touch actor internals directly: side effects flow through
//! `ToolContext`, which the agent actor stages and applies after each call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ractor::ActorRef;
use serde_json::Value;
use thiserror::Error;

use crate::actors::state_store::StateStoreMsg;
use shared_types::{AgentMode, SimCommand, ToolDef, UserProfile};

pub mod balls;
pub mod context;
pub mod scheduling;
pub mod state;

/// Mutable surface a tool may touch during one invocation. The agent actor
/// owns the real state; staged values are applied (persist, then broadcast)
/// by the actor once the call returns.
pub struct ToolContext {
    pub user_id: String,
    pub mode: AgentMode,
    pub profile: Option<UserProfile>,
    /// Batches already durable in the outbox (for state-reporting tools).
    pub queued_batches: usize,
    /// Command batches staged by this invocation, one per logical operation.
    pub staged_commands: Vec<Vec<SimCommand>>,
    /// A mode transition requested by this invocation: (target, force).
    pub requested_mode_change: Option<(AgentMode, bool)>,
    /// Store handle for tools whose state is relational (scheduling).
    pub state_store: ActorRef<StateStoreMsg>,
}

impl ToolContext {
    pub fn stage_commands(&mut self, commands: Vec<SimCommand>) {
        self.staged_commands.push(commands);
    }
}

/// Output from tool execution
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub content: Value,
}

impl ToolOutput {
    pub fn ok(content: Value) -> Self {
        Self {
            success: true,
            content,
        }
    }
}

/// Tool execution error
#[derive(Debug, Error, Clone)]
#[error("Tool error: {message}")]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

/// Trait for tools that can be executed by the agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must be unique)
    fn name(&self) -> &str;

    /// Human-readable description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for tool parameters
    fn parameters_schema(&self) -> Value;

    /// Whether execution must wait for an explicit human approval signal.
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Whether the tool is exposed in the given mode.
    fn available_in(&self, _mode: AgentMode) -> bool {
        true
    }

    /// Execute the tool with given arguments
    async fn execute(&self, ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError>;
}

// ============================================================================
// Registry
// ============================================================================

/// Tool registry containing all available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create the registry with the full default tool set.
    ///
    /// Panics on duplicate names: registration problems are startup
    /// failures, not per-call surprises.
    pub fn new() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };

        // Ball simulation tools
        registry.register(Arc::new(balls::AddBallTool));
        registry.register(Arc::new(balls::AddBallsTool));
        registry.register(Arc::new(balls::RemoveBallTool));
        registry.register(Arc::new(balls::ClearBallsTool));
        registry.register(Arc::new(balls::SetGravityTool));
        registry.register(Arc::new(balls::ToggleSimulationTool));
        registry.register(Arc::new(balls::GetSimulationStateTool));

        // State tools
        registry.register(Arc::new(state::GetAgentStateTool));
        registry.register(Arc::new(state::SetModeTool));

        // Context tools
        registry.register(Arc::new(context::GetLocalTimeTool));
        registry.register(Arc::new(context::GetWeatherInformationTool));

        // Scheduling tools
        registry.register(Arc::new(scheduling::ScheduleTaskTool));
        registry.register(Arc::new(scheduling::GetScheduledTasksTool));
        registry.register(Arc::new(scheduling::CancelScheduledTaskTool));

        // Failure probe (act mode only)
        registry.register(Arc::new(ProbeFailureTool));

        registry
    }

    /// Build a registry from an explicit tool set. Same startup validation
    /// as `new`; used by harnesses that need a narrow or instrumented set.
    pub fn with_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            panic!("Duplicate tool registered: {name}");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Whether a tool exists and is exposed in the given mode. Unknown
    /// tools are unavailable everywhere.
    pub fn is_available(&self, name: &str, mode: AgentMode) -> bool {
        self.tools
            .get(name)
            .map(|tool| tool.available_in(mode))
            .unwrap_or(false)
    }

    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|tool| tool.requires_confirmation())
            .unwrap_or(false)
    }

    /// Definitions handed to the model for the given mode, sorted by name
    /// for a stable prompt.
    pub fn definitions_for_mode(&self, mode: AgentMode) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self
            .tools
            .values()
            .filter(|tool| tool.available_in(mode))
            .map(|tool| ToolDef {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name with arguments.
    pub async fn execute(
        &self,
        name: &str,
        ctx: &mut ToolContext,
        args: Value,
    ) -> Result<ToolOutput, ToolError> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(ctx, args).await,
            None => Err(ToolError::new(format!("Tool '{name}' not found"))),
        }
    }

    pub fn available_tools(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Failure Probe
// ============================================================================

/// Debug tool that always fails, to exercise error formatting end to end.
/// Only exposed in act mode.
pub struct ProbeFailureTool;

#[async_trait]
impl Tool for ProbeFailureTool {
    fn name(&self) -> &str {
        "probe_failure"
    }

    fn description(&self) -> &str {
        "Debug tool that always fails to show error formatting"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Any message to echo back"
                }
            },
            "required": ["message"]
        })
    }

    fn available_in(&self, mode: AgentMode) -> bool {
        mode == AgentMode::Act
    }

    async fn execute(&self, _ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let message = args.get("message").and_then(Value::as_str).unwrap_or("");
        Err(ToolError::new(format!("Test error: {message}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::actors::state_store::{StateStoreActor, StateStoreArguments};
    use ractor::Actor;

    pub(crate) async fn test_context(mode: AgentMode) -> ToolContext {
        let (store, _handle) = Actor::spawn(None, StateStoreActor, StateStoreArguments::InMemory)
            .await
            .unwrap();
        ToolContext {
            user_id: "user-1".to_string(),
            mode,
            profile: None,
            queued_batches: 0,
            staged_commands: Vec::new(),
            requested_mode_change: None,
            state_store: store,
        }
    }

    #[test]
    fn test_registry_has_default_tools() {
        let registry = ToolRegistry::new();
        for name in [
            "add_ball",
            "add_balls",
            "remove_ball",
            "clear_balls",
            "set_gravity",
            "toggle_simulation",
            "get_simulation_state",
            "get_agent_state",
            "set_mode",
            "get_local_time",
            "get_weather_information",
            "schedule_task",
            "get_scheduled_tasks",
            "cancel_scheduled_task",
            "probe_failure",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_plan_mode_is_strict_subset() {
        let registry = ToolRegistry::new();
        let plan: Vec<String> = registry
            .definitions_for_mode(AgentMode::Plan)
            .into_iter()
            .map(|d| d.name)
            .collect();
        let act: Vec<String> = registry
            .definitions_for_mode(AgentMode::Act)
            .into_iter()
            .map(|d| d.name)
            .collect();

        assert!(plan.iter().all(|name| act.contains(name)));
        assert!(act.len() > plan.len());
        assert!(!plan.contains(&"probe_failure".to_string()));
        assert!(act.contains(&"probe_failure".to_string()));
    }

    #[test]
    fn test_mode_availability_lookup() {
        let registry = ToolRegistry::new();
        assert!(registry.is_available("add_ball", AgentMode::Plan));
        assert!(!registry.is_available("probe_failure", AgentMode::Plan));
        assert!(registry.is_available("probe_failure", AgentMode::Act));
        assert!(!registry.is_available("nonexistent", AgentMode::Act));
    }

    #[test]
    fn test_confirmation_flags() {
        let registry = ToolRegistry::new();
        assert!(registry.requires_confirmation("get_weather_information"));
        assert!(!registry.requires_confirmation("add_ball"));
        assert!(!registry.requires_confirmation("nonexistent"));
    }

    #[tokio::test]
    async fn test_probe_failure_always_errors() {
        let registry = ToolRegistry::new();
        let mut ctx = test_context(AgentMode::Act).await;
        let err = registry
            .execute(
                "probe_failure",
                &mut ctx,
                serde_json::json!({"message": "boom"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.message, "Test error: boom");
    }

    #[tokio::test]
    async fn test_unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let mut ctx = test_context(AgentMode::Act).await;
        let err = registry
            .execute("nonexistent", &mut ctx, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.message.contains("not found"));
    }
}
