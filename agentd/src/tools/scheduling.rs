//! Scheduling tools: enqueue work the agent picks up later.
//!
//! Tasks live in the relational store; the agent actor's tick message fires
//! due tasks by appending a user message and running a normal turn.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::{Tool, ToolContext, ToolError, ToolOutput};
use crate::actors::state_store::StateStoreMsg;
use shared_types::ScheduledTask;

// ============================================================================
// schedule_task
// ============================================================================

pub struct ScheduleTaskTool;

#[async_trait]
impl Tool for ScheduleTaskTool {
    fn name(&self) -> &str {
        "schedule_task"
    }

    fn description(&self) -> &str {
        "Schedule a task to be executed at a later time"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Description of the task to schedule"
                },
                "when": {
                    "type": "object",
                    "description": "Schedule timing configuration",
                    "properties": {
                        "type": {
                            "type": "string",
                            "enum": ["scheduled", "delayed", "no-schedule"],
                            "description": "Type of schedule"
                        },
                        "date": {
                            "type": "string",
                            "description": "ISO date string (required when type is 'scheduled')"
                        },
                        "delay_in_seconds": {
                            "type": "number",
                            "description": "Delay in seconds (required when type is 'delayed')"
                        }
                    },
                    "required": ["type"]
                }
            },
            "required": ["description", "when"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::new("Missing 'description' parameter"))?
            .to_string();
        let when = args
            .get("when")
            .ok_or_else(|| ToolError::new("Missing 'when' parameter"))?;
        let schedule_type = when.get("type").and_then(Value::as_str).unwrap_or("");

        let run_at: DateTime<Utc> = match schedule_type {
            "no-schedule" => {
                return Ok(ToolOutput::ok(serde_json::json!(
                    "Not a valid schedule input"
                )))
            }
            "scheduled" => {
                let date = when
                    .get("date")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::new("Missing 'date' for scheduled task"))?;
                DateTime::parse_from_rfc3339(date)
                    .map_err(|e| ToolError::new(format!("Invalid date '{date}': {e}")))?
                    .with_timezone(&Utc)
            }
            "delayed" => {
                let delay = when
                    .get("delay_in_seconds")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| ToolError::new("Missing 'delay_in_seconds' for delayed task"))?;
                if delay < 0.0 {
                    return Err(ToolError::new("Delay must be non-negative"));
                }
                Utc::now() + Duration::milliseconds((delay * 1000.0) as i64)
            }
            other => return Err(ToolError::new(format!("not a valid schedule input: {other}"))),
        };

        let task = ScheduledTask {
            id: ulid::Ulid::new().to_string(),
            description,
            run_at,
            created_at: Utc::now(),
        };
        let task_id = task.id.clone();

        ractor::call!(&ctx.state_store, |reply| {
            StateStoreMsg::InsertScheduledTask {
                user_id: ctx.user_id.clone(),
                task,
                reply,
            }
        })
        .map_err(|e| ToolError::new(format!("Error scheduling task: {e}")))?
        .map_err(|e| ToolError::new(format!("Error scheduling task: {e}")))?;

        Ok(ToolOutput::ok(serde_json::json!({
            "success": true,
            "message": format!(
                "Task scheduled for type \"{schedule_type}\": {} with ID: {task_id}",
                run_at.to_rfc3339()
            ),
            "task_id": task_id,
        })))
    }
}

// ============================================================================
// get_scheduled_tasks
// ============================================================================

pub struct GetScheduledTasksTool;

#[async_trait]
impl Tool for GetScheduledTasksTool {
    fn name(&self) -> &str {
        "get_scheduled_tasks"
    }

    fn description(&self) -> &str {
        "Get all scheduled tasks for the agent"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, ctx: &mut ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        let tasks = ractor::call!(&ctx.state_store, |reply| {
            StateStoreMsg::ListScheduledTasks {
                user_id: ctx.user_id.clone(),
                reply,
            }
        })
        .map_err(|e| ToolError::new(format!("Error retrieving tasks: {e}")))?
        .map_err(|e| ToolError::new(format!("Error retrieving tasks: {e}")))?;

        if tasks.is_empty() {
            return Ok(ToolOutput::ok(serde_json::json!(
                "No scheduled tasks found."
            )));
        }
        Ok(ToolOutput::ok(serde_json::to_value(tasks).map_err(
            |e| ToolError::new(format!("Error retrieving tasks: {e}")),
        )?))
    }
}

// ============================================================================
// cancel_scheduled_task
// ============================================================================

pub struct CancelScheduledTaskTool;

#[async_trait]
impl Tool for CancelScheduledTaskTool {
    fn name(&self) -> &str {
        "cancel_scheduled_task"
    }

    fn description(&self) -> &str {
        "Cancel a previously scheduled task"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "ID of the task to cancel"
                }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let task_id = args
            .get("task_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::new("Missing 'task_id' parameter"))?
            .to_string();

        let removed = ractor::call!(&ctx.state_store, |reply| {
            StateStoreMsg::DeleteScheduledTask {
                user_id: ctx.user_id.clone(),
                task_id: task_id.clone(),
                reply,
            }
        })
        .map_err(|e| ToolError::new(format!("Error canceling task: {e}")))?
        .map_err(|e| ToolError::new(format!("Error canceling task: {e}")))?;

        if removed {
            Ok(ToolOutput::ok(serde_json::json!({
                "success": true,
                "message": format!("Canceled task {task_id}"),
            })))
        } else {
            Ok(ToolOutput::ok(serde_json::json!({
                "success": false,
                "message": format!("No task found with ID {task_id}"),
            })))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
