//! Ball manipulation tools
//!
//! Command pattern: tools stage commands on the context, the agent actor
//! appends them to the durable outbox, and the external renderer drains and
//! applies them. Tools never touch the canvas.

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, ToolContext, ToolError, ToolOutput};
use shared_types::{ball_color, Ball, SimCommand, BALL_COLORS};

const MIN_RADIUS: f64 = 10.0;
const MAX_RADIUS: f64 = 100.0;
const MAX_BATCH: u64 = 20;
const MAX_GRAVITY: f64 = 2.0;

/// Seed-derived placement jitter so unspecified spawns scatter without a
/// dedicated RNG dependency.
fn jitter(seed: u128, shift: u32, span: f64, offset: f64) -> f64 {
    let raw = ((seed >> shift) & 0xffff) as f64 / 65535.0;
    raw * span + offset
}

fn new_ball(color_name: Option<&str>, args: &Value) -> Ball {
    let seed = uuid::Uuid::new_v4().as_u128();
    let color = color_name
        .and_then(ball_color)
        .unwrap_or_else(|| {
            let (_, value) = BALL_COLORS[(seed % BALL_COLORS.len() as u128) as usize];
            value
        });
    let radius = args
        .get("radius")
        .and_then(Value::as_f64)
        .unwrap_or(25.0)
        .clamp(MIN_RADIUS, MAX_RADIUS);

    Ball {
        id: format!("ball-{}", uuid::Uuid::new_v4()),
        x: args
            .get("x")
            .and_then(Value::as_f64)
            .unwrap_or_else(|| jitter(seed, 0, 400.0, 100.0)),
        y: args
            .get("y")
            .and_then(Value::as_f64)
            .unwrap_or_else(|| jitter(seed, 16, 200.0, 50.0)),
        vx: args
            .get("vx")
            .and_then(Value::as_f64)
            .unwrap_or_else(|| jitter(seed, 32, 10.0, -5.0)),
        vy: args
            .get("vy")
            .and_then(Value::as_f64)
            .unwrap_or_else(|| jitter(seed, 48, 5.0, -2.5)),
        radius,
        color,
    }
}

fn color_schema() -> Value {
    serde_json::json!({
        "type": "string",
        "enum": BALL_COLORS.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
        "description": "Color of the ball"
    })
}

// ============================================================================
// add_ball
// ============================================================================

pub struct AddBallTool;

#[async_trait]
impl Tool for AddBallTool {
    fn name(&self) -> &str {
        "add_ball"
    }

    fn description(&self) -> &str {
        "Add a new bouncing ball to the simulation. You can specify color, size, position, and initial velocity."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "color": color_schema(),
                "radius": {
                    "type": "number",
                    "description": "Radius of the ball in pixels (10-100)"
                },
                "x": { "type": "number", "description": "Initial X position" },
                "y": { "type": "number", "description": "Initial Y position" },
                "vx": { "type": "number", "description": "Initial X velocity" },
                "vy": { "type": "number", "description": "Initial Y velocity" }
            }
        })
    }

    async fn execute(&self, ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let color_name = args.get("color").and_then(Value::as_str);
        let ball = new_ball(color_name, &args);
        let ball_id = ball.id.clone();
        let radius = ball.radius;

        ctx.stage_commands(vec![SimCommand::AddBall { ball }]);

        Ok(ToolOutput::ok(serde_json::json!({
            "success": true,
            "message": format!(
                "Added a {} ball with radius {radius}",
                color_name.unwrap_or("random-colored")
            ),
            "ball_id": ball_id,
        })))
    }
}

// ============================================================================
// add_balls
// ============================================================================

pub struct AddBallsTool;

#[async_trait]
impl Tool for AddBallsTool {
    fn name(&self) -> &str {
        "add_balls"
    }

    fn description(&self) -> &str {
        "Add multiple balls to the simulation at once"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "count": {
                    "type": "integer",
                    "description": "Number of balls to add (1-20)"
                },
                "color": {
                    "type": "string",
                    "enum": BALL_COLORS.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
                    "description": "Color for all balls (random if not specified)"
                }
            },
            "required": ["count"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let count = args
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| ToolError::new("Missing 'count' parameter"))?
            .clamp(1, MAX_BATCH);
        let color_name = args.get("color").and_then(Value::as_str);

        let balls: Vec<Ball> = (0..count)
            .map(|_| new_ball(color_name, &Value::Null))
            .collect();
        let added = balls.len();

        ctx.stage_commands(vec![SimCommand::AddBalls { balls }]);

        Ok(ToolOutput::ok(serde_json::json!({
            "success": true,
            "message": format!("Added {added} balls"),
            "count": added,
        })))
    }
}

// ============================================================================
// remove_ball
// ============================================================================

pub struct RemoveBallTool;

#[async_trait]
impl Tool for RemoveBallTool {
    fn name(&self) -> &str {
        "remove_ball"
    }

    fn description(&self) -> &str {
        "Remove a specific ball from the simulation by its ID"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ball_id": {
                    "type": "string",
                    "description": "ID of the ball to remove"
                }
            },
            "required": ["ball_id"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let ball_id = args
            .get("ball_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::new("Missing 'ball_id' parameter"))?
            .to_string();

        ctx.stage_commands(vec![SimCommand::RemoveBall {
            ball_id: ball_id.clone(),
        }]);

        Ok(ToolOutput::ok(serde_json::json!({
            "success": true,
            "message": format!("Removed ball {ball_id}"),
        })))
    }
}

// ============================================================================
// clear_balls
// ============================================================================

pub struct ClearBallsTool;

#[async_trait]
impl Tool for ClearBallsTool {
    fn name(&self) -> &str {
        "clear_balls"
    }

    fn description(&self) -> &str {
        "Remove all balls from the simulation"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, ctx: &mut ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        ctx.stage_commands(vec![SimCommand::ClearBalls]);

        Ok(ToolOutput::ok(serde_json::json!({
            "success": true,
            "message": "Cleared all balls from the simulation",
        })))
    }
}

// ============================================================================
// set_gravity
// ============================================================================

pub struct SetGravityTool;

#[async_trait]
impl Tool for SetGravityTool {
    fn name(&self) -> &str {
        "set_gravity"
    }

    fn description(&self) -> &str {
        "Set the gravity strength for the ball simulation. 0 = no gravity (floating), 0.5 = normal, 1+ = heavy gravity"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "gravity": {
                    "type": "number",
                    "description": "Gravity strength (0 = floating, 0.5 = normal, 2 = heavy)"
                }
            },
            "required": ["gravity"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let gravity = args
            .get("gravity")
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::new("Missing 'gravity' parameter"))?
            .clamp(0.0, MAX_GRAVITY);

        ctx.stage_commands(vec![SimCommand::SetGravity { gravity }]);

        Ok(ToolOutput::ok(serde_json::json!({
            "success": true,
            "message": format!("Set gravity to {gravity}"),
            "gravity": gravity,
        })))
    }
}

// ============================================================================
// toggle_simulation
// ============================================================================

pub struct ToggleSimulationTool;

#[async_trait]
impl Tool for ToggleSimulationTool {
    fn name(&self) -> &str {
        "toggle_simulation"
    }

    fn description(&self) -> &str {
        "Pause or resume the ball simulation"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "paused": {
                    "type": "boolean",
                    "description": "True to pause, false to resume"
                }
            },
            "required": ["paused"]
        })
    }

    async fn execute(&self, ctx: &mut ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let paused = args
            .get("paused")
            .and_then(Value::as_bool)
            .ok_or_else(|| ToolError::new("Missing 'paused' parameter"))?;

        ctx.stage_commands(vec![SimCommand::SetPaused { paused }]);

        Ok(ToolOutput::ok(serde_json::json!({
            "success": true,
            "message": if paused { "Simulation paused" } else { "Simulation resumed" },
            "paused": paused,
        })))
    }
}

// ============================================================================
// get_simulation_state
// ============================================================================

/// Reports what has been sent to the outbox, not actual canvas state; the
/// renderer owns the canvas.
pub struct GetSimulationStateTool;

#[async_trait]
impl Tool for GetSimulationStateTool {
    fn name(&self) -> &str {
        "get_simulation_state"
    }

    fn description(&self) -> &str {
        "Get information about pending simulation commands"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, ctx: &mut ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        let pending = ctx.queued_batches + ctx.staged_commands.len();
        Ok(ToolOutput::ok(serde_json::json!({
            "pending_commands": pending,
            "message": if pending > 0 {
                format!("{pending} command batches pending")
            } else {
                "No pending commands - simulation running".to_string()
            },
        })))
    }
}

// ============================================================================
// Tests
// ============================================================================
