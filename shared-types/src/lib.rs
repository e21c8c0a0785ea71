//! Shared types between the agent service and its clients
//!
//! These types cross process boundaries:
//! - ractor actors (native Rust)
//! - web clients (JSON over WebSocket/HTTP)
//!
//! Serializable with serde; exported to TypeScript with ts-rs.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ts_rs::TS;

// ============================================================================
// Operating Mode
// ============================================================================

/// The agent's operating mode. Plan mode exposes a strict subset of tools.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum AgentMode {
    Plan,
    Act,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Plan => "plan",
            AgentMode::Act => "act",
        }
    }

    /// Parse a persisted/user-supplied mode string. Anything outside the
    /// two valid values yields `None`; callers coerce to the default.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "plan" => Some(AgentMode::Plan),
            "act" => Some(AgentMode::Act),
            _ => None,
        }
    }
}

impl Default for AgentMode {
    fn default() -> Self {
        AgentMode::Act
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a mode transition. Defined to never fail: it changes a label,
/// not external resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct ModeChange {
    pub previous_mode: AgentMode,
    pub current_mode: AgentMode,
    pub success: bool,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Lifecycle of a tool call part.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum ToolCallState {
    Pending,
    Available,
    Error,
}

/// One part of a message: plain text or a tool call with its resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum MessagePart {
    Text {
        content: String,
    },
    ToolCall {
        tool_name: String,
        call_id: String,
        #[ts(type = "unknown")]
        input: serde_json::Value,
        output_state: ToolCallState,
        #[ts(type = "unknown")]
        output: Option<serde_json::Value>,
    },
}

/// A message in the conversation log. Append-only from the agent's
/// perspective except for explicit clear/import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(
            Role::User,
            vec![MessagePart::Text {
                content: text.into(),
            }],
        )
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(
            Role::Assistant,
            vec![MessagePart::Text {
                content: text.into(),
            }],
        )
    }

    /// Concatenated text content of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

// ============================================================================
// Ball Simulation
// ============================================================================

/// A ball in the toy physics simulation. `color` is a packed RGB value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct Ball {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub radius: f64,
    pub color: u32,
}

/// Named ball colors and their packed RGB values.
pub const BALL_COLORS: &[(&str, u32)] = &[
    ("red", 0xff4444),
    ("orange", 0xff8844),
    ("yellow", 0xffcc00),
    ("green", 0x44ff44),
    ("blue", 0x4488ff),
    ("purple", 0x8844ff),
    ("pink", 0xff44aa),
    ("cyan", 0x44ffff),
    ("white", 0xffffff),
];

pub fn ball_color(name: &str) -> Option<u32> {
    BALL_COLORS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
}

/// Simulation defaults the renderer starts from.
pub const DEFAULT_GRAVITY: f64 = 0.5;
pub const DEFAULT_FRICTION: f64 = 0.99;

/// One side-effecting instruction for the external renderer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum SimCommand {
    AddBall { ball: Ball },
    AddBalls { balls: Vec<Ball> },
    RemoveBall { ball_id: String },
    ClearBalls,
    SetGravity { gravity: f64 },
    SetPaused { paused: bool },
}

/// A batch of commands appended by one tool call. Immutable once appended;
/// `seq` reflects append order in the outbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct CommandBatch {
    pub seq: i64,
    pub commands: Vec<SimCommand>,
    pub appended_at: DateTime<Utc>,
}

impl CommandBatch {
    /// Content-based key over the commands (not `seq`/timestamp), so a
    /// replayed batch from a reconnect hashes identically.
    pub fn key(&self) -> String {
        let canonical = serde_json::to_vec(&self.commands).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        hex::encode(digest)
    }
}

/// Consumer-side dedupe memory for idempotent batch apply, bounded to the
/// most recent `capacity` keys.
#[derive(Debug)]
pub struct DedupeWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupeWindow {
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a key. Returns `true` if the batch should be applied,
    /// `false` if it was already seen.
    pub fn insert(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupeWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

// ============================================================================
// Profile & Snapshot
// ============================================================================

/// User profile fields persisted in the relational store. The bearer
/// credential is NOT part of this struct; it lives only in the credential
/// store, addressed by user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub credits: f64,
    pub payment_method: String,
}

/// State snapshot broadcast to every attached connection after each
/// persisted mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct AgentSnapshot {
    pub mode: AgentMode,
    pub profile: Option<UserProfile>,
    pub last_mode_change: Option<DateTime<Utc>>,
    pub message_count: usize,
    pub pending_commands: usize,
}

// ============================================================================
// Scheduled Tasks
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct ScheduledTask {
    pub id: String,
    pub description: String,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Export / Import
// ============================================================================

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct ExportMetadata {
    pub exported_at: DateTime<Utc>,
    pub agent_id: String,
    pub schema_version: u32,
    pub mode: AgentMode,
    pub last_mode_change: Option<DateTime<Utc>>,
    pub profile: Option<UserProfile>,
}

/// The full persisted state as a single backup document. Never contains the
/// credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub messages: Vec<Message>,
    pub commands: Vec<CommandBatch>,
    pub scheduled_tasks: Vec<ScheduledTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct ImportOptions {
    #[serde(default)]
    pub preserve_identity: bool,
    #[serde(default = "default_true")]
    pub include_messages: bool,
    #[serde(default = "default_true")]
    pub include_scheduled_tasks: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            preserve_identity: false,
            include_messages: true,
            include_scheduled_tasks: true,
        }
    }
}

// ============================================================================
// Tool Definitions
// ============================================================================

/// Tool definition handed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[ts(type = "unknown")]
    pub parameters: serde_json::Value,
}

// ============================================================================
// Approval Protocol
// ============================================================================

/// Approval sentinels shared between client and service. A
/// confirmation-required tool call resolves only when its recorded output
/// matches one of these strings exactly.
pub const APPROVAL_YES: &str = "Yes, confirmed.";
pub const APPROVAL_NO: &str = "No, denied.";

// ============================================================================
// WebSocket Protocol
// ============================================================================

/// Client → Server messages.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum WsClientMsg {
    /// User typed a message.
    Message { text: String },

    /// User answered a pending tool confirmation (output is one of the
    /// approval sentinels).
    ToolResult {
        call_id: String,
        #[ts(type = "unknown")]
        output: serde_json::Value,
    },

    Ping,
}

/// Server → Client messages.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "../../ui/src/types/generated.ts")]
pub enum WsServerMsg {
    /// Sent once after attach, when pending profile load has completed.
    Ready,

    /// Full state snapshot; follows every persisted mutation.
    Snapshot { state: AgentSnapshot },

    /// A message was appended to the log.
    Message { message: Message },

    /// Incremental assistant output (primary channel).
    ResponseDelta { text: String },

    /// Reasoning/trace output (side channel; clients may hide it).
    Thinking { text: String },

    /// The model requested a tool call (pending parts included).
    ToolCall { part: MessagePart },

    /// A tool call resolved without re-fetching history.
    ToolResult {
        call_id: String,
        #[ts(type = "unknown")]
        output: serde_json::Value,
    },

    /// A command batch was appended to the outbox.
    Commands { batch: CommandBatch },

    Error { message: String },

    Pong,
}

// ============================================================================
// Tests
// ============================================================================
