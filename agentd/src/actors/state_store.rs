//! StateStoreActor - durable agent state in SQLite
//!
//! All per-user durable state lives here: the agent state row (mode +
//! timestamps), profile fields, the message log, the simulation command
//! outbox, and scheduled tasks. Actors keep in-memory mirrors for fast
//! reads; this actor is the write-through authority.
//!
//! # Architecture
//!
//! - One actor owning a SqlitePool; access is serialized by the mailbox
//! - Inline migrations with `CREATE TABLE IF NOT EXISTS`
//! - Schema drift is handled exactly once, here: missing columns are added
//!   via `PRAGMA table_info` + `ALTER TABLE`, and rows with out-of-domain
//!   values are coerced to defaults and re-persisted on load
//! - Bulk reads skip malformed rows individually instead of failing whole

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use shared_types::{
    AgentMode, CommandBatch, ExportDocument, ExportMetadata, ImportOptions, Message,
    ScheduledTask, SimCommand, UserProfile, SCHEMA_VERSION,
};

/// Actor that owns the relational store
#[derive(Debug, Default)]
pub struct StateStoreActor;

/// Arguments for spawning StateStoreActor
#[derive(Debug, Clone)]
pub enum StateStoreArguments {
    /// File-based database path
    File(String),
    /// In-memory database (for testing)
    InMemory,
}

/// State for StateStoreActor
pub struct StateStoreState {
    pool: SqlitePool,
}

/// The persisted agent state row, reconciled against the current schema.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStateRow {
    pub mode: AgentMode,
    pub last_mode_change: Option<DateTime<Utc>>,
}

/// Counts reported back from an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub messages_imported: usize,
    pub commands_imported: usize,
    pub scheduled_tasks_imported: usize,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by StateStoreActor
#[derive(Debug)]
pub enum StateStoreMsg {
    /// Load the agent state row; invalid/missing mode coerces to the default
    /// and the merged row is re-persisted.
    LoadAgentState {
        user_id: String,
        reply: RpcReplyPort<Result<Option<AgentStateRow>, StateStoreError>>,
    },
    SaveAgentState {
        user_id: String,
        mode: AgentMode,
        last_mode_change: Option<DateTime<Utc>>,
        reply: RpcReplyPort<Result<(), StateStoreError>>,
    },
    LoadProfile {
        user_id: String,
        reply: RpcReplyPort<Result<Option<UserProfile>, StateStoreError>>,
    },
    SaveProfile {
        profile: UserProfile,
        reply: RpcReplyPort<Result<(), StateStoreError>>,
    },
    AppendMessage {
        user_id: String,
        message: Message,
        reply: RpcReplyPort<Result<(), StateStoreError>>,
    },
    /// Replace a message in place (tool call parts resolving).
    UpdateMessage {
        user_id: String,
        message: Message,
        reply: RpcReplyPort<Result<(), StateStoreError>>,
    },
    ListMessages {
        user_id: String,
        reply: RpcReplyPort<Result<Vec<Message>, StateStoreError>>,
    },
    ClearMessages {
        user_id: String,
        reply: RpcReplyPort<Result<u64, StateStoreError>>,
    },
    AppendCommandBatch {
        user_id: String,
        commands: Vec<SimCommand>,
        reply: RpcReplyPort<Result<CommandBatch, StateStoreError>>,
    },
    ListCommandBatches {
        user_id: String,
        since_seq: i64,
        reply: RpcReplyPort<Result<Vec<CommandBatch>, StateStoreError>>,
    },
    CountCommandBatches {
        user_id: String,
        reply: RpcReplyPort<Result<usize, StateStoreError>>,
    },
    InsertScheduledTask {
        user_id: String,
        task: ScheduledTask,
        reply: RpcReplyPort<Result<(), StateStoreError>>,
    },
    ListScheduledTasks {
        user_id: String,
        reply: RpcReplyPort<Result<Vec<ScheduledTask>, StateStoreError>>,
    },
    /// Tasks whose run_at is at or before `now`.
    ListDueScheduledTasks {
        user_id: String,
        now: DateTime<Utc>,
        reply: RpcReplyPort<Result<Vec<ScheduledTask>, StateStoreError>>,
    },
    DeleteScheduledTask {
        user_id: String,
        task_id: String,
        reply: RpcReplyPort<Result<bool, StateStoreError>>,
    },
    /// Full backup document, read straight from the store (not any mirror).
    ExportAgentData {
        user_id: String,
        reply: RpcReplyPort<Result<ExportDocument, StateStoreError>>,
    },
    /// Reconstruct state from a backup document, transactionally.
    ImportAgentData {
        user_id: String,
        document: Box<ExportDocument>,
        options: ImportOptions,
        reply: RpcReplyPort<Result<ImportSummary, StateStoreError>>,
    },
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone)]
pub enum StateStoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid timestamp format: {0}")]
    InvalidTimestamp(String),
}

impl From<sqlx::Error> for StateStoreError {
    fn from(e: sqlx::Error) -> Self {
        StateStoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StateStoreError {
    fn from(e: serde_json::Error) -> Self {
        StateStoreError::Serialization(e.to_string())
    }
}

// ============================================================================
// Actor Implementation
// ============================================================================

impl StateStoreActor {
    pub async fn open_pool(args: &StateStoreArguments) -> Result<SqlitePool, sqlx::Error> {
        match args {
            StateStoreArguments::File(path) => {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent).ok();
                }
                SqlitePool::connect_with(
                    SqliteConnectOptions::new()
                        .filename(path)
                        .create_if_missing(true)
                        .busy_timeout(std::time::Duration::from_secs(5)),
                )
                .await
            }
            StateStoreArguments::InMemory => {
                // A pooled :memory: database is per-connection; pin the pool
                // to a single never-expiring connection.
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(SqliteConnectOptions::new().in_memory(true))
                    .await
            }
        }
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_state (
                user_id TEXT PRIMARY KEY,
                mode TEXT NOT NULL,
                last_mode_change TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_info (
                user_id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                credits REAL NOT NULL,
                payment_method TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                parts TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commands (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                batch TEXT NOT NULL,
                appended_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_commands_user ON commands(user_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                description TEXT NOT NULL,
                run_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Older deployments predate last_mode_change on agent_state.
        let columns: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as("PRAGMA table_info(agent_state)")
                .fetch_all(pool)
                .await?;
        let has_last_mode_change = columns.iter().any(|c| c.1 == "last_mode_change");
        if !has_last_mode_change {
            sqlx::query("ALTER TABLE agent_state ADD COLUMN last_mode_change TEXT")
                .execute(pool)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Actor for StateStoreActor {
    type Msg = StateStoreMsg;
    type State = StateStoreState;
    type Arguments = StateStoreArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "StateStoreActor starting"
        );

        let pool = Self::open_pool(&args)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to open database: {e}")))?;

        Self::run_migrations(&pool)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to run migrations: {e}")))?;

        Ok(StateStoreState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            StateStoreMsg::LoadAgentState { user_id, reply } => {
                let _ = reply.send(self.handle_load_agent_state(&user_id, state).await);
            }
            StateStoreMsg::SaveAgentState {
                user_id,
                mode,
                last_mode_change,
                reply,
            } => {
                let _ = reply.send(
                    self.handle_save_agent_state(&user_id, mode, last_mode_change, state)
                        .await,
                );
            }
            StateStoreMsg::LoadProfile { user_id, reply } => {
                let _ = reply.send(self.handle_load_profile(&user_id, state).await);
            }
            StateStoreMsg::SaveProfile { profile, reply } => {
                let _ = reply.send(self.handle_save_profile(&profile, state).await);
            }
            StateStoreMsg::AppendMessage {
                user_id,
                message,
                reply,
            } => {
                let _ = reply.send(self.handle_append_message(&user_id, &message, state).await);
            }
            StateStoreMsg::UpdateMessage {
                user_id,
                message,
                reply,
            } => {
                let _ = reply.send(self.handle_update_message(&user_id, &message, state).await);
            }
            StateStoreMsg::ListMessages { user_id, reply } => {
                let _ = reply.send(self.handle_list_messages(&user_id, state).await);
            }
            StateStoreMsg::ClearMessages { user_id, reply } => {
                let _ = reply.send(self.handle_clear_messages(&user_id, state).await);
            }
            StateStoreMsg::AppendCommandBatch {
                user_id,
                commands,
                reply,
            } => {
                let _ = reply.send(
                    self.handle_append_command_batch(&user_id, commands, state)
                        .await,
                );
            }
            StateStoreMsg::ListCommandBatches {
                user_id,
                since_seq,
                reply,
            } => {
                let _ = reply.send(
                    self.handle_list_command_batches(&user_id, since_seq, state)
                        .await,
                );
            }
            StateStoreMsg::CountCommandBatches { user_id, reply } => {
                let _ = reply.send(self.handle_count_command_batches(&user_id, state).await);
            }
            StateStoreMsg::InsertScheduledTask {
                user_id,
                task,
                reply,
            } => {
                let _ = reply.send(
                    self.handle_insert_scheduled_task(&user_id, &task, state)
                        .await,
                );
            }
            StateStoreMsg::ListScheduledTasks { user_id, reply } => {
                let _ = reply.send(self.handle_list_scheduled_tasks(&user_id, None, state).await);
            }
            StateStoreMsg::ListDueScheduledTasks {
                user_id,
                now,
                reply,
            } => {
                let _ = reply.send(
                    self.handle_list_scheduled_tasks(&user_id, Some(now), state)
                        .await,
                );
            }
            StateStoreMsg::DeleteScheduledTask {
                user_id,
                task_id,
                reply,
            } => {
                let _ = reply.send(
                    self.handle_delete_scheduled_task(&user_id, &task_id, state)
                        .await,
                );
            }
            StateStoreMsg::ExportAgentData { user_id, reply } => {
                let _ = reply.send(self.handle_export(&user_id, state).await);
            }
            StateStoreMsg::ImportAgentData {
                user_id,
                document,
                options,
                reply,
            } => {
                let _ = reply.send(self.handle_import(&user_id, *document, options, state).await);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.pool.close().await;
        tracing::info!(
            actor_id = %myself.get_id(),
            "StateStoreActor stopped"
        );
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StateStoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StateStoreError::InvalidTimestamp(e.to_string()))
}

impl StateStoreActor {
    async fn handle_load_agent_state(
        &self,
        user_id: &str,
        state: &mut StateStoreState,
    ) -> Result<Option<AgentStateRow>, StateStoreError> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT mode, last_mode_change FROM agent_state WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?;

        let Some((mode_raw, last_mode_change_raw)) = row else {
            return Ok(None);
        };

        let last_mode_change = last_mode_change_raw
            .as_deref()
            .and_then(|v| parse_timestamp(v).ok());

        let reconciled = match AgentMode::parse(&mode_raw) {
            Some(mode) => AgentStateRow {
                mode,
                last_mode_change,
            },
            None => {
                tracing::warn!(
                    user_id = %user_id,
                    mode = %mode_raw,
                    "No valid mode found in persisted state, defaulting to act"
                );
                let merged = AgentStateRow {
                    mode: AgentMode::default(),
                    last_mode_change,
                };
                // Adopt AND re-persist the merged row.
                self.handle_save_agent_state(user_id, merged.mode, merged.last_mode_change, state)
                    .await?;
                merged
            }
        };

        Ok(Some(reconciled))
    }

    async fn handle_save_agent_state(
        &self,
        user_id: &str,
        mode: AgentMode,
        last_mode_change: Option<DateTime<Utc>>,
        state: &mut StateStoreState,
    ) -> Result<(), StateStoreError> {
        sqlx::query(
            "INSERT INTO agent_state (user_id, mode, last_mode_change, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                mode = excluded.mode,
                last_mode_change = excluded.last_mode_change,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(mode.as_str())
        .bind(last_mode_change.map(|ts| ts.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&state.pool)
        .await?;
        Ok(())
    }

    async fn handle_load_profile(
        &self,
        user_id: &str,
        state: &mut StateStoreState,
    ) -> Result<Option<UserProfile>, StateStoreError> {
        let row: Option<(String, String, f64, String)> = sqlx::query_as(
            "SELECT user_id, email, credits, payment_method FROM user_info WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?;

        Ok(row.map(|(id, email, credits, payment_method)| UserProfile {
            id,
            email,
            credits,
            payment_method,
        }))
    }

    async fn handle_save_profile(
        &self,
        profile: &UserProfile,
        state: &mut StateStoreState,
    ) -> Result<(), StateStoreError> {
        sqlx::query(
            "INSERT INTO user_info (user_id, email, credits, payment_method, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                credits = excluded.credits,
                payment_method = excluded.payment_method,
                updated_at = excluded.updated_at",
        )
        .bind(&profile.id)
        .bind(&profile.email)
        .bind(profile.credits)
        .bind(&profile.payment_method)
        .bind(Utc::now().to_rfc3339())
        .execute(&state.pool)
        .await?;
        Ok(())
    }

    async fn handle_append_message(
        &self,
        user_id: &str,
        message: &Message,
        state: &mut StateStoreState,
    ) -> Result<(), StateStoreError> {
        let parts_json = serde_json::to_string(&message.parts)?;
        sqlx::query(
            "INSERT INTO messages (id, user_id, role, parts, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(user_id)
        .bind(role_str(message.role))
        .bind(parts_json)
        .bind(message.created_at.to_rfc3339())
        .execute(&state.pool)
        .await?;
        Ok(())
    }

    async fn handle_update_message(
        &self,
        user_id: &str,
        message: &Message,
        state: &mut StateStoreState,
    ) -> Result<(), StateStoreError> {
        let parts_json = serde_json::to_string(&message.parts)?;
        sqlx::query("UPDATE messages SET parts = ? WHERE id = ? AND user_id = ?")
            .bind(parts_json)
            .bind(&message.id)
            .bind(user_id)
            .execute(&state.pool)
            .await?;
        Ok(())
    }

    async fn handle_list_messages(
        &self,
        user_id: &str,
        state: &mut StateStoreState,
    ) -> Result<Vec<Message>, StateStoreError> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, role, parts, created_at FROM messages WHERE user_id = ? ORDER BY seq ASC",
        )
        .bind(user_id)
        .fetch_all(&state.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for (id, role_raw, parts_raw, created_at_raw) in rows {
            // Skip malformed rows individually rather than failing the read.
            let Some(role) = parse_role(&role_raw) else {
                tracing::warn!(message_id = %id, role = %role_raw, "Skipping message with unknown role");
                continue;
            };
            let parts = match serde_json::from_str(&parts_raw) {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "Skipping message with malformed parts");
                    continue;
                }
            };
            let created_at = match parse_timestamp(&created_at_raw) {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "Skipping message with malformed timestamp");
                    continue;
                }
            };
            messages.push(Message {
                id,
                role,
                parts,
                created_at,
            });
        }
        Ok(messages)
    }

    async fn handle_clear_messages(
        &self,
        user_id: &str,
        state: &mut StateStoreState,
    ) -> Result<u64, StateStoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE user_id = ?")
            .bind(user_id)
            .execute(&state.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn handle_append_command_batch(
        &self,
        user_id: &str,
        commands: Vec<SimCommand>,
        state: &mut StateStoreState,
    ) -> Result<CommandBatch, StateStoreError> {
        let appended_at = Utc::now();
        let batch_json = serde_json::to_string(&commands)?;
        let result = sqlx::query(
            "INSERT INTO commands (user_id, batch, appended_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(batch_json)
        .bind(appended_at.to_rfc3339())
        .execute(&state.pool)
        .await?;

        Ok(CommandBatch {
            seq: result.last_insert_rowid(),
            commands,
            appended_at,
        })
    }

    async fn handle_list_command_batches(
        &self,
        user_id: &str,
        since_seq: i64,
        state: &mut StateStoreState,
    ) -> Result<Vec<CommandBatch>, StateStoreError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT seq, batch, appended_at FROM commands
             WHERE user_id = ? AND seq > ? ORDER BY seq ASC",
        )
        .bind(user_id)
        .bind(since_seq)
        .fetch_all(&state.pool)
        .await?;

        let mut batches = Vec::with_capacity(rows.len());
        for (seq, batch_raw, appended_at_raw) in rows {
            let commands = match serde_json::from_str(&batch_raw) {
                Ok(commands) => commands,
                Err(e) => {
                    tracing::warn!(seq, error = %e, "Skipping malformed command batch");
                    continue;
                }
            };
            let appended_at = match parse_timestamp(&appended_at_raw) {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::warn!(seq, error = %e, "Skipping command batch with malformed timestamp");
                    continue;
                }
            };
            batches.push(CommandBatch {
                seq,
                commands,
                appended_at,
            });
        }
        Ok(batches)
    }

    async fn handle_count_command_batches(
        &self,
        user_id: &str,
        state: &mut StateStoreState,
    ) -> Result<usize, StateStoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM commands WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&state.pool)
            .await?;
        Ok(count as usize)
    }

    async fn handle_insert_scheduled_task(
        &self,
        user_id: &str,
        task: &ScheduledTask,
        state: &mut StateStoreState,
    ) -> Result<(), StateStoreError> {
        sqlx::query(
            "INSERT INTO scheduled_tasks (id, user_id, description, run_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(user_id)
        .bind(&task.description)
        .bind(task.run_at.to_rfc3339())
        .bind(task.created_at.to_rfc3339())
        .execute(&state.pool)
        .await?;
        Ok(())
    }

    async fn handle_list_scheduled_tasks(
        &self,
        user_id: &str,
        due_before: Option<DateTime<Utc>>,
        state: &mut StateStoreState,
    ) -> Result<Vec<ScheduledTask>, StateStoreError> {
        let rows: Vec<(String, String, String, String)> = match due_before {
            Some(now) => {
                sqlx::query_as(
                    "SELECT id, description, run_at, created_at FROM scheduled_tasks
                     WHERE user_id = ? AND run_at <= ? ORDER BY run_at ASC",
                )
                .bind(user_id)
                .bind(now.to_rfc3339())
                .fetch_all(&state.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, description, run_at, created_at FROM scheduled_tasks
                     WHERE user_id = ? ORDER BY run_at ASC",
                )
                .bind(user_id)
                .fetch_all(&state.pool)
                .await?
            }
        };

        let mut tasks = Vec::with_capacity(rows.len());
        for (id, description, run_at_raw, created_at_raw) in rows {
            let (Ok(run_at), Ok(created_at)) = (
                parse_timestamp(&run_at_raw),
                parse_timestamp(&created_at_raw),
            ) else {
                tracing::warn!(task_id = %id, "Skipping scheduled task with malformed timestamps");
                continue;
            };
            tasks.push(ScheduledTask {
                id,
                description,
                run_at,
                created_at,
            });
        }
        Ok(tasks)
    }

    async fn handle_delete_scheduled_task(
        &self,
        user_id: &str,
        task_id: &str,
        state: &mut StateStoreState,
    ) -> Result<bool, StateStoreError> {
        let result = sqlx::query("DELETE FROM scheduled_tasks WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(task_id)
            .execute(&state.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn handle_export(
        &self,
        user_id: &str,
        state: &mut StateStoreState,
    ) -> Result<ExportDocument, StateStoreError> {
        let agent_state = self
            .handle_load_agent_state(user_id, state)
            .await?
            .unwrap_or(AgentStateRow {
                mode: AgentMode::default(),
                last_mode_change: None,
            });
        let profile = self.handle_load_profile(user_id, state).await?;
        let messages = self.handle_list_messages(user_id, state).await?;
        let commands = self.handle_list_command_batches(user_id, 0, state).await?;
        let scheduled_tasks = self.handle_list_scheduled_tasks(user_id, None, state).await?;

        Ok(ExportDocument {
            metadata: ExportMetadata {
                exported_at: Utc::now(),
                agent_id: user_id.to_string(),
                schema_version: SCHEMA_VERSION,
                mode: agent_state.mode,
                last_mode_change: agent_state.last_mode_change,
                profile,
            },
            messages,
            commands,
            scheduled_tasks,
        })
    }

    async fn handle_import(
        &self,
        user_id: &str,
        document: ExportDocument,
        options: ImportOptions,
        state: &mut StateStoreState,
    ) -> Result<ImportSummary, StateStoreError> {
        let mut tx = state.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO agent_state (user_id, mode, last_mode_change, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                mode = excluded.mode,
                last_mode_change = excluded.last_mode_change,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(document.metadata.mode.as_str())
        .bind(document.metadata.last_mode_change.map(|ts| ts.to_rfc3339()))
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if let Some(profile) = &document.metadata.profile {
            sqlx::query(
                "INSERT INTO user_info (user_id, email, credits, payment_method, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(user_id) DO UPDATE SET
                    email = excluded.email,
                    credits = excluded.credits,
                    payment_method = excluded.payment_method,
                    updated_at = excluded.updated_at",
            )
            .bind(user_id)
            .bind(&profile.email)
            .bind(profile.credits)
            .bind(&profile.payment_method)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        let mut summary = ImportSummary::default();

        sqlx::query("DELETE FROM messages WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if options.include_messages {
            for message in &document.messages {
                let id = if options.preserve_identity {
                    message.id.clone()
                } else {
                    ulid::Ulid::new().to_string()
                };
                let parts_json = serde_json::to_string(&message.parts)?;
                sqlx::query(
                    "INSERT INTO messages (id, user_id, role, parts, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(user_id)
                .bind(role_str(message.role))
                .bind(parts_json)
                .bind(message.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
                summary.messages_imported += 1;
            }
        }

        sqlx::query("DELETE FROM commands WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for batch in &document.commands {
            let batch_json = serde_json::to_string(&batch.commands)?;
            sqlx::query("INSERT INTO commands (user_id, batch, appended_at) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(batch_json)
                .bind(batch.appended_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
            summary.commands_imported += 1;
        }

        sqlx::query("DELETE FROM scheduled_tasks WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if options.include_scheduled_tasks {
            for task in &document.scheduled_tasks {
                let id = if options.preserve_identity {
                    task.id.clone()
                } else {
                    ulid::Ulid::new().to_string()
                };
                sqlx::query(
                    "INSERT INTO scheduled_tasks (id, user_id, description, run_at, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(user_id)
                .bind(&task.description)
                .bind(task.run_at.to_rfc3339())
                .bind(task.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
                summary.scheduled_tasks_imported += 1;
            }
        }

        tx.commit().await?;
        Ok(summary)
    }
}

fn role_str(role: shared_types::Role) -> &'static str {
    match role {
        shared_types::Role::User => "user",
        shared_types::Role::Assistant => "assistant",
        shared_types::Role::System => "system",
    }
}

fn parse_role(value: &str) -> Option<shared_types::Role> {
    match value {
        "user" => Some(shared_types::Role::User),
        "assistant" => Some(shared_types::Role::Assistant),
        "system" => Some(shared_types::Role::System),
        _ => None,
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convenience function to load the reconciled agent state row.
pub async fn load_agent_state(
    store: &ActorRef<StateStoreMsg>,
    user_id: impl Into<String>,
) -> Result<Result<Option<AgentStateRow>, StateStoreError>, ractor::RactorErr<StateStoreMsg>> {
    ractor::call!(store, |reply| StateStoreMsg::LoadAgentState {
        user_id: user_id.into(),
        reply,
    })
}

/// Convenience function to list a user's messages.
pub async fn list_messages(
    store: &ActorRef<StateStoreMsg>,
    user_id: impl Into<String>,
) -> Result<Result<Vec<Message>, StateStoreError>, ractor::RactorErr<StateStoreMsg>> {
    ractor::call!(store, |reply| StateStoreMsg::ListMessages {
        user_id: user_id.into(),
        reply,
    })
}

/// Convenience function to list command batches after a sequence number.
pub async fn list_command_batches(
    store: &ActorRef<StateStoreMsg>,
    user_id: impl Into<String>,
    since_seq: i64,
) -> Result<Result<Vec<CommandBatch>, StateStoreError>, ractor::RactorErr<StateStoreMsg>> {
    ractor::call!(store, |reply| StateStoreMsg::ListCommandBatches {
        user_id: user_id.into(),
        since_seq,
        reply,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ractor::Actor;
    use shared_types::{MessagePart, Role};

    async fn spawn_store() -> ActorRef<StateStoreMsg> {
        let (store, _handle) = Actor::spawn(None, StateStoreActor, StateStoreArguments::InMemory)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_agent_state_roundtrip() {
        let store = spawn_store().await;

        let loaded = load_agent_state(&store, "user-1").await.unwrap().unwrap();
        assert_eq!(loaded, None);

        let ts = Utc::now();
        ractor::call!(store, |reply| StateStoreMsg::SaveAgentState {
            user_id: "user-1".to_string(),
            mode: AgentMode::Plan,
            last_mode_change: Some(ts),
            reply,
        })
        .unwrap()
        .unwrap();

        let loaded = load_agent_state(&store, "user-1")
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(loaded.mode, AgentMode::Plan);
        assert!(loaded.last_mode_change.is_some());

        store.stop(None);
    }

    #[tokio::test]
    async fn test_message_append_list_preserves_order() {
        let store = spawn_store().await;

        for i in 0..3 {
            ractor::call!(store, |reply| StateStoreMsg::AppendMessage {
                user_id: "user-1".to_string(),
                message: Message::user_text(format!("msg {i}")),
                reply,
            })
            .unwrap()
            .unwrap();
        }

        let messages = list_messages(&store, "user-1").await.unwrap().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text(), "msg 0");
        assert_eq!(messages[2].text(), "msg 2");

        store.stop(None);
    }

    #[tokio::test]
    async fn test_update_message_replaces_parts() {
        let store = spawn_store().await;

        let mut message = Message::new(
            Role::Assistant,
            vec![MessagePart::ToolCall {
                tool_name: "get_weather_information".to_string(),
                call_id: "c1".to_string(),
                input: serde_json::json!({"city": "Lisbon"}),
                output_state: shared_types::ToolCallState::Pending,
                output: None,
            }],
        );
        ractor::call!(store, |reply| StateStoreMsg::AppendMessage {
            user_id: "user-1".to_string(),
            message: message.clone(),
            reply,
        })
        .unwrap()
        .unwrap();

        message.parts = vec![MessagePart::ToolCall {
            tool_name: "get_weather_information".to_string(),
            call_id: "c1".to_string(),
            input: serde_json::json!({"city": "Lisbon"}),
            output_state: shared_types::ToolCallState::Available,
            output: Some(serde_json::json!("sunny")),
        }];
        ractor::call!(store, |reply| StateStoreMsg::UpdateMessage {
            user_id: "user-1".to_string(),
            message: message.clone(),
            reply,
        })
        .unwrap()
        .unwrap();

        let messages = list_messages(&store, "user-1").await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].parts, message.parts);

        store.stop(None);
    }

    #[tokio::test]
    async fn test_command_batches_ordered_by_seq() {
        let store = spawn_store().await;

        for gravity in [0.1, 0.2, 0.3] {
            ractor::call!(store, |reply| StateStoreMsg::AppendCommandBatch {
                user_id: "user-1".to_string(),
                commands: vec![SimCommand::SetGravity { gravity }],
                reply,
            })
            .unwrap()
            .unwrap();
        }

        let batches = list_command_batches(&store, "user-1", 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batches.len(), 3);
        assert!(batches[0].seq < batches[1].seq && batches[1].seq < batches[2].seq);
        assert_eq!(
            batches[0].commands,
            vec![SimCommand::SetGravity { gravity: 0.1 }]
        );

        // Drain only after the second batch.
        let tail = list_command_batches(&store, "user-1", batches[1].seq)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].seq, batches[2].seq);

        store.stop(None);
    }

    #[tokio::test]
    async fn test_scheduled_task_due_filter() {
        let store = spawn_store().await;
        let now = Utc::now();

        let due = ScheduledTask {
            id: "task-due".to_string(),
            description: "past".to_string(),
            run_at: now - chrono::Duration::seconds(10),
            created_at: now,
        };
        let future = ScheduledTask {
            id: "task-future".to_string(),
            description: "future".to_string(),
            run_at: now + chrono::Duration::hours(1),
            created_at: now,
        };
        for task in [&due, &future] {
            ractor::call!(store, |reply| StateStoreMsg::InsertScheduledTask {
                user_id: "user-1".to_string(),
                task: task.clone(),
                reply,
            })
            .unwrap()
            .unwrap();
        }

        let due_tasks = ractor::call!(store, |reply| StateStoreMsg::ListDueScheduledTasks {
            user_id: "user-1".to_string(),
            now,
            reply,
        })
        .unwrap()
        .unwrap();
        assert_eq!(due_tasks.len(), 1);
        assert_eq!(due_tasks[0].id, "task-due");

        let deleted = ractor::call!(store, |reply| StateStoreMsg::DeleteScheduledTask {
            user_id: "user-1".to_string(),
            task_id: "task-due".to_string(),
            reply,
        })
        .unwrap()
        .unwrap();
        assert!(deleted);

        store.stop(None);
    }

    #[tokio::test]
    async fn test_data_isolated_by_user() {
        let store = spawn_store().await;

        ractor::call!(store, |reply| StateStoreMsg::AppendMessage {
            user_id: "user-a".to_string(),
            message: Message::user_text("hello from a"),
            reply,
        })
        .unwrap()
        .unwrap();

        let other = list_messages(&store, "user-b").await.unwrap().unwrap();
        assert!(other.is_empty());

        store.stop(None);
    }
}
