//! CredentialStoreActor - the single authoritative store of bearer tokens
//!
//! One long-lived bearer credential per user, addressed by user id. The
//! credential is stored here and nowhere else: not in agent state, not in
//! the profile table, not in export documents. Everything that needs the
//! token fetches it fresh through this actor, so a rotated credential takes
//! effect on the very next call.

use async_trait::async_trait;
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Actor that owns the credentials table
#[derive(Debug, Default)]
pub struct CredentialStoreActor;

/// Arguments for spawning CredentialStoreActor
#[derive(Debug, Clone)]
pub enum CredentialStoreArguments {
    /// File-based database path
    File(String),
    /// In-memory database (for testing)
    InMemory,
}

/// State for CredentialStoreActor
pub struct CredentialStoreState {
    pool: SqlitePool,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by CredentialStoreActor
#[derive(Debug)]
pub enum CredentialStoreMsg {
    Get {
        user_id: String,
        reply: RpcReplyPort<Result<Option<String>, CredentialStoreError>>,
    },
    Put {
        user_id: String,
        token: String,
        reply: RpcReplyPort<Result<(), CredentialStoreError>>,
    },
    Clear {
        user_id: String,
        reply: RpcReplyPort<Result<bool, CredentialStoreError>>,
    },
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone)]
pub enum CredentialStoreError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for CredentialStoreError {
    fn from(e: sqlx::Error) -> Self {
        CredentialStoreError::Database(e.to_string())
    }
}

// ============================================================================
// Actor Implementation
// ============================================================================

#[async_trait]
impl Actor for CredentialStoreActor {
    type Msg = CredentialStoreMsg;
    type State = CredentialStoreState;
    type Arguments = CredentialStoreArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "CredentialStoreActor starting"
        );

        let pool = match args {
            CredentialStoreArguments::File(path) => {
                if let Some(parent) = std::path::Path::new(&path).parent() {
                    std::fs::create_dir_all(parent).ok();
                }
                SqlitePool::connect_with(
                    SqliteConnectOptions::new()
                        .filename(&path)
                        .create_if_missing(true)
                        .busy_timeout(std::time::Duration::from_secs(5)),
                )
                .await
            }
            CredentialStoreArguments::InMemory => {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(SqliteConnectOptions::new().in_memory(true))
                    .await
            }
        }
        .map_err(|e| ActorProcessingErr::from(format!("Failed to open database: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS credentials (
                user_id    TEXT PRIMARY KEY,
                token      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to run migrations: {e}")))?;

        Ok(CredentialStoreState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CredentialStoreMsg::Get { user_id, reply } => {
                let _ = reply.send(self.handle_get(&user_id, state).await);
            }
            CredentialStoreMsg::Put {
                user_id,
                token,
                reply,
            } => {
                let _ = reply.send(self.handle_put(&user_id, &token, state).await);
            }
            CredentialStoreMsg::Clear { user_id, reply } => {
                let _ = reply.send(self.handle_clear(&user_id, state).await);
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
            "CredentialStoreActor stopped"
        );
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl CredentialStoreActor {
    async fn handle_get(
        &self,
        user_id: &str,
        state: &mut CredentialStoreState,
    ) -> Result<Option<String>, CredentialStoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT token FROM credentials WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&state.pool)
                .await?;
        Ok(row.map(|(token,)| token))
    }

    async fn handle_put(
        &self,
        user_id: &str,
        token: &str,
        state: &mut CredentialStoreState,
    ) -> Result<(), CredentialStoreError> {
        sqlx::query(
            "INSERT INTO credentials (user_id, token, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                token = excluded.token,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(token)
        .bind(Utc::now().to_rfc3339())
        .execute(&state.pool)
        .await?;
        Ok(())
    }

    async fn handle_clear(
        &self,
        user_id: &str,
        state: &mut CredentialStoreState,
    ) -> Result<bool, CredentialStoreError> {
        let result = sqlx::query("DELETE FROM credentials WHERE user_id = ?")
            .bind(user_id)
            .execute(&state.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convenience function to fetch the credential for a user.
pub async fn get_credential(
    store: &ActorRef<CredentialStoreMsg>,
    user_id: impl Into<String>,
) -> Result<Result<Option<String>, CredentialStoreError>, ractor::RactorErr<CredentialStoreMsg>> {
    ractor::call!(store, |reply| CredentialStoreMsg::Get {
        user_id: user_id.into(),
        reply,
    })
}

/// Convenience function to store the credential for a user.
pub async fn put_credential(
    store: &ActorRef<CredentialStoreMsg>,
    user_id: impl Into<String>,
    token: impl Into<String>,
) -> Result<Result<(), CredentialStoreError>, ractor::RactorErr<CredentialStoreMsg>> {
    ractor::call!(store, |reply| CredentialStoreMsg::Put {
        user_id: user_id.into(),
        token: token.into(),
        reply,
    })
}

/// Convenience function to clear the credential for a user.
pub async fn clear_credential(
    store: &ActorRef<CredentialStoreMsg>,
    user_id: impl Into<String>,
) -> Result<Result<bool, CredentialStoreError>, ractor::RactorErr<CredentialStoreMsg>> {
    ractor::call!(store, |reply| CredentialStoreMsg::Clear {
        user_id: user_id.into(),
        reply,
    })
}

// ============================================================================
// Tests
// ============================================================================
