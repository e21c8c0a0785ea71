//! Persistence Integration Tests
//!
//! Durable-state behavior on real database files: export/import round trips,
//! mode reconciliation of out-of-domain rows, schema drift back-fill, and
//! fail-soft bulk reads.

use ractor::Actor;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use agentd::actors::agent::{AgentActor, AgentArguments, AgentMsg};
use agentd::actors::credentials::{
    put_credential, CredentialStoreActor, CredentialStoreArguments, CredentialStoreMsg,
};
use agentd::actors::state_store::{
    list_command_batches, list_messages, load_agent_state, StateStoreActor, StateStoreArguments,
    StateStoreMsg,
};
use agentd::auth::ScriptedRefresher;
use agentd::provider::MockProvider;
use agentd::tools::ToolRegistry;
use ractor::ActorRef;
use shared_types::{
    AgentMode, ImportOptions, Message, ScheduledTask, SimCommand, UserProfile,
};

async fn raw_pool(path: &str) -> SqlitePool {
    SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true),
    )
    .await
    .expect("Failed to open raw pool")
}

async fn spawn_store(path: &str) -> ActorRef<StateStoreMsg> {
    let (store, _handle) = Actor::spawn(
        None,
        StateStoreActor,
        StateStoreArguments::File(path.to_string()),
    )
    .await
    .expect("Failed to create state store");
    store
}

async fn spawn_agent(
    user_id: &str,
    state_store: ActorRef<StateStoreMsg>,
    credential_store: ActorRef<CredentialStoreMsg>,
) -> ActorRef<AgentMsg> {
    let refresher = Arc::new(ScriptedRefresher::new(
        credential_store.clone(),
        user_id,
        vec![],
    ));
    let (agent, _handle) = Actor::spawn(
        None,
        AgentActor,
        AgentArguments {
            user_id: user_id.to_string(),
            state_store,
            credential_store,
            provider: Arc::new(MockProvider::new(vec![])),
            refresher,
            registry: Arc::new(ToolRegistry::new()),
            model: "mock-model".to_string(),
            scheduler_tick: Duration::from_secs(3600),
        },
    )
    .await
    .expect("Failed to spawn agent");
    agent
}

async fn seed_state(store: &ActorRef<StateStoreMsg>, user_id: &str) {
    ractor::call!(store, |reply| StateStoreMsg::SaveAgentState {
        user_id: user_id.to_string(),
        mode: AgentMode::Plan,
        last_mode_change: Some(chrono::Utc::now()),
        reply,
    })
    .unwrap()
    .unwrap();

    ractor::call!(store, |reply| StateStoreMsg::SaveProfile {
        profile: UserProfile {
            id: user_id.to_string(),
            email: "u@example.com".to_string(),
            credits: 42.0,
            payment_method: "invoice".to_string(),
        },
        reply,
    })
    .unwrap()
    .unwrap();

    for text in ["first", "second", "third"] {
        ractor::call!(store, |reply| StateStoreMsg::AppendMessage {
            user_id: user_id.to_string(),
            message: Message::user_text(text),
            reply,
        })
        .unwrap()
        .unwrap();
    }

    for gravity in [0.5, 1.5] {
        ractor::call!(store, |reply| StateStoreMsg::AppendCommandBatch {
            user_id: user_id.to_string(),
            commands: vec![SimCommand::SetGravity { gravity }],
            reply,
        })
        .unwrap()
        .unwrap();
    }

    ractor::call!(store, |reply| StateStoreMsg::InsertScheduledTask {
        user_id: user_id.to_string(),
        task: ScheduledTask {
            id: "task-1".to_string(),
            description: "follow up".to_string(),
            run_at: chrono::Utc::now() + chrono::Duration::hours(2),
            created_at: chrono::Utc::now(),
        },
        reply,
    })
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_export_import_roundtrip_is_field_for_field() {
    let source_dir = tempfile::tempdir().unwrap();
    let source_path = source_dir.path().join("source.db");
    let source_store = spawn_store(source_path.to_str().unwrap()).await;
    seed_state(&source_store, "u1").await;

    let (source_creds, _h) = Actor::spawn(
        None,
        CredentialStoreActor,
        CredentialStoreArguments::InMemory,
    )
    .await
    .unwrap();
    put_credential(&source_creds, "u1", "tok-never-exported")
        .await
        .unwrap()
        .unwrap();

    let source_agent = spawn_agent("u1", source_store.clone(), source_creds).await;
    let exported = ractor::call!(source_agent, |reply| AgentMsg::Export { reply })
        .unwrap()
        .unwrap();

    // The credential is in exactly one place, and that place is not here.
    let serialized = serde_json::to_string(&exported).unwrap();
    assert!(!serialized.contains("tok-never-exported"));
    assert_eq!(exported.messages.len(), 3);
    assert_eq!(exported.commands.len(), 2);
    assert_eq!(exported.scheduled_tasks.len(), 1);

    // Import into a brand-new store.
    let target_dir = tempfile::tempdir().unwrap();
    let target_path = target_dir.path().join("target.db");
    let target_store = spawn_store(target_path.to_str().unwrap()).await;
    let (target_creds, _h) = Actor::spawn(
        None,
        CredentialStoreActor,
        CredentialStoreArguments::InMemory,
    )
    .await
    .unwrap();
    let target_agent = spawn_agent("u1", target_store.clone(), target_creds).await;

    ractor::call!(target_agent, |reply| AgentMsg::Import {
        document: Box::new(exported.clone()),
        options: ImportOptions {
            preserve_identity: true,
            include_messages: true,
            include_scheduled_tasks: true,
        },
        reply,
    })
    .unwrap()
    .unwrap();

    let reexported = ractor::call!(target_agent, |reply| AgentMsg::Export { reply })
        .unwrap()
        .unwrap();

    assert_eq!(reexported.metadata.mode, exported.metadata.mode);
    assert_eq!(reexported.metadata.profile, exported.metadata.profile);
    assert_eq!(
        reexported.metadata.last_mode_change,
        exported.metadata.last_mode_change
    );
    assert_eq!(reexported.messages, exported.messages);
    assert_eq!(reexported.commands, exported.commands);
    assert_eq!(reexported.scheduled_tasks, exported.scheduled_tasks);
}

#[tokio::test]
async fn test_import_without_messages_clears_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let store = spawn_store(path.to_str().unwrap()).await;
    seed_state(&store, "u1").await;

    let (creds, _h) = Actor::spawn(
        None,
        CredentialStoreActor,
        CredentialStoreArguments::InMemory,
    )
    .await
    .unwrap();
    let agent = spawn_agent("u1", store.clone(), creds).await;
    let exported = ractor::call!(agent, |reply| AgentMsg::Export { reply })
        .unwrap()
        .unwrap();

    let summary = ractor::call!(agent, |reply| AgentMsg::Import {
        document: Box::new(exported),
        options: ImportOptions {
            preserve_identity: true,
            include_messages: false,
            include_scheduled_tasks: false,
        },
        reply,
    })
    .unwrap()
    .unwrap();

    assert_eq!(summary.messages_imported, 0);
    assert_eq!(summary.scheduled_tasks_imported, 0);
    assert_eq!(summary.commands_imported, 2);

    let messages = list_messages(&store, "u1").await.unwrap().unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn test_import_without_preserve_identity_remints_message_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let store = spawn_store(path.to_str().unwrap()).await;
    seed_state(&store, "u1").await;

    let (creds, _h) = Actor::spawn(
        None,
        CredentialStoreActor,
        CredentialStoreArguments::InMemory,
    )
    .await
    .unwrap();
    let agent = spawn_agent("u1", store.clone(), creds).await;
    let exported = ractor::call!(agent, |reply| AgentMsg::Export { reply })
        .unwrap()
        .unwrap();

    ractor::call!(agent, |reply| AgentMsg::Import {
        document: Box::new(exported.clone()),
        options: ImportOptions {
            preserve_identity: false,
            include_messages: true,
            include_scheduled_tasks: true,
        },
        reply,
    })
    .unwrap()
    .unwrap();

    let messages = list_messages(&store, "u1").await.unwrap().unwrap();
    assert_eq!(messages.len(), exported.messages.len());
    for (imported, original) in messages.iter().zip(exported.messages.iter()) {
        assert_ne!(imported.id, original.id);
        assert_eq!(imported.parts, original.parts);
    }
}

#[tokio::test]
async fn test_out_of_domain_mode_coerces_to_act_and_repersists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let path_str = path.to_str().unwrap();

    // Let the store create the schema, then corrupt the row underneath it.
    let store = spawn_store(path_str).await;
    let pool = raw_pool(path_str).await;
    sqlx::query(
        "INSERT OR REPLACE INTO agent_state (user_id, mode, last_mode_change, updated_at)
         VALUES ('u1', 'chaos', NULL, '2026-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let loaded = load_agent_state(&store, "u1")
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(loaded.mode, AgentMode::Act);

    // Reconciliation re-persisted the merged row.
    let (mode,): (String,) =
        sqlx::query_as("SELECT mode FROM agent_state WHERE user_id = 'u1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(mode, "act");
    pool.close().await;
}

#[tokio::test]
async fn test_agent_hydrates_coerced_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let path_str = path.to_str().unwrap();

    let store = spawn_store(path_str).await;
    let pool = raw_pool(path_str).await;
    sqlx::query(
        "INSERT OR REPLACE INTO agent_state (user_id, mode, last_mode_change, updated_at)
         VALUES ('u1', 'build', NULL, '2026-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let (creds, _h) = Actor::spawn(
        None,
        CredentialStoreActor,
        CredentialStoreArguments::InMemory,
    )
    .await
    .unwrap();
    let agent = spawn_agent("u1", store, creds).await;

    let snapshot = ractor::call!(agent, |reply| AgentMsg::GetSnapshot { reply }).unwrap();
    assert_eq!(snapshot.mode, AgentMode::Act);
}

#[tokio::test]
async fn test_schema_drift_backfills_missing_column() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let path_str = path.to_str().unwrap();

    // An old deployment's table, before last_mode_change existed.
    let pool = raw_pool(path_str).await;
    sqlx::query(
        "CREATE TABLE agent_state (
            user_id TEXT PRIMARY KEY,
            mode TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO agent_state (user_id, mode, updated_at) VALUES ('u1', 'plan', '2026-01-01T00:00:00Z')")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let store = spawn_store(path_str).await;
    let loaded = load_agent_state(&store, "u1")
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(loaded.mode, AgentMode::Plan);
    // Missing field back-filled with its default.
    assert_eq!(loaded.last_mode_change, None);
}

#[tokio::test]
async fn test_malformed_message_rows_skipped_individually() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let path_str = path.to_str().unwrap();
    let store = spawn_store(path_str).await;

    ractor::call!(&store, |reply| StateStoreMsg::AppendMessage {
        user_id: "u1".to_string(),
        message: Message::user_text("good one"),
        reply,
    })
    .unwrap()
    .unwrap();

    let pool = raw_pool(path_str).await;
    sqlx::query(
        "INSERT INTO messages (id, user_id, role, parts, created_at)
         VALUES ('bad-row', 'u1', 'user', 'this is not json', '2026-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    ractor::call!(&store, |reply| StateStoreMsg::AppendMessage {
        user_id: "u1".to_string(),
        message: Message::user_text("good two"),
        reply,
    })
    .unwrap()
    .unwrap();

    let messages = list_messages(&store, "u1").await.unwrap().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text(), "good one");
    assert_eq!(messages[1].text(), "good two");
}

#[tokio::test]
async fn test_command_drain_order_and_consumer_dedupe() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let store = spawn_store(path.to_str().unwrap()).await;

    for i in 0..5 {
        ractor::call!(&store, |reply| StateStoreMsg::AppendCommandBatch {
            user_id: "u1".to_string(),
            commands: vec![SimCommand::SetGravity {
                gravity: i as f64 / 10.0,
            }],
            reply,
        })
        .unwrap()
        .unwrap();
    }

    let batches = list_command_batches(&store, "u1", 0).await.unwrap().unwrap();
    assert_eq!(batches.len(), 5);

    // Applying once in order, then replaying, applies each batch exactly once.
    let mut window = shared_types::DedupeWindow::default();
    let mut applied = Vec::new();
    for batch in batches.iter().chain(batches.iter()) {
        if window.insert(batch.key()) {
            applied.push(batch.seq);
        }
    }
    let expected: Vec<i64> = batches.iter().map(|b| b.seq).collect();
    assert_eq!(applied, expected);
}

#[tokio::test]
async fn test_clear_messages_is_isolated_per_user() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let store = spawn_store(path.to_str().unwrap()).await;

    for user in ["u1", "u2"] {
        ractor::call!(&store, |reply| StateStoreMsg::AppendMessage {
            user_id: user.to_string(),
            message: Message::user_text(format!("hello from {user}")),
            reply,
        })
        .unwrap()
        .unwrap();
    }

    let removed = ractor::call!(&store, |reply| StateStoreMsg::ClearMessages {
        user_id: "u1".to_string(),
        reply,
    })
    .unwrap()
    .unwrap();
    assert_eq!(removed, 1);

    let other = list_messages(&store, "u2").await.unwrap().unwrap();
    assert_eq!(other.len(), 1);
}
