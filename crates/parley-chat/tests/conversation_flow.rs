//! End-to-end conversation tests through the JSON session store.
//!
//! Each test runs the controller with scripted speech and model services
//! against its own temporary store file.

use std::path::Path;

use parley_chat::{
    ChatError, ControllerSettings, MemoryManager, RecordingSpeech, SaveOutcome, ScriptedListener,
    ScriptedModel, TurnController, TurnOutcome, TurnState,
};
use parley_core::config::MemoryConfig;
use parley_core::types::{Role, Session};
use parley_storage::{JsonFileStore, SessionStore, MAX_SESSIONS};
use serde_json::Value;
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

type FileController =
    TurnController<ScriptedListener, ScriptedModel, RecordingSpeech, JsonFileStore>;

fn store_in(dir: &TempDir) -> JsonFileStore {
    JsonFileStore::new(dir.path().join("conversation_memory.json"))
}

fn make_controller(store: JsonFileStore, utterances: &[&str]) -> FileController {
    TurnController::new(
        MemoryManager::new(store, &MemoryConfig::default()),
        ScriptedListener::new(utterances.iter().copied()),
        ScriptedModel::new(),
        RecordingSpeech::new(),
        ControllerSettings::default(),
    )
}

fn read_raw(path: &Path) -> Value {
    let raw = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&raw).unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_full_conversation_is_persisted() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let path = store.path().to_path_buf();
    let mut controller = make_controller(store, &["hello", "how are you", "Stop"]);

    controller.greet().await;
    for _ in 0..2 {
        let report = controller.run_turn().await.unwrap();
        assert!(matches!(report.outcome, TurnOutcome::Replied { .. }));
    }
    let report = controller.run_turn().await.unwrap();
    assert!(matches!(report.outcome, TurnOutcome::Ended { .. }));
    assert_eq!(controller.state(), TurnState::Ended);

    let raw = read_raw(&path);
    let sessions = raw.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    let record = &sessions[0];
    assert!(record.get("id").is_some());
    assert!(record.get("timestamp").is_some());
    assert!(record.get("duration").is_some());
    assert_eq!(record["total_interactions"], 3);

    let messages = record["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 6);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "hello");
    assert_eq!(messages[5]["role"], "assistant");
    assert_eq!(messages[5]["content"], "Goodbye! Have a great day!");
}

#[tokio::test]
async fn test_resume_after_restart() {
    let dir = TempDir::new().unwrap();

    let id = {
        let mut first = make_controller(store_in(&dir), &["remember the number seven"]);
        first.run_turn().await.unwrap();
        first.memory().active().unwrap().id.clone()
    };

    let model = ScriptedModel::new();
    let mut second = TurnController::new(
        MemoryManager::new(store_in(&dir), &MemoryConfig::default()),
        ScriptedListener::new(["what number?"]),
        model.clone(),
        RecordingSpeech::new(),
        ControllerSettings::default(),
    );
    assert_eq!(second.memory().list_sessions(10)[0].id, id);

    second.load_session(&id).unwrap();
    second.run_turn().await.unwrap();

    let prompt = model.requests().pop().unwrap();
    assert_eq!(prompt.len(), 3);
    assert_eq!(prompt[0].content, "remember the number seven");
    assert_eq!(prompt[2].role, Role::User);

    let stored = store_in(&dir).load();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].turns.len(), 4);
    assert_eq!(stored[0].interaction_count, 2);
}

#[tokio::test]
async fn test_store_is_capped_at_most_recent() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let seeded: Vec<Session> = (0..MAX_SESSIONS)
        .map(|i| {
            let now = chrono::Local::now();
            let mut s = Session::new(format!("20240101_0000{:02}", i), now);
            s.push_turn(Role::User, "hi", now);
            s
        })
        .collect();
    store.save(&seeded).unwrap();

    let mut controller = make_controller(store_in(&dir), &["one more"]);
    controller.run_turn().await.unwrap();
    let new_id = controller.memory().active().unwrap().id.clone();

    let stored = store_in(&dir).load();
    assert_eq!(stored.len(), MAX_SESSIONS);
    assert!(stored.iter().all(|s| s.id != "20240101_000000"));
    assert_eq!(stored.last().unwrap().id, new_id);
}

#[tokio::test]
async fn test_delete_and_clear() {
    let dir = TempDir::new().unwrap();
    let mut controller = make_controller(store_in(&dir), &["first"]);
    controller.run_turn().await.unwrap();
    let id = controller.memory().active().unwrap().id.clone();

    assert!(controller.memory_mut().delete_session(&id).unwrap());
    assert!(!controller.memory_mut().delete_session(&id).unwrap());
    assert_eq!(controller.memory().saved_count(), 0);

    let outcome = controller.save().unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { stored: 1, .. }));

    controller.clear_all().unwrap();
    assert!(!store_in(&dir).path().exists());
    assert!(matches!(
        controller.load_session(&id),
        Err(ChatError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_corrupt_store_starts_empty_and_recovers() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    std::fs::write(store.path(), "{ not json").unwrap();

    let mut controller = make_controller(store, &["hello"]);
    assert!(controller.memory().list_sessions(10).is_empty());
    let report = controller.run_turn().await.unwrap();
    assert!(report.notices.is_empty());
    assert_eq!(store_in(&dir).load().len(), 1);
}

#[tokio::test]
async fn test_history_from_older_tool_survives_saves() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let legacy = r#"[
  {
    "id": "20240304_140500",
    "timestamp": "2024-03-04T14:06:10.123456",
    "duration": 70.5,
    "messages": [
      {"role": "user", "content": "what is the capital of France", "timestamp": "14:05:12"},
      {"role": "assistant", "content": "Paris.", "timestamp": "14:05:15"}
    ],
    "total_interactions": 1
  },
  {
    "id": "20240305_090000",
    "timestamp": "2024-03-05T09:01:00",
    "duration": 0,
    "messages": [
      {"role": "user", "content": "good morning", "timestamp": "09:00:04"}
    ],
    "total_interactions": 0
  }
]"#;
    std::fs::write(store.path(), legacy).unwrap();
    let path = store.path().to_path_buf();

    let mut controller = make_controller(store, &["a new question", "and its population?"]);
    let listed: Vec<String> = controller
        .memory()
        .list_sessions(10)
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(listed, vec!["20240305_090000", "20240304_140500"]);

    controller.run_turn().await.unwrap();

    let ids: Vec<String> = store_in(&dir).load().into_iter().map(|s| s.id).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[..2], ["20240304_140500", "20240305_090000"]);

    controller.load_session("20240304_140500").unwrap();
    controller.run_turn().await.unwrap();

    let stored = store_in(&dir)
        .load()
        .into_iter()
        .find(|s| s.id == "20240304_140500")
        .unwrap();
    assert_eq!(stored.turns.len(), 4);
    assert_eq!(stored.interaction_count, 2);
    assert_eq!(stored.turns[0].content, "what is the capital of France");
    assert_eq!(
        stored.turns[0].timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        "2024-03-04 14:05:12"
    );
    assert!(stored.duration >= 70.5);

    let raw = read_raw(&path);
    assert_eq!(raw.as_array().unwrap().len(), 3);
}
