//! End-to-end API tests over an in-memory database.
//!
//! The generation capability is a scripted fake injected through the driver
//! trait; the vector store is a stub returning no chunks. Everything else is
//! the real router, handlers, and SQLite schema.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use serde_json::{Value, json};

use carebridge_api::AppState;
use carebridge_api::config::AppConfig;
use carebridge_api::corpus::ReferenceCorpus;
use carebridge_api::database::Store;
use carebridge_api::llm::{CompletionRequest, GenerationCapability, LlmDriver};
use carebridge_api::rag::{RetrievedChunk, VectorSearch};
use carebridge_api::server::build_router;

/// Driver that pops scripted completions in order.
struct ScriptedDriver {
    script: Mutex<Vec<String>>,
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    async fn complete(&self, _req: CompletionRequest) -> anyhow::Result<String> {
        let mut script = self.script.lock().expect("lock");
        if script.is_empty() {
            anyhow::bail!("script exhausted")
        } else {
            Ok(script.remove(0))
        }
    }

    async fn embed(&self, _input: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.25; 8])
    }
}

/// Vector store stub with no indexed documents.
struct EmptyVector;

#[async_trait]
impl VectorSearch for EmptyVector {
    async fn query(&self, _embedding: &[f32], _top_k: usize) -> anyhow::Result<Vec<RetrievedChunk>> {
        Ok(Vec::new())
    }
}

async fn server_with_script(script: Vec<&str>) -> TestServer {
    let store = Store::in_memory().await.expect("store");
    let generator = if script.is_empty() {
        GenerationCapability::Disabled
    } else {
        GenerationCapability::configured(Arc::new(ScriptedDriver {
            script: Mutex::new(script.into_iter().map(ToString::to_string).collect()),
        }))
    };

    let state = AppState {
        config: Arc::new(AppConfig::default()),
        store,
        generator,
        corpus: Arc::new(ReferenceCorpus::default()),
        vector: Arc::new(EmptyVector),
    };

    TestServer::new(build_router(state)).expect("server")
}

fn child_body(name: &str) -> Value {
    json!({
        "name": name,
        "age": 6,
        "disability": "autism",
        "notes": "practice turn-taking",
        "traits": { "gender": "girl", "hair": "curly", "skin": "light", "glasses": false },
    })
}

async fn create_child(server: &TestServer, name: &str) -> i64 {
    let response = server.post("/child/create").json(&child_body(name)).await;
    response.assert_status_ok();
    response.json::<Value>()["child"]["child_id"]
        .as_i64()
        .expect("child id")
}

#[tokio::test]
async fn test_health() {
    let server = server_with_script(vec![]).await;
    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "ok");
}

#[tokio::test]
async fn test_register_and_login_flow() {
    let server = server_with_script(vec![]).await;

    let response = server
        .post("/auth/register")
        .json(&json!({ "email": "ana@example.com", "password": "s3cret", "role": "parent" }))
        .await;
    response.assert_status_ok();
    let user_id = response.json::<Value>()["user_id"].as_i64().expect("id");

    // Duplicate registration conflicts.
    let duplicate = server
        .post("/auth/register")
        .json(&json!({ "email": "ana@example.com", "password": "other", "role": "parent" }))
        .await;
    assert_eq!(duplicate.status_code(), 409);

    // Correct credentials log in; wrong ones do not.
    let login = server
        .post("/auth/login")
        .json(&json!({ "email": "ana@example.com", "password": "s3cret" }))
        .await;
    login.assert_status_ok();
    assert_eq!(login.json::<Value>()["user_id"].as_i64(), Some(user_id));

    let bad = server
        .post("/auth/login")
        .json(&json!({ "email": "ana@example.com", "password": "nope" }))
        .await;
    assert_eq!(bad.status_code(), 401);

    let missing = server.post("/auth/register").json(&json!({})).await;
    assert_eq!(missing.status_code(), 400);
    assert!(
        missing.json::<Value>()["error"]
            .as_str()
            .expect("error body")
            .contains("Missing fields")
    );
}

#[tokio::test]
async fn test_child_creation_fills_guidance_fallback() {
    let server = server_with_script(vec![]).await;
    let child_id = create_child(&server, "Mira").await;

    let profile = server.get(&format!("/child/{child_id}/profile")).await;
    profile.assert_status_ok();
    let body = profile.json::<Value>();
    let guidance = body["profile"]["guidance"].as_str().expect("guidance");
    assert!(guidance.contains("Mira"));
    assert!(body["profile"]["traits"]["gender"].as_str() == Some("girl"));
}

#[tokio::test]
async fn test_child_validation_errors() {
    let server = server_with_script(vec![]).await;

    let missing = server.post("/child/create").json(&json!({ "age": 6 })).await;
    assert_eq!(missing.status_code(), 400);

    let bad_age = server
        .post("/child/create")
        .json(&json!({
            "name": "Mira",
            "age": "six",
            "disability": "autism",
            "traits": { "gender": "girl", "hair": "curly", "skin": "light" },
        }))
        .await;
    assert_eq!(bad_age.status_code(), 400);
    assert_eq!(
        bad_age.json::<Value>()["error"],
        "Age must be a whole number"
    );

    let unknown = server.get("/child/4242").await;
    assert_eq!(unknown.status_code(), 404);
}

#[tokio::test]
async fn test_task_response_distress_alert_flow() {
    let server = server_with_script(vec![]).await;
    let child_id = create_child(&server, "Mira").await;

    // A calm sample, then two high-distress samples back to back.
    let first = server
        .post(&format!("/child/{child_id}/task-response"))
        .json(&json!({ "task_name": "warmup", "emotion": "happy", "stress_level": 1 }))
        .await;
    first.assert_status_ok();
    assert!(first.json::<Value>().get("parent_alert").is_none());

    server
        .post(&format!("/child/{child_id}/task-response"))
        .json(&json!({ "task_name": "puzzle", "emotion": "sad", "stress_level": 5 }))
        .await
        .assert_status_ok();

    let third = server
        .post(&format!("/child/{child_id}/task-response"))
        .json(&json!({ "task_name": "drawing", "emotion": "neutral", "stress_level": 4 }))
        .await;
    third.assert_status_ok();
    let alert = &third.json::<Value>()["parent_alert"];
    assert_eq!(alert["reason"], "high_distress_sequence");
    assert!(alert["message"].as_str().expect("message").contains("Mira"));

    // The alert shows up unacknowledged, then acknowledging hides it.
    let listed = server
        .get(&format!("/parent/child/{child_id}/alerts"))
        .await;
    listed.assert_status_ok();
    let alerts = listed.json::<Value>()["alerts"].as_array().expect("alerts").clone();
    assert_eq!(alerts.len(), 1);
    let alert_id = alerts[0]["id"].as_i64().expect("alert id");

    server
        .post(&format!("/parent/alerts/{alert_id}/acknowledge"))
        .json(&json!({}))
        .await
        .assert_status_ok();

    let after = server
        .get(&format!("/parent/child/{child_id}/alerts"))
        .await;
    assert!(after.json::<Value>()["alerts"].as_array().expect("alerts").is_empty());

    let including = server
        .get(&format!(
            "/parent/child/{child_id}/alerts?include_acknowledged=true"
        ))
        .await;
    assert_eq!(
        including.json::<Value>()["alerts"].as_array().expect("alerts").len(),
        1
    );
}

#[tokio::test]
async fn test_invalid_stress_level_is_rejected() {
    let server = server_with_script(vec![]).await;
    let child_id = create_child(&server, "Mira").await;

    let response = server
        .post(&format!("/child/{child_id}/task-response"))
        .json(&json!({ "task_name": "puzzle", "emotion": "sad", "stress_level": 9 }))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(
        response.json::<Value>()["error"],
        "stress_level must be between 1 and 5"
    );
}

#[tokio::test]
async fn test_speech_button_upsert() {
    let server = server_with_script(vec![]).await;
    let child_id = create_child(&server, "Mira").await;

    let first = server
        .post(&format!("/child/{child_id}/speech-button"))
        .json(&json!({ "button_key": "Yes", "label": "Yes" }))
        .await;
    first.assert_status_ok();
    assert_eq!(first.json::<Value>()["press_count"], 1);
    assert_eq!(first.json::<Value>()["button_key"], "yes");

    let second = server
        .post(&format!("/child/{child_id}/speech-button"))
        .json(&json!({ "button_key": "yes", "increment": 3 }))
        .await;
    second.assert_status_ok();
    assert_eq!(second.json::<Value>()["press_count"], 4);
}

#[tokio::test]
async fn test_stats_and_emotion_aggregations() {
    let server = server_with_script(vec![]).await;
    let child_id = create_child(&server, "Mira").await;

    server
        .post(&format!("/child/{child_id}/event"))
        .json(&json!({ "event_type": "emotion_selected", "payload": { "emotion": "happy" } }))
        .await
        .assert_status_ok();
    server
        .post(&format!("/child/{child_id}/event"))
        .json(&json!({ "event_type": "session_finished", "payload": { "duration": 120 } }))
        .await
        .assert_status_ok();
    server
        .post(&format!("/child/{child_id}/task-response"))
        .json(&json!({ "task_name": "puzzle", "emotion": "Happy", "stress_level": 2 }))
        .await
        .assert_status_ok();

    let stats = server.get(&format!("/child/{child_id}/stats")).await;
    stats.assert_status_ok();
    let stats = stats.json::<Value>();
    assert_eq!(stats["emotion_counts"]["happy"], 1);
    assert_eq!(stats["total_sessions"], 1);
    assert_eq!(stats["total_time_seconds"], 120);

    let emotions = server
        .get(&format!("/parent/child/{child_id}/task-emotions"))
        .await;
    emotions.assert_status_ok();
    let emotions = emotions.json::<Value>();
    assert_eq!(emotions["total_logs"], 1);
    assert_eq!(emotions["emotion_counts"]["happy"], 1);

    let history = server
        .get(&format!("/parent/child/{child_id}/task-stress-history"))
        .await;
    history.assert_status_ok();
    let records = history.json::<Value>()["records"].as_array().expect("records").clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["task_name"], "puzzle");
}

#[tokio::test]
async fn test_parent_summary() {
    let server = server_with_script(vec![]).await;
    let child_id = create_child(&server, "Mira").await;

    let child = server.get(&format!("/child/{child_id}")).await.json::<Value>();
    let parent_id = child["parent_id"].as_i64().expect("parent id");

    let summary = server.get(&format!("/parent/{parent_id}/summary")).await;
    summary.assert_status_ok();
    let summary = summary.json::<Value>();
    assert_eq!(summary["child_count"], 1);
    assert_eq!(summary["name"], "Demo-parent");
    assert_eq!(summary["stats"]["active_alerts"], 0);
}

#[tokio::test]
async fn test_chat_not_enough_data_persists_history() {
    // First scripted completion feeds the guidance refresh at child creation.
    let server = server_with_script(vec!["Guidance snapshot.", "NO_QUERY"]).await;
    let child_id = create_child(&server, "Mira").await;

    let response = server
        .post(&format!("/parent/chat/{child_id}"))
        .json(&json!({ "question": "How was the week?" }))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(
        body["answer"],
        "There is not enough data in the app yet to answer this question about the child."
    );
    let session_id = body["session_id"].as_i64().expect("session id");

    let history = server
        .get(&format!(
            "/parent/chat/{child_id}/history?session_id={session_id}"
        ))
        .await;
    history.assert_status_ok();
    let messages = history.json::<Value>()["messages"].as_array().expect("messages").clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
}

#[tokio::test]
async fn test_chat_generated_select_round_trip() {
    let server = server_with_script(vec![
        "Guidance snapshot.",
        "SELECT task_name, stress_level FROM task_emotion_logs WHERE child_id = :child_id;",
        "Mira logged one stressful puzzle session.",
    ])
    .await;
    let child_id = create_child(&server, "Mira").await;

    server
        .post(&format!("/child/{child_id}/task-response"))
        .json(&json!({ "task_name": "puzzle", "emotion": "neutral", "stress_level": 3 }))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("/parent/chat/{child_id}"))
        .json(&json!({ "question": "Which tasks were stressful?" }))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["answer"], "Mira logged one stressful puzzle session.");
    assert!(body["sql"].as_str().expect("sql").starts_with("SELECT"));
    assert_eq!(body["rows"].as_array().expect("rows").len(), 1);
}

#[tokio::test]
async fn test_chat_rejects_foreign_session() {
    let server = server_with_script(vec![
        "Guidance for Mira.",
        "Guidance for Tudor.",
        "NO_QUERY",
    ])
    .await;
    let first_child = create_child(&server, "Mira").await;
    let second_child = create_child(&server, "Tudor").await;

    let opening = server
        .post(&format!("/parent/chat/{first_child}"))
        .json(&json!({ "question": "How was the week?" }))
        .await;
    let session_id = opening.json::<Value>()["session_id"].as_i64().expect("session");

    let crossed = server
        .post(&format!("/parent/chat/{second_child}"))
        .json(&json!({ "question": "And here?", "session_id": session_id }))
        .await;
    assert_eq!(crossed.status_code(), 400);
}

#[tokio::test]
async fn test_general_chat_fallback_and_history() {
    let server = server_with_script(vec!["Try a steady bedtime routine."]).await;

    let register = server
        .post("/auth/register")
        .json(&json!({ "email": "ana@example.com", "password": "s3cret", "role": "parent" }))
        .await;
    let parent_id = register.json::<Value>()["user_id"].as_i64().expect("id");

    let response = server
        .post("/parent/chat/general")
        .json(&json!({ "question": "How do I improve sleep?", "parent_id": parent_id }))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["answer"], "Try a steady bedtime routine.");
    assert_eq!(body["fallback"], true);
    assert!(body["sources"].as_array().expect("sources").is_empty());

    let history = server
        .get(&format!("/parent/chat/general/history?parent_id={parent_id}"))
        .await;
    history.assert_status_ok();
    let messages = history.json::<Value>()["messages"].as_array().expect("messages").clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "How do I improve sleep?");
}

#[tokio::test]
async fn test_general_tasks_round_trip() {
    let server = server_with_script(vec![
        "Guidance snapshot.",
        r#"{"tasks": [{"title": "Dim the lights", "description": "Lower lights an hour before bed.", "suggested_time": "evening"}]}"#,
    ])
    .await;
    let child_id = create_child(&server, "Mira").await;

    let response = server
        .post("/parent/chat/general/tasks")
        .json(&json!({
            "question": "How do I improve sleep?",
            "answer": "Keep a consistent routine with dim lights and quiet time.",
            "child_id": child_id,
        }))
        .await;
    response.assert_status_ok();
    let tasks = response.json::<Value>()["tasks"].as_array().expect("tasks").clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["title"], "Dim the lights");
    assert_eq!(tasks[0]["suggested_time"], "evening");
}

#[tokio::test]
async fn test_avatar_storage_round_trip() {
    let server = server_with_script(vec![]).await;
    let child_id = create_child(&server, "Mira").await;

    let missing = server.get(&format!("/child/{child_id}/avatar")).await;
    assert_eq!(missing.status_code(), 404);

    server
        .post(&format!("/child/{child_id}/avatar"))
        .json(&json!({
            "base_avatar": "avatars/mira.png",
            "emotions": { "happy": "avatars/mira-happy.png" },
        }))
        .await
        .assert_status_ok();

    let fetched = server.get(&format!("/child/{child_id}/avatar")).await;
    fetched.assert_status_ok();
    let body = fetched.json::<Value>();
    assert_eq!(body["base_avatar"], "avatars/mira.png");
    assert_eq!(body["emotions"]["happy"], "avatars/mira-happy.png");
}

#[tokio::test]
async fn test_delete_child_removes_history() {
    let server = server_with_script(vec![]).await;
    let child_id = create_child(&server, "Mira").await;

    server
        .post(&format!("/child/{child_id}/task-response"))
        .json(&json!({ "task_name": "puzzle", "emotion": "happy", "stress_level": 1 }))
        .await
        .assert_status_ok();

    let deleted = server.delete(&format!("/child/{child_id}")).await;
    deleted.assert_status_ok();

    let gone = server.get(&format!("/child/{child_id}")).await;
    assert_eq!(gone.status_code(), 404);
}
