//! Parent-facing endpoints: alerts, aggregations, summaries, and chat.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::api::parse_i64;
use crate::chat;
use crate::database::Store;
use crate::database::models::ChildRow;
use crate::error::ApiError;
use crate::rag;
use crate::tasks;
use crate::AppState;

const CHILD_NOT_FOUND: &str = "Child not found";
const PARENT_NOT_FOUND: &str = "Parent not found";

/// Create the parent router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/parent/child/{child_id}/alerts", get(list_child_alerts))
        .route("/parent/alerts/{alert_id}/acknowledge", post(acknowledge_alert))
        .route("/parent/child/{child_id}/task-emotions", get(child_task_emotions))
        .route(
            "/parent/child/{child_id}/task-stress-history",
            get(child_task_stress_history),
        )
        .route(
            "/parent/child/{child_id}/task-templates",
            get(child_task_templates),
        )
        .route("/parent/{parent_id}/summary", get(parent_summary))
        .route("/parent/chat/general", post(parent_general_chat))
        .route("/parent/chat/general/history", get(parent_general_chat_history))
        .route("/parent/chat/general/tasks", post(parent_general_chat_tasks))
        .route("/parent/chat/{child_id}", post(parent_chat))
        .route("/parent/chat/{child_id}/history", get(parent_chat_history))
}

async fn require_child(store: &Store, child_id: i64) -> Result<ChildRow, ApiError> {
    store
        .child_by_id(child_id)
        .await?
        .ok_or_else(|| ApiError::not_found(CHILD_NOT_FOUND))
}

// ---------- alerts ----------

#[derive(Debug, Deserialize)]
struct AlertListParams {
    #[serde(default)]
    include_acknowledged: Option<String>,
    #[serde(default)]
    limit: Option<String>,
}

async fn list_child_alerts(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Query(params): Query<AlertListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let include_acknowledged = params
        .include_acknowledged
        .as_deref()
        .is_some_and(|raw| raw.eq_ignore_ascii_case("true"));
    let limit = params
        .limit
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(5)
        .clamp(1, 50);

    require_child(&state.store, child_id).await?;
    let alerts = state
        .store
        .list_alerts(child_id, include_acknowledged, limit)
        .await?;

    Ok(Json(json!({ "alerts": alerts })))
}

#[derive(Debug, Deserialize)]
struct AcknowledgePayload {
    #[serde(default)]
    acknowledged: Option<bool>,
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
    Json(payload): Json<AcknowledgePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let acknowledged = payload.acknowledged.unwrap_or(true);
    let alert = state
        .store
        .set_alert_acknowledged(alert_id, acknowledged)
        .await?
        .ok_or_else(|| ApiError::not_found("Alert not found"))?;

    Ok(Json(json!({ "alert": alert })))
}

// ---------- aggregations ----------

#[derive(Debug, Deserialize)]
struct TaskEmotionParams {
    #[serde(default)]
    days: Option<String>,
}

async fn child_task_emotions(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Query(params): Query<TaskEmotionParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let days = params
        .days
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .map(|days| days.max(1));

    require_child(&state.store, child_id).await?;

    let cutoff = days.map(crate::stats::window_cutoff);
    let rows = state
        .store
        .emotion_counts(child_id, cutoff.as_deref())
        .await?;

    let mut counts: HashMap<String, i64> = HashMap::new();
    for (emotion, count) in rows {
        let key = emotion.trim().to_lowercase();
        let key = if key.is_empty() { "unknown".to_string() } else { key };
        *counts.entry(key).or_insert(0) += count;
    }
    let total: i64 = counts.values().sum();

    Ok(Json(json!({
        "child_id": child_id,
        "days_window": days,
        "total_logs": total,
        "emotion_counts": counts,
    })))
}

#[derive(Debug, Deserialize)]
struct StressHistoryParams {
    #[serde(default)]
    limit: Option<String>,
}

async fn child_task_stress_history(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Query(params): Query<StressHistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params
        .limit
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(5)
        .clamp(1, 25);

    require_child(&state.store, child_id).await?;
    let logs = state.store.recent_task_logs(child_id, limit).await?;

    // Most recent last, for chronological charting.
    let records: Vec<serde_json::Value> = logs
        .iter()
        .rev()
        .map(|log| {
            json!({
                "id": log.id,
                "task_name": log.task_name,
                "stress_level": log.stress_level,
                "emotion": log.emotion,
                "logged_at": log.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "child_id": child_id, "records": records })))
}

#[derive(Debug, Deserialize)]
struct TaskTemplateParams {
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    sample_size: Option<String>,
}

async fn child_task_templates(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Query(params): Query<TaskTemplateParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params
        .limit
        .as_deref()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(5);
    let sample_size = params
        .sample_size
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(25)
        .clamp(5, 100);

    let child = require_child(&state.store, child_id).await?;
    let logs = state.store.recent_task_logs(child_id, sample_size).await?;
    let templates =
        tasks::generate_child_task_templates(&state.generator, &child, &logs, limit.max(1)).await;

    Ok(Json(json!({
        "child_id": child_id,
        "templates": templates,
        "generated_at": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "log_sample_count": logs.len(),
    })))
}

// ---------- summary ----------

/// Display name derived from the email local part.
fn derive_parent_name(email: &str) -> String {
    let raw = email.split('@').next().unwrap_or("Parent");
    let cleaned = raw.replace(['.', '_'], " ");
    let titled: Vec<String> = cleaned
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();

    if titled.is_empty() {
        "Parent".to_string()
    } else {
        titled.join(" ")
    }
}

async fn parent_summary(
    State(state): State<AppState>,
    Path(parent_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let parent = state
        .store
        .user_by_id(parent_id)
        .await?
        .ok_or_else(|| ApiError::not_found(PARENT_NOT_FOUND))?;

    let children = state.store.list_children(Some(parent_id)).await?;
    let total_task_logs = state.store.count_task_logs_for_parent(parent_id).await?;
    let active_alerts = state.store.count_active_alerts_for_parent(parent_id).await?;

    let mut children_payload = Vec::with_capacity(children.len());
    for child in &children {
        let profile = state.store.profile_for_child(child.id).await?;
        children_payload.push(json!({
            "id": child.id,
            "name": child.name,
            "age": child.age,
            "disability": child.disability,
            "level": child.level,
            "created_at": child.created_at,
            "profile": profile.map(|profile| json!({
                "name": child.name,
                "age": child.age,
                "disability": child.disability,
                "notes": profile.notes,
                "guidance": profile.guidance,
                "traits": profile.traits,
            })),
        }));
    }

    Ok(Json(json!({
        "parent_id": parent.id,
        "name": derive_parent_name(&parent.email),
        "email": parent.email,
        "child_count": children_payload.len(),
        "stats": {
            "active_alerts": active_alerts,
            "task_logs": total_task_logs,
        },
        "children": children_payload,
    })))
}

// ---------- chat ----------

#[derive(Debug, Deserialize)]
struct ChatPayload {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    session_id: Option<serde_json::Value>,
    #[serde(default)]
    history_limit: Option<serde_json::Value>,
}

fn optional_number(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Option<i64>, ApiError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => parse_i64(value)
            .map(Some)
            .ok_or_else(|| ApiError::validation(format!("'{field}' must be a number."))),
    }
}

async fn parent_chat(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let question = payload
        .question
        .as_deref()
        .ok_or_else(|| ApiError::validation("The 'question' field is required."))?;
    let session_id = optional_number(payload.session_id.as_ref(), "session_id")?;
    let history_limit = optional_number(payload.history_limit.as_ref(), "history_limit")?;

    require_child(&state.store, child_id).await?;

    let answer = chat::answer_child_question(
        &state.store,
        &state.generator,
        child_id,
        question,
        session_id,
        history_limit,
    )
    .await?;

    Ok(Json(json!({
        "answer": answer.answer,
        "sql": answer.sql,
        "rows": answer.rows,
        "session_id": answer.session_id,
        "message_ids": {
            "question": answer.question_message_id,
            "answer": answer.answer_message_id,
        },
    })))
}

#[derive(Debug, Deserialize)]
struct ChatHistoryParams {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    limit: Option<String>,
}

async fn parent_chat_history(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Query(params): Query<ChatHistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = params.session_id.as_deref().and_then(|raw| raw.parse::<i64>().ok());
    let limit = params
        .limit
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(50)
        .clamp(1, 200);

    let session = match session_id {
        Some(session_id) => Some(
            state
                .store
                .chat_session_for_child(session_id, child_id)
                .await?
                .ok_or_else(|| ApiError::not_found("The session was not found for this child."))?,
        ),
        None => state.store.latest_chat_session(child_id).await?,
    };

    let Some(session) = session else {
        return Ok(Json(json!({ "session_id": null, "messages": [] })));
    };

    let messages: Vec<serde_json::Value> = state
        .store
        .chat_messages_asc(session.id, limit)
        .await?
        .iter()
        .map(|message| {
            json!({
                "message_id": message.id,
                "role": if message.role == "assistant" { "assistant" } else { "user" },
                "content": message.content,
                "created_at": message.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "session_id": session.id, "messages": messages })))
}

#[derive(Debug, Deserialize)]
struct GeneralChatPayload {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    parent_id: Option<serde_json::Value>,
    #[serde(default)]
    session_id: Option<serde_json::Value>,
}

async fn parent_general_chat(
    State(state): State<AppState>,
    Json(payload): Json<GeneralChatPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let question = payload
        .question
        .as_deref()
        .map(str::trim)
        .unwrap_or("");
    if question.is_empty() {
        return Err(ApiError::validation("The 'question' field is required."));
    }
    let parent_id = payload
        .parent_id
        .as_ref()
        .ok_or_else(|| ApiError::validation("The 'parent_id' field is required."))
        .and_then(|value| {
            parse_i64(value).ok_or_else(|| ApiError::validation("'parent_id' must be a number."))
        })?;
    let session_id = optional_number(payload.session_id.as_ref(), "session_id")?;

    if state.store.user_by_id(parent_id).await?.is_none() {
        return Err(ApiError::not_found(PARENT_NOT_FOUND));
    }

    let session = match session_id {
        Some(session_id) => state
            .store
            .general_session_for_parent(session_id, parent_id)
            .await?
            .ok_or_else(|| {
                ApiError::validation(
                    "The specified general chat session does not exist for this parent.",
                )
            })?,
        None => state.store.create_general_chat_session(parent_id).await?,
    };

    let response = rag::answer_general_question(
        &state.generator,
        state.vector.as_ref(),
        question,
        state.config.rag.top_k,
    )
    .await?;

    let metadata = json!({
        "fallback": response.fallback,
        "sources": response.sources,
        "note": response.note,
    });
    state
        .store
        .append_general_exchange(session.id, parent_id, question, &response.answer, &metadata)
        .await?;

    Ok(Json(json!({
        "answer": response.answer,
        "sources": response.sources,
        "fallback": response.fallback,
        "session_id": session.id,
    })))
}

#[derive(Debug, Deserialize)]
struct GeneralHistoryParams {
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    limit: Option<String>,
}

async fn parent_general_chat_history(
    State(state): State<AppState>,
    Query(params): Query<GeneralHistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let parent_id = params
        .parent_id
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or_else(|| ApiError::validation("parent_id is required"))?;
    let session_id = params.session_id.as_deref().and_then(|raw| raw.parse::<i64>().ok());
    let limit = params
        .limit
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(50)
        .clamp(1, 200);

    if state.store.user_by_id(parent_id).await?.is_none() {
        return Err(ApiError::not_found(PARENT_NOT_FOUND));
    }

    let session = match session_id {
        Some(session_id) => Some(
            state
                .store
                .general_session_for_parent(session_id, parent_id)
                .await?
                .ok_or_else(|| {
                    ApiError::not_found("The session was not found for this parent.")
                })?,
        ),
        None => state.store.latest_general_chat_session(parent_id).await?,
    };

    let Some(session) = session else {
        return Ok(Json(json!({ "session_id": null, "messages": [] })));
    };

    let messages: Vec<serde_json::Value> = state
        .store
        .general_messages_asc(session.id, limit)
        .await?
        .iter()
        .map(|message| {
            json!({
                "message_id": message.id,
                "role": if message.role == "assistant" { "assistant" } else { "user" },
                "content": message.content,
                "created_at": message.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "session_id": session.id, "messages": messages })))
}

#[derive(Debug, Deserialize)]
struct GeneralTasksPayload {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    child_id: Option<serde_json::Value>,
    #[serde(default)]
    child_name: Option<String>,
}

async fn parent_general_chat_tasks(
    State(state): State<AppState>,
    Json(payload): Json<GeneralTasksPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let question = payload.question.as_deref().map(str::trim).unwrap_or("");
    let guidance = payload.answer.as_deref().map(str::trim).unwrap_or("");
    if question.is_empty() || guidance.is_empty() {
        return Err(ApiError::validation(
            "Both 'question' and 'answer' are required.",
        ));
    }

    let child_id = payload
        .child_id
        .as_ref()
        .ok_or_else(|| ApiError::validation("child_id is required."))
        .and_then(|value| {
            parse_i64(value).ok_or_else(|| ApiError::validation("child_id must be a number."))
        })?;

    let child = require_child(&state.store, child_id).await?;
    let child_name = payload
        .child_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(&child.name)
        .to_string();

    let tasks = rag::plan_tasks_from_guidance(
        &state.generator,
        question,
        guidance,
        Some(&child_name),
        None,
    )
    .await?;

    Ok(Json(json!({ "tasks": tasks })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_parent_name() {
        assert_eq!(derive_parent_name("ana.maria@example.com"), "Ana Maria");
        assert_eq!(derive_parent_name("dan_pop@example.com"), "Dan Pop");
        assert_eq!(derive_parent_name("@example.com"), "Parent");
    }

    #[test]
    fn test_optional_number() {
        assert_eq!(optional_number(None, "x").expect("ok"), None);
        assert_eq!(
            optional_number(Some(&json!(3)), "x").expect("ok"),
            Some(3)
        );
        assert_eq!(
            optional_number(Some(&json!("3")), "x").expect("ok"),
            Some(3)
        );
        assert!(optional_number(Some(&json!("abc")), "x").is_err());
        assert_eq!(optional_number(Some(&json!(null)), "x").expect("ok"), None);
    }
}
