//! Row types for the relational store.
//!
//! Timestamps are stored as UTC ISO-8601 text (`strftime('%Y-%m-%dT%H:%M:%fZ')`),
//! which keeps them lexicographically ordered and lets responses pass them
//! through without reformatting.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account row. Passwords are stored as argon2 hashes, never plaintext.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserRow {
    #[serde(rename = "user_id")]
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: String,
}

/// Child row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChildRow {
    #[serde(rename = "child_id")]
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub age: i64,
    pub disability: Option<String>,
    pub level: String,
    pub created_at: String,
}

/// Typed trait bag attached to a child profile. The known fields are named
/// and validated at the API boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Traits {
    pub gender: Option<String>,
    pub hair: Option<String>,
    pub skin: Option<String>,
    #[serde(default)]
    pub glasses: bool,
}

/// Child profile row (1:1 with a child).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProfileRow {
    #[serde(skip_serializing)]
    pub id: i64,
    #[serde(skip_serializing)]
    pub child_id: i64,
    pub notes: Option<String>,
    pub guidance: Option<String>,
    #[sqlx(json)]
    pub traits: Traits,
}

/// Avatar row (1:1 with a child). Image references only; generation is
/// handled elsewhere.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AvatarRow {
    #[serde(skip_serializing)]
    pub id: i64,
    #[serde(skip_serializing)]
    pub child_id: i64,
    pub base_avatar: String,
    #[sqlx(json)]
    pub emotions: serde_json::Value,
}

/// Append-only behavioral event row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EventRow {
    pub id: i64,
    pub child_id: i64,
    pub event_type: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub timestamp: String,
}

/// Completed-task emotion/stress sample.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskEmotionLogRow {
    pub id: i64,
    pub child_id: i64,
    pub task_name: String,
    pub stress_level: i64,
    pub emotion: String,
    pub created_at: String,
}

/// Exercise attempt row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LevelResultRow {
    pub id: i64,
    pub child_id: i64,
    pub level: i64,
    pub expected_answer: String,
    pub child_answer: String,
    pub created_at: String,
}

/// Per-(child, button) press counter.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SpeechButtonRow {
    pub id: i64,
    pub child_id: i64,
    pub button_key: String,
    pub label: Option<String>,
    pub category: Option<String>,
    pub press_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Distress notification row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AlertRow {
    pub id: i64,
    pub child_id: i64,
    pub reason: String,
    pub message: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub acknowledged: bool,
    #[serde(skip_serializing)]
    pub latest_log_id: i64,
    #[serde(skip_serializing)]
    pub previous_log_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-child chat session row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatSessionRow {
    #[serde(rename = "session_id")]
    pub id: i64,
    pub child_id: i64,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-child chat message row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatMessageRow {
    #[serde(rename = "message_id")]
    pub id: i64,
    pub session_id: i64,
    pub child_id: i64,
    pub role: String,
    pub content: String,
    #[sqlx(json)]
    #[serde(rename = "meta")]
    pub message_meta: serde_json::Value,
    pub created_at: String,
}

/// Per-parent general chat session row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GeneralChatSessionRow {
    #[serde(rename = "session_id")]
    pub id: i64,
    pub parent_id: i64,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-parent general chat message row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GeneralChatMessageRow {
    #[serde(rename = "message_id")]
    pub id: i64,
    pub session_id: i64,
    pub parent_id: i64,
    pub role: String,
    pub content: String,
    #[sqlx(json)]
    #[serde(rename = "meta")]
    pub message_meta: serde_json::Value,
    pub created_at: String,
}

/// Seeded advice document row, read-only at runtime.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AdviceDocRow {
    pub id: i64,
    pub category: Option<String>,
    pub title: Option<String>,
    pub advice: Option<String>,
}
