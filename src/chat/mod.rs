//! Parent chat orchestration.
//!
//! Turns a parent's free-text question into a constrained, read-only query
//! plan: the generator translates the question into a single SELECT scoped to
//! the child via a bound parameter, a safety gate vets the statement, the
//! rows (or a fixed recent-data snapshot when nothing usable comes back) are
//! narrated by the generator, and the question/answer pair is persisted so
//! session history stays complete across generator outages.

use serde_json::json;

use crate::database::Store;
use crate::database::models::ChatSessionRow;
use crate::error::ApiError;
use crate::llm::{CompletionRequest, GenerationCapability, Message};

/// Default number of prior turns used as conversational context.
pub const DEFAULT_CHAT_HISTORY_LIMIT: i64 = 8;
/// Upper bound on caller-provided history limits.
pub const MAX_CHAT_HISTORY_LIMIT: i64 = 30;

const ROW_PREVIEW_LIMIT: usize = 25;
const SNAPSHOT_LIMIT: i64 = 5;
const NO_QUERY_SENTINEL: &str = "NO_QUERY";
const FALLBACK_LABEL: &str = "FALLBACK_SNAPSHOT";

const NOT_ENOUGH_DATA_ANSWER: &str =
    "There is not enough data in the app yet to answer this question about the child.";
const GENERATION_DOWN_ANSWER: &str =
    "I could not generate a response right now. Please try again in a few minutes.";
const NARRATION_DOWN_ANSWER: &str =
    "I found relevant data, but I could not craft a response right now. Please check again later.";

const FORBIDDEN_TOKENS: [&str; 12] = [
    "insert", "update", "delete", "drop", "alter", "truncate", "grant", "revoke", "comment", "--",
    "/*", "*/",
];

const SQL_SCHEMA_SNIPPET: &str = r"Table children(
    id INTEGER PRIMARY KEY,
    parent_id INTEGER,
    name TEXT,
    age INTEGER,
    disability TEXT,
    level TEXT,
    created_at DATETIME
)
Table child_events(
    id INTEGER PRIMARY KEY,
    child_id INTEGER,
    event_type TEXT,
    payload JSON,
    timestamp DATETIME
)
Table task_emotion_logs(
    id INTEGER PRIMARY KEY,
    child_id INTEGER,
    task_name TEXT,
    stress_level INTEGER,
    emotion TEXT,
    created_at DATETIME
)
Table level_result_logs(
    id INTEGER PRIMARY KEY,
    child_id INTEGER,
    level INTEGER,
    expected_answer TEXT,
    child_answer TEXT,
    created_at DATETIME
)
Table speech_button_usage(
    id INTEGER PRIMARY KEY,
    child_id INTEGER,
    button_key TEXT,
    label TEXT,
    category TEXT,
    press_count INTEGER,
    created_at DATETIME,
    updated_at DATETIME
)";

/// Result of one orchestrated chat turn.
#[derive(Debug)]
pub struct ChatAnswer {
    /// The narrated (or degraded) answer text.
    pub answer: String,
    /// The executed statement, absent when a snapshot or no data was used.
    pub sql: Option<String>,
    /// The serialized rows backing the answer.
    pub rows: Vec<serde_json::Value>,
    /// Session the exchange was appended to.
    pub session_id: i64,
    /// Persisted question message id.
    pub question_message_id: i64,
    /// Persisted answer message id.
    pub answer_message_id: i64,
}

/// Clamp a caller-provided history limit into `[0, MAX_CHAT_HISTORY_LIMIT]`.
pub fn normalize_history_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_CHAT_HISTORY_LIMIT)
        .clamp(0, MAX_CHAT_HISTORY_LIMIT)
}

/// Safety gate for generated statements: after trimming one trailing
/// semicolon the statement must start with `select` (case-insensitive) and
/// contain no denylisted token.
pub fn is_safe_select_query(query: &str) -> bool {
    let stripped = query.trim();
    if stripped.is_empty() {
        return false;
    }

    let stripped = stripped
        .strip_suffix(';')
        .map_or(stripped, str::trim_end);

    let lowered = stripped.to_lowercase();
    if !lowered.starts_with("select") {
        return false;
    }

    !FORBIDDEN_TOKENS.iter().any(|token| lowered.contains(token))
}

/// Orchestrate one chat turn for a child.
pub async fn answer_child_question(
    store: &Store,
    generator: &GenerationCapability,
    child_id: i64,
    question: &str,
    session_id: Option<i64>,
    history_limit: Option<i64>,
) -> Result<ChatAnswer, ApiError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ApiError::validation("The parent's question is required."));
    }

    let history_limit = normalize_history_limit(history_limit);
    let session = ensure_chat_session(store, child_id, session_id).await?;
    let history = store.recent_chat_messages(session.id, history_limit).await?;
    let history_turns: Vec<Message> = history
        .iter()
        .map(|message| {
            if message.role == "assistant" {
                Message::assistant(message.content.clone())
            } else {
                Message::user(message.content.clone())
            }
        })
        .collect();

    let sql_prompt = format!(
        "You translate caregiver questions into SAFE read-only SQL for the database described below.\n\
         Rules you MUST follow:\n\
         - Return ONLY a single SELECT statement without explanations.\n\
         - Never modify data.\n\
         - The query must always restrict results to the provided child using either\n\
           `children.id = :child_id` or `table.child_id = :child_id`.\n\
         - Utilize the bound parameter `:child_id`, which already contains the numeric value {child_id}; never interpolate it manually.\n\
         - Prefer LIMIT 50 to keep the dataset compact.\n\
         - When the schema cannot answer the question, respond with the literal string {NO_QUERY_SENTINEL}.\n\n\
         Database schema:\n{SQL_SCHEMA_SNIPPET}\n\n\
         Natural language question:\n{question}"
    );

    let sql_request = CompletionRequest::new(vec![
        Message::system("You are a precise SQL assistant for a pediatric progress database."),
        Message::user(sql_prompt),
    ])
    .with_temperature(0.0)
    .with_max_tokens(350);

    let generated_sql = generator.try_complete(sql_request).await;

    let mut serialized_rows: Vec<serde_json::Value> = Vec::new();
    let mut executed_sql: Option<String> = None;
    let mut fallback_snapshot = false;

    match generated_sql {
        None => {
            let snapshot = gather_structured_snapshot(store, child_id).await?;
            if snapshot.is_empty() {
                return finalize_degraded(
                    store,
                    &session,
                    question,
                    GENERATION_DOWN_ANSWER,
                    None,
                    history_limit,
                    false,
                    "sql_generation_failed",
                )
                .await;
            }
            serialized_rows = snapshot;
            fallback_snapshot = true;
        }
        Some(sql) => {
            let sql = sql.trim().to_string();
            if sql.eq_ignore_ascii_case(NO_QUERY_SENTINEL) {
                let snapshot = gather_structured_snapshot(store, child_id).await?;
                if snapshot.is_empty() {
                    return finalize_degraded(
                        store,
                        &session,
                        question,
                        NOT_ENOUGH_DATA_ANSWER,
                        None,
                        history_limit,
                        false,
                        "no_query",
                    )
                    .await;
                }
                serialized_rows = snapshot;
                fallback_snapshot = true;
            } else {
                if !is_safe_select_query(&sql) {
                    return Err(ApiError::validation(
                        "The generated query is not safe to execute.",
                    ));
                }

                let trimmed = sql.trim_end_matches(';').trim_end().to_string();
                let rows = match store.execute_select(&trimmed, child_id).await {
                    Ok(rows) => rows,
                    Err(err) => {
                        tracing::error!(child_id, error = %err, "Generated SQL failed");
                        return Err(ApiError::validation(
                            "An error occurred while running the query against the database.",
                        ));
                    }
                };

                executed_sql = Some(trimmed);

                if rows.is_empty() {
                    let snapshot = gather_structured_snapshot(store, child_id).await?;
                    if snapshot.is_empty() {
                        return finalize_degraded(
                            store,
                            &session,
                            question,
                            NOT_ENOUGH_DATA_ANSWER,
                            executed_sql.as_deref(),
                            history_limit,
                            false,
                            "empty_rows",
                        )
                        .await;
                    }
                    serialized_rows = snapshot;
                    fallback_snapshot = true;
                } else {
                    serialized_rows = rows;
                }
            }
        }
    }

    if serialized_rows.is_empty() {
        return finalize_degraded(
            store,
            &session,
            question,
            NOT_ENOUGH_DATA_ANSWER,
            None,
            history_limit,
            fallback_snapshot,
            "no_rows",
        )
        .await;
    }

    let rows_json = serde_json::to_string(&serialized_rows[..serialized_rows.len().min(ROW_PREVIEW_LIMIT)])
        .unwrap_or_else(|_| "[]".to_string());
    let sql_label = if fallback_snapshot {
        FALLBACK_LABEL
    } else {
        executed_sql.as_deref().unwrap_or(FALLBACK_LABEL)
    };

    let narration_prompt = format!(
        "You act as a caregiver assistant. Use only the information provided below.\n\
         - Database schema: {SQL_SCHEMA_SNIPPET}\n\
         - Parent question: {question}\n\
         - Child ID: {child_id}\n\
         - SQL query: {sql_label}\n\
         - Relevant rows: {rows_json}\n\n\
         Explain what the data reveals about the child's emotional state and progress and tie it \
         back to the parent's question. Respond in warm, concise English using at most 4 sentences \
         (bullet points allowed for clarity). If the data is limited or empty, state that clearly, \
         give a helpful suggestion, and encourage logging more activities for accurate insights."
    );

    let mut narration_messages = vec![Message::system(
        "You respond to parents calmly, using only the insights extracted from SQL without inventing new information.",
    )];
    narration_messages.extend(history_turns);
    narration_messages.push(Message::user(narration_prompt));

    let narration_request = CompletionRequest::new(narration_messages)
        .with_temperature(0.4)
        .with_max_tokens(350);

    let answer = generator
        .try_complete(narration_request)
        .await
        .unwrap_or_else(|| NARRATION_DOWN_ANSWER.to_string());

    let recorded_sql = if fallback_snapshot {
        None
    } else {
        executed_sql.clone()
    };
    let metadata = json!({
        "executed_sql": recorded_sql,
        "row_count": serialized_rows.len(),
        "rows_preview": serialized_rows[..serialized_rows.len().min(ROW_PREVIEW_LIMIT)],
        "history_consumed": history_limit,
        "fallback_snapshot": fallback_snapshot,
    });

    let (question_message_id, answer_message_id) = store
        .append_chat_exchange(session.id, session.child_id, question, &answer, &metadata)
        .await?;

    Ok(ChatAnswer {
        answer,
        sql: recorded_sql,
        rows: serialized_rows,
        session_id: session.id,
        question_message_id,
        answer_message_id,
    })
}

/// Resolve or create the chat session for a turn. An explicit session id must
/// belong to the given child.
async fn ensure_chat_session(
    store: &Store,
    child_id: i64,
    session_id: Option<i64>,
) -> Result<ChatSessionRow, ApiError> {
    match session_id {
        Some(session_id) => store
            .chat_session_for_child(session_id, child_id)
            .await?
            .ok_or_else(|| {
                ApiError::validation("The specified chat session does not exist for this child.")
            }),
        None => Ok(store.create_chat_session(child_id).await?),
    }
}

/// Persist a degraded exchange and build its response.
#[allow(clippy::too_many_arguments, reason = "mirrors the finalize contract")]
async fn finalize_degraded(
    store: &Store,
    session: &ChatSessionRow,
    question: &str,
    answer: &str,
    executed_sql: Option<&str>,
    history_limit: i64,
    fallback_snapshot: bool,
    reason: &str,
) -> Result<ChatAnswer, ApiError> {
    let recorded_sql = if fallback_snapshot { None } else { executed_sql };
    let metadata = json!({
        "executed_sql": recorded_sql,
        "row_count": 0,
        "history_consumed": history_limit,
        "fallback_snapshot": fallback_snapshot,
        "reason": reason,
    });

    let (question_message_id, answer_message_id) = store
        .append_chat_exchange(session.id, session.child_id, question, answer, &metadata)
        .await?;

    Ok(ChatAnswer {
        answer: answer.to_string(),
        sql: recorded_sql.map(ToString::to_string),
        rows: Vec::new(),
        session_id: session.id,
        question_message_id,
        answer_message_id,
    })
}

/// Fixed recent-rows summary used when the generated query yields nothing:
/// a child summary record followed by the most recent task logs, level
/// results, events, and speech-button usage.
pub async fn gather_structured_snapshot(
    store: &Store,
    child_id: i64,
) -> sqlx::Result<Vec<serde_json::Value>> {
    let mut snapshot: Vec<serde_json::Value> = Vec::new();

    let child_section = store.child_by_id(child_id).await?.map(|child| {
        json!({
            "section": "child",
            "name": child.name,
            "age": child.age,
            "disability": child.disability,
            "level": child.level,
            "created_at": child.created_at,
        })
    });

    for log in store.recent_task_logs(child_id, SNAPSHOT_LIMIT).await? {
        snapshot.push(json!({
            "section": "task_emotion_logs",
            "task_name": log.task_name,
            "emotion": log.emotion,
            "stress_level": log.stress_level,
            "created_at": log.created_at,
        }));
    }

    for result in store.recent_level_results(child_id, SNAPSHOT_LIMIT).await? {
        snapshot.push(json!({
            "section": "level_result_logs",
            "level": result.level,
            "expected_answer": result.expected_answer,
            "child_answer": result.child_answer,
            "created_at": result.created_at,
        }));
    }

    for event in store.recent_events(child_id, SNAPSHOT_LIMIT).await? {
        snapshot.push(json!({
            "section": "child_events",
            "event_type": event.event_type,
            "payload": event.payload,
            "timestamp": event.timestamp,
        }));
    }

    for usage in store.top_speech_buttons(child_id, SNAPSHOT_LIMIT).await? {
        snapshot.push(json!({
            "section": "speech_button_usage",
            "button_key": usage.button_key,
            "label": usage.label,
            "category": usage.category,
            "press_count": usage.press_count,
            "updated_at": usage.updated_at,
        }));
    }

    if !snapshot.is_empty() {
        if let Some(child_section) = child_section {
            snapshot.insert(0, child_section);
        }
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_history_limit_clamps() {
        assert_eq!(normalize_history_limit(None), DEFAULT_CHAT_HISTORY_LIMIT);
        assert_eq!(normalize_history_limit(Some(-3)), 0);
        assert_eq!(normalize_history_limit(Some(0)), 0);
        assert_eq!(normalize_history_limit(Some(12)), 12);
        assert_eq!(normalize_history_limit(Some(99)), MAX_CHAT_HISTORY_LIMIT);
    }

    #[test]
    fn test_safety_gate_accepts_plain_selects() {
        assert!(is_safe_select_query("SELECT * FROM task_emotion_logs WHERE child_id = :child_id"));
        assert!(is_safe_select_query("select name from children where id = :child_id;"));
        assert!(is_safe_select_query("  SeLeCt 1  "));
    }

    #[test]
    fn test_safety_gate_rejects_non_selects() {
        assert!(!is_safe_select_query(""));
        assert!(!is_safe_select_query("   "));
        assert!(!is_safe_select_query("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_safe_select_query("DELETE FROM children"));
    }

    #[test]
    fn test_safety_gate_rejects_denylisted_tokens() {
        assert!(!is_safe_select_query("SELECT 1; DROP TABLE children"));
        assert!(!is_safe_select_query("SELECT 1 -- sneaky"));
        assert!(!is_safe_select_query("SELECT /* hidden */ 1"));
        assert!(!is_safe_select_query("SELECT last_update FROM children WHERE id = :child_id"));
    }

    mod pipeline {
        use std::sync::{Arc, Mutex};

        use async_trait::async_trait;

        use super::*;
        use crate::database::Store;
        use crate::database::models::ChildRow;
        use crate::llm::{GenerationCapability, LlmDriver};

        /// Driver that pops scripted completions and records every request.
        struct ScriptedDriver {
            script: Mutex<Vec<anyhow::Result<String>>>,
            requests: Mutex<Vec<CompletionRequest>>,
        }

        impl ScriptedDriver {
            fn new(script: Vec<anyhow::Result<String>>) -> Arc<Self> {
                Arc::new(Self {
                    script: Mutex::new(script),
                    requests: Mutex::new(Vec::new()),
                })
            }

            fn capability(driver: &Arc<Self>) -> GenerationCapability {
                GenerationCapability::configured(Arc::clone(driver) as Arc<dyn LlmDriver>)
            }

            fn requests(&self) -> Vec<CompletionRequest> {
                self.requests.lock().expect("lock").clone()
            }
        }

        #[async_trait]
        impl LlmDriver for ScriptedDriver {
            async fn complete(&self, req: CompletionRequest) -> anyhow::Result<String> {
                self.requests.lock().expect("lock").push(req);
                let mut script = self.script.lock().expect("lock");
                if script.is_empty() {
                    anyhow::bail!("script exhausted")
                } else {
                    script.remove(0)
                }
            }

            async fn embed(&self, _input: &str) -> anyhow::Result<Vec<f32>> {
                Ok(vec![0.0; 8])
            }
        }

        async fn seeded_store() -> (Store, ChildRow) {
            let store = Store::in_memory().await.expect("store");
            let parent = store
                .create_user("p@example.com", "hash", "parent")
                .await
                .expect("parent");
            let child = store
                .create_child(parent.id, "Mira", 6, Some("autism"), "beginner")
                .await
                .expect("child");
            (store, child)
        }

        #[tokio::test]
        async fn test_no_query_with_empty_snapshot_degrades_and_persists_pair() {
            let (store, child) = seeded_store().await;
            let driver = ScriptedDriver::new(vec![Ok("NO_QUERY".to_string())]);

            let answer = answer_child_question(
                &store,
                &ScriptedDriver::capability(&driver),
                child.id,
                "How is my child doing?",
                None,
                None,
            )
            .await
            .expect("answer");

            assert_eq!(answer.answer, NOT_ENOUGH_DATA_ANSWER);
            assert!(answer.sql.is_none());
            assert!(answer.rows.is_empty());

            let messages = store
                .chat_messages_asc(answer.session_id, 50)
                .await
                .expect("messages");
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].role, "user");
            assert_eq!(messages[0].content, "How is my child doing?");
            assert_eq!(messages[1].role, "assistant");
            assert_eq!(messages[1].message_meta["reason"], "no_query");

            // Only the text-to-SQL call happened; no narration for empty data.
            assert_eq!(driver.requests().len(), 1);
        }

        #[tokio::test]
        async fn test_no_query_with_data_uses_snapshot_and_narrates() {
            let (store, child) = seeded_store().await;
            store
                .insert_task_log(child.id, "puzzle", 2, "happy")
                .await
                .expect("log");

            let driver = ScriptedDriver::new(vec![
                Ok("NO_QUERY".to_string()),
                Ok("Mira enjoyed the puzzle and stayed calm.".to_string()),
            ]);

            let answer = answer_child_question(
                &store,
                &ScriptedDriver::capability(&driver),
                child.id,
                "How did the puzzle go?",
                None,
                None,
            )
            .await
            .expect("answer");

            assert_eq!(answer.answer, "Mira enjoyed the puzzle and stayed calm.");
            assert!(answer.sql.is_none(), "snapshot turns record no SQL");
            // Child summary record plus the task log.
            assert_eq!(answer.rows.len(), 2);
            assert_eq!(answer.rows[0]["section"], "child");

            let messages = store
                .chat_messages_asc(answer.session_id, 50)
                .await
                .expect("messages");
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[1].message_meta["fallback_snapshot"], true);
            assert_eq!(messages[1].message_meta["executed_sql"], serde_json::Value::Null);

            let narration = &driver.requests()[1];
            let prompt = &narration.messages.last().expect("prompt").content;
            assert!(prompt.contains("FALLBACK_SNAPSHOT"));
        }

        #[tokio::test]
        async fn test_generated_select_is_executed_and_recorded() {
            let (store, child) = seeded_store().await;
            store
                .insert_task_log(child.id, "puzzle", 4, "sad")
                .await
                .expect("log");

            let sql = "SELECT task_name, stress_level FROM task_emotion_logs WHERE child_id = :child_id;";
            let driver = ScriptedDriver::new(vec![
                Ok(sql.to_string()),
                Ok("One stressful puzzle session was logged.".to_string()),
            ]);

            let answer = answer_child_question(
                &store,
                &ScriptedDriver::capability(&driver),
                child.id,
                "Which tasks were stressful?",
                None,
                None,
            )
            .await
            .expect("answer");

            assert_eq!(
                answer.sql.as_deref(),
                Some("SELECT task_name, stress_level FROM task_emotion_logs WHERE child_id = :child_id")
            );
            assert_eq!(answer.rows.len(), 1);
            assert_eq!(answer.rows[0]["task_name"], "puzzle");

            let messages = store
                .chat_messages_asc(answer.session_id, 50)
                .await
                .expect("messages");
            assert_eq!(messages[1].message_meta["row_count"], 1);
            assert_eq!(messages[1].message_meta["fallback_snapshot"], false);
        }

        #[tokio::test]
        async fn test_unsafe_statement_is_a_hard_error() {
            let (store, child) = seeded_store().await;
            let driver = ScriptedDriver::new(vec![Ok("DROP TABLE children".to_string())]);

            let result = answer_child_question(
                &store,
                &ScriptedDriver::capability(&driver),
                child.id,
                "Break things",
                None,
                None,
            )
            .await;

            assert!(matches!(result, Err(ApiError::Validation(_))));
        }

        #[tokio::test]
        async fn test_invalid_session_is_rejected() {
            let (store, child) = seeded_store().await;
            let driver = ScriptedDriver::new(vec![]);

            let result = answer_child_question(
                &store,
                &ScriptedDriver::capability(&driver),
                child.id,
                "Anything new?",
                Some(4242),
                None,
            )
            .await;

            assert!(matches!(result, Err(ApiError::Validation(_))));
        }

        #[tokio::test]
        async fn test_history_limit_zero_passes_no_prior_turns() {
            let (store, child) = seeded_store().await;
            store
                .insert_task_log(child.id, "puzzle", 2, "happy")
                .await
                .expect("log");

            let session = store.create_chat_session(child.id).await.expect("session");
            store
                .append_chat_exchange(
                    session.id,
                    child.id,
                    "earlier question",
                    "earlier answer",
                    &json!({}),
                )
                .await
                .expect("exchange");

            let driver = ScriptedDriver::new(vec![
                Ok("NO_QUERY".to_string()),
                Ok("All calm.".to_string()),
            ]);

            answer_child_question(
                &store,
                &ScriptedDriver::capability(&driver),
                child.id,
                "And now?",
                Some(session.id),
                Some(0),
            )
            .await
            .expect("answer");

            let narration = &driver.requests()[1];
            // System prompt + final user prompt only; no replayed turns.
            assert_eq!(narration.messages.len(), 2);
        }

        #[tokio::test]
        async fn test_history_is_prepended_oldest_first() {
            let (store, child) = seeded_store().await;
            store
                .insert_task_log(child.id, "puzzle", 2, "happy")
                .await
                .expect("log");

            let session = store.create_chat_session(child.id).await.expect("session");
            for n in 0..2 {
                store
                    .append_chat_exchange(
                        session.id,
                        child.id,
                        &format!("q{n}"),
                        &format!("a{n}"),
                        &json!({}),
                    )
                    .await
                    .expect("exchange");
            }

            let driver = ScriptedDriver::new(vec![
                Ok("NO_QUERY".to_string()),
                Ok("Still calm.".to_string()),
            ]);

            answer_child_question(
                &store,
                &ScriptedDriver::capability(&driver),
                child.id,
                "And now?",
                Some(session.id),
                Some(3),
            )
            .await
            .expect("answer");

            let narration = &driver.requests()[1];
            // system, then the 3 most recent turns oldest-first, then prompt.
            assert_eq!(narration.messages.len(), 5);
            assert_eq!(narration.messages[1].content, "a0");
            assert_eq!(narration.messages[2].content, "q1");
            assert_eq!(narration.messages[3].content, "a1");
        }
    }
}
