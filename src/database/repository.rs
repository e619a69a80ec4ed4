//! Entity repositories over the SQLite store.
//!
//! All access to the relational schema goes through these inherent methods
//! on [`Store`]. Ordering ties on `created_at` are broken by `id` so that
//! rows inserted within the same millisecond still sort deterministically.

use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use super::Store;
use super::models::{
    AdviceDocRow, AlertRow, AvatarRow, ChatMessageRow, ChatSessionRow, ChildRow, EventRow,
    GeneralChatMessageRow, GeneralChatSessionRow, LevelResultRow, ProfileRow, SpeechButtonRow,
    TaskEmotionLogRow, Traits, UserRow,
};

const TOUCH: &str = "strftime('%Y-%m-%dT%H:%M:%fZ','now')";

// ---------- users ----------

impl Store {
    /// Insert a user. A duplicate email surfaces as a unique violation.
    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> sqlx::Result<UserRow> {
        sqlx::query_as(
            "INSERT INTO users (email, password_hash, role) VALUES (?, ?, ?)
             RETURNING id, email, password_hash, role, created_at",
        )
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .fetch_one(self.pool())
        .await
    }

    pub async fn user_by_email(&self, email: &str) -> sqlx::Result<Option<UserRow>> {
        sqlx::query_as(
            "SELECT id, email, password_hash, role, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn user_by_id(&self, id: i64) -> sqlx::Result<Option<UserRow>> {
        sqlx::query_as("SELECT id, email, password_hash, role, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
    }
}

// ---------- children & profiles ----------

impl Store {
    pub async fn create_child(
        &self,
        parent_id: i64,
        name: &str,
        age: i64,
        disability: Option<&str>,
        level: &str,
    ) -> sqlx::Result<ChildRow> {
        sqlx::query_as(
            "INSERT INTO children (parent_id, name, age, disability, level) VALUES (?, ?, ?, ?, ?)
             RETURNING id, parent_id, name, age, disability, level, created_at",
        )
        .bind(parent_id)
        .bind(name)
        .bind(age)
        .bind(disability)
        .bind(level)
        .fetch_one(self.pool())
        .await
    }

    pub async fn child_by_id(&self, id: i64) -> sqlx::Result<Option<ChildRow>> {
        sqlx::query_as(
            "SELECT id, parent_id, name, age, disability, level, created_at
             FROM children WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn list_children(&self, parent_id: Option<i64>) -> sqlx::Result<Vec<ChildRow>> {
        match parent_id {
            Some(parent_id) => {
                sqlx::query_as(
                    "SELECT id, parent_id, name, age, disability, level, created_at
                     FROM children WHERE parent_id = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(parent_id)
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query_as(
                    "SELECT id, parent_id, name, age, disability, level, created_at
                     FROM children ORDER BY created_at ASC, id ASC",
                )
                .fetch_all(self.pool())
                .await
            }
        }
    }

    /// Delete a child; owned rows cascade.
    pub async fn delete_child(&self, id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM children WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_child_identity(
        &self,
        id: i64,
        name: &str,
        age: i64,
        disability: Option<&str>,
    ) -> sqlx::Result<()> {
        sqlx::query(&format!(
            "UPDATE children SET name = ?, age = ?, disability = ?, updated_at = {TOUCH} WHERE id = ?"
        ))
        .bind(name)
        .bind(age)
        .bind(disability)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn profile_for_child(&self, child_id: i64) -> sqlx::Result<Option<ProfileRow>> {
        sqlx::query_as(
            "SELECT id, child_id, notes, guidance, traits FROM child_profiles WHERE child_id = ?",
        )
        .bind(child_id)
        .fetch_optional(self.pool())
        .await
    }

    /// Create or replace a child's profile notes and traits.
    pub async fn upsert_profile(
        &self,
        child_id: i64,
        notes: &str,
        traits: &Traits,
    ) -> sqlx::Result<ProfileRow> {
        let traits_json = serde_json::to_string(traits).unwrap_or_else(|_| "{}".to_string());
        sqlx::query_as(&format!(
            "INSERT INTO child_profiles (child_id, notes, traits) VALUES (?, ?, ?)
             ON CONFLICT(child_id) DO UPDATE SET
                 notes = excluded.notes,
                 traits = excluded.traits,
                 updated_at = {TOUCH}
             RETURNING id, child_id, notes, guidance, traits"
        ))
        .bind(child_id)
        .bind(notes)
        .bind(traits_json)
        .fetch_one(self.pool())
        .await
    }

    pub async fn set_profile_guidance(&self, child_id: i64, guidance: &str) -> sqlx::Result<()> {
        sqlx::query(&format!(
            "UPDATE child_profiles SET guidance = ?, updated_at = {TOUCH} WHERE child_id = ?"
        ))
        .bind(guidance)
        .bind(child_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn avatar_for_child(&self, child_id: i64) -> sqlx::Result<Option<AvatarRow>> {
        sqlx::query_as(
            "SELECT id, child_id, base_avatar, emotions FROM avatars WHERE child_id = ?",
        )
        .bind(child_id)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn upsert_avatar(
        &self,
        child_id: i64,
        base_avatar: &str,
        emotions: &serde_json::Value,
    ) -> sqlx::Result<AvatarRow> {
        sqlx::query_as(&format!(
            "INSERT INTO avatars (child_id, base_avatar, emotions) VALUES (?, ?, ?)
             ON CONFLICT(child_id) DO UPDATE SET
                 base_avatar = excluded.base_avatar,
                 emotions = excluded.emotions,
                 updated_at = {TOUCH}
             RETURNING id, child_id, base_avatar, emotions"
        ))
        .bind(child_id)
        .bind(base_avatar)
        .bind(emotions.to_string())
        .fetch_one(self.pool())
        .await
    }
}

// ---------- events & logs ----------

impl Store {
    pub async fn insert_event(
        &self,
        child_id: i64,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> sqlx::Result<i64> {
        let result =
            sqlx::query("INSERT INTO child_events (child_id, event_type, payload) VALUES (?, ?, ?)")
                .bind(child_id)
                .bind(event_type)
                .bind(payload.to_string())
                .execute(self.pool())
                .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn recent_events(&self, child_id: i64, limit: i64) -> sqlx::Result<Vec<EventRow>> {
        sqlx::query_as(
            "SELECT id, child_id, event_type, payload, timestamp FROM child_events
             WHERE child_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(child_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
    }

    /// Events at or after an ISO-8601 cutoff.
    pub async fn events_since(&self, child_id: i64, cutoff: &str) -> sqlx::Result<Vec<EventRow>> {
        sqlx::query_as(
            "SELECT id, child_id, event_type, payload, timestamp FROM child_events
             WHERE child_id = ? AND timestamp >= ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(child_id)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await
    }

    pub async fn insert_task_log(
        &self,
        child_id: i64,
        task_name: &str,
        stress_level: i64,
        emotion: &str,
    ) -> sqlx::Result<TaskEmotionLogRow> {
        sqlx::query_as(
            "INSERT INTO task_emotion_logs (child_id, task_name, stress_level, emotion)
             VALUES (?, ?, ?, ?)
             RETURNING id, child_id, task_name, stress_level, emotion, created_at",
        )
        .bind(child_id)
        .bind(task_name)
        .bind(stress_level)
        .bind(emotion)
        .fetch_one(self.pool())
        .await
    }

    pub async fn recent_task_logs(
        &self,
        child_id: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<TaskEmotionLogRow>> {
        sqlx::query_as(
            "SELECT id, child_id, task_name, stress_level, emotion, created_at
             FROM task_emotion_logs WHERE child_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(child_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
    }

    /// The two most recent samples newer than the consumed high-water mark.
    pub async fn unconsumed_task_logs(
        &self,
        child_id: i64,
        cutoff_log_id: Option<i64>,
    ) -> sqlx::Result<Vec<TaskEmotionLogRow>> {
        sqlx::query_as(
            "SELECT id, child_id, task_name, stress_level, emotion, created_at
             FROM task_emotion_logs WHERE child_id = ? AND id > ?
             ORDER BY created_at DESC, id DESC LIMIT 2",
        )
        .bind(child_id)
        .bind(cutoff_log_id.unwrap_or(0))
        .fetch_all(self.pool())
        .await
    }

    pub async fn insert_level_result(
        &self,
        child_id: i64,
        level: i64,
        expected_answer: &str,
        child_answer: &str,
    ) -> sqlx::Result<i64> {
        let result = sqlx::query(
            "INSERT INTO level_result_logs (child_id, level, expected_answer, child_answer)
             VALUES (?, ?, ?, ?)",
        )
        .bind(child_id)
        .bind(level)
        .bind(expected_answer)
        .bind(child_answer)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn recent_level_results(
        &self,
        child_id: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<LevelResultRow>> {
        sqlx::query_as(
            "SELECT id, child_id, level, expected_answer, child_answer, created_at
             FROM level_result_logs WHERE child_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(child_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
    }

    /// Increment a per-(child, button) press counter, creating the row on
    /// first use. Label and category only overwrite when non-empty.
    pub async fn increment_speech_button(
        &self,
        child_id: i64,
        button_key: &str,
        label: Option<&str>,
        category: Option<&str>,
        increment: i64,
    ) -> sqlx::Result<SpeechButtonRow> {
        sqlx::query_as(&format!(
            "INSERT INTO speech_button_usage (child_id, button_key, label, category, press_count)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(child_id, button_key) DO UPDATE SET
                 press_count = speech_button_usage.press_count + excluded.press_count,
                 label = COALESCE(excluded.label, speech_button_usage.label),
                 category = COALESCE(excluded.category, speech_button_usage.category),
                 updated_at = {TOUCH}
             RETURNING id, child_id, button_key, label, category, press_count, created_at, updated_at"
        ))
        .bind(child_id)
        .bind(button_key)
        .bind(label)
        .bind(category)
        .bind(increment)
        .fetch_one(self.pool())
        .await
    }

    pub async fn top_speech_buttons(
        &self,
        child_id: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<SpeechButtonRow>> {
        sqlx::query_as(
            "SELECT id, child_id, button_key, label, category, press_count, created_at, updated_at
             FROM speech_button_usage WHERE child_id = ?
             ORDER BY press_count DESC, id ASC LIMIT ?",
        )
        .bind(child_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
    }

    /// Raw emotion label counts, optionally windowed by an ISO-8601 cutoff.
    pub async fn emotion_counts(
        &self,
        child_id: i64,
        cutoff: Option<&str>,
    ) -> sqlx::Result<Vec<(String, i64)>> {
        let rows = match cutoff {
            Some(cutoff) => {
                sqlx::query(
                    "SELECT emotion, COUNT(id) AS n FROM task_emotion_logs
                     WHERE child_id = ? AND created_at >= ? GROUP BY emotion",
                )
                .bind(child_id)
                .bind(cutoff)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT emotion, COUNT(id) AS n FROM task_emotion_logs
                     WHERE child_id = ? GROUP BY emotion",
                )
                .bind(child_id)
                .fetch_all(self.pool())
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("emotion"), row.get::<i64, _>("n")))
            .collect())
    }

    pub async fn count_task_logs_for_parent(&self, parent_id: i64) -> sqlx::Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(t.id) AS n FROM task_emotion_logs t
             JOIN children c ON c.id = t.child_id WHERE c.parent_id = ?",
        )
        .bind(parent_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("n"))
    }

    pub async fn count_active_alerts_for_parent(&self, parent_id: i64) -> sqlx::Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(a.id) AS n FROM parent_alerts a
             JOIN children c ON c.id = a.child_id
             WHERE c.parent_id = ? AND a.acknowledged = 0",
        )
        .bind(parent_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("n"))
    }
}

// ---------- alerts ----------

impl Store {
    /// The consumed high-water mark: the pair maximum of the alert with the
    /// greatest `latest_log_id` for this child.
    pub async fn alert_cutoff_log_id(&self, child_id: i64) -> sqlx::Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT latest_log_id, previous_log_id FROM parent_alerts
             WHERE child_id = ? ORDER BY latest_log_id DESC LIMIT 1",
        )
        .bind(child_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| {
            let latest: i64 = row.get("latest_log_id");
            let previous: i64 = row.get("previous_log_id");
            latest.max(previous)
        }))
    }

    pub async fn alert_by_pair(
        &self,
        child_id: i64,
        latest_log_id: i64,
        previous_log_id: i64,
    ) -> sqlx::Result<Option<AlertRow>> {
        sqlx::query_as(
            "SELECT id, child_id, reason, message, payload, acknowledged,
                    latest_log_id, previous_log_id, created_at, updated_at
             FROM parent_alerts
             WHERE child_id = ? AND latest_log_id = ? AND previous_log_id = ?",
        )
        .bind(child_id)
        .bind(latest_log_id)
        .bind(previous_log_id)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn insert_alert(
        &self,
        child_id: i64,
        reason: &str,
        message: &str,
        payload: &serde_json::Value,
        latest_log_id: i64,
        previous_log_id: i64,
    ) -> sqlx::Result<AlertRow> {
        sqlx::query_as(
            "INSERT INTO parent_alerts
                 (child_id, reason, message, payload, latest_log_id, previous_log_id)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, child_id, reason, message, payload, acknowledged,
                       latest_log_id, previous_log_id, created_at, updated_at",
        )
        .bind(child_id)
        .bind(reason)
        .bind(message)
        .bind(payload.to_string())
        .bind(latest_log_id)
        .bind(previous_log_id)
        .fetch_one(self.pool())
        .await
    }

    pub async fn list_alerts(
        &self,
        child_id: i64,
        include_acknowledged: bool,
        limit: i64,
    ) -> sqlx::Result<Vec<AlertRow>> {
        let sql = if include_acknowledged {
            "SELECT id, child_id, reason, message, payload, acknowledged,
                    latest_log_id, previous_log_id, created_at, updated_at
             FROM parent_alerts WHERE child_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?"
        } else {
            "SELECT id, child_id, reason, message, payload, acknowledged,
                    latest_log_id, previous_log_id, created_at, updated_at
             FROM parent_alerts WHERE child_id = ? AND acknowledged = 0
             ORDER BY created_at DESC, id DESC LIMIT ?"
        };

        sqlx::query_as(sql)
            .bind(child_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await
    }

    pub async fn set_alert_acknowledged(
        &self,
        alert_id: i64,
        acknowledged: bool,
    ) -> sqlx::Result<Option<AlertRow>> {
        sqlx::query_as(&format!(
            "UPDATE parent_alerts SET acknowledged = ?, updated_at = {TOUCH} WHERE id = ?
             RETURNING id, child_id, reason, message, payload, acknowledged,
                       latest_log_id, previous_log_id, created_at, updated_at"
        ))
        .bind(acknowledged)
        .bind(alert_id)
        .fetch_optional(self.pool())
        .await
    }
}

// ---------- chat sessions & messages ----------

impl Store {
    pub async fn create_chat_session(&self, child_id: i64) -> sqlx::Result<ChatSessionRow> {
        sqlx::query_as(
            "INSERT INTO parent_chat_sessions (child_id) VALUES (?)
             RETURNING id, child_id, title, created_at, updated_at",
        )
        .bind(child_id)
        .fetch_one(self.pool())
        .await
    }

    pub async fn chat_session_for_child(
        &self,
        session_id: i64,
        child_id: i64,
    ) -> sqlx::Result<Option<ChatSessionRow>> {
        sqlx::query_as(
            "SELECT id, child_id, title, created_at, updated_at
             FROM parent_chat_sessions WHERE id = ? AND child_id = ?",
        )
        .bind(session_id)
        .bind(child_id)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn latest_chat_session(&self, child_id: i64) -> sqlx::Result<Option<ChatSessionRow>> {
        sqlx::query_as(
            "SELECT id, child_id, title, created_at, updated_at
             FROM parent_chat_sessions WHERE child_id = ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(child_id)
        .fetch_optional(self.pool())
        .await
    }

    /// The most recent `limit` messages of a session, returned oldest-first.
    pub async fn recent_chat_messages(
        &self,
        session_id: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<ChatMessageRow>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let mut rows: Vec<ChatMessageRow> = sqlx::query_as(
            "SELECT id, session_id, child_id, role, content, message_meta, created_at
             FROM parent_chat_messages WHERE session_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.reverse();
        Ok(rows)
    }

    pub async fn chat_messages_asc(
        &self,
        session_id: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<ChatMessageRow>> {
        sqlx::query_as(
            "SELECT id, session_id, child_id, role, content, message_meta, created_at
             FROM parent_chat_messages WHERE session_id = ?
             ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
    }

    /// Persist the question/answer pair atomically, question first.
    pub async fn append_chat_exchange(
        &self,
        session_id: i64,
        child_id: i64,
        question: &str,
        answer: &str,
        assistant_meta: &serde_json::Value,
    ) -> sqlx::Result<(i64, i64)> {
        let mut tx = self.pool().begin().await?;

        let question_id = sqlx::query(
            "INSERT INTO parent_chat_messages (session_id, child_id, role, content, message_meta)
             VALUES (?, ?, 'user', ?, '{}')",
        )
        .bind(session_id)
        .bind(child_id)
        .bind(question)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let answer_id = sqlx::query(
            "INSERT INTO parent_chat_messages (session_id, child_id, role, content, message_meta)
             VALUES (?, ?, 'assistant', ?, ?)",
        )
        .bind(session_id)
        .bind(child_id)
        .bind(answer)
        .bind(assistant_meta.to_string())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        Ok((question_id, answer_id))
    }

    pub async fn create_general_chat_session(
        &self,
        parent_id: i64,
    ) -> sqlx::Result<GeneralChatSessionRow> {
        sqlx::query_as(
            "INSERT INTO parent_general_chat_sessions (parent_id) VALUES (?)
             RETURNING id, parent_id, title, created_at, updated_at",
        )
        .bind(parent_id)
        .fetch_one(self.pool())
        .await
    }

    pub async fn general_session_for_parent(
        &self,
        session_id: i64,
        parent_id: i64,
    ) -> sqlx::Result<Option<GeneralChatSessionRow>> {
        sqlx::query_as(
            "SELECT id, parent_id, title, created_at, updated_at
             FROM parent_general_chat_sessions WHERE id = ? AND parent_id = ?",
        )
        .bind(session_id)
        .bind(parent_id)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn latest_general_chat_session(
        &self,
        parent_id: i64,
    ) -> sqlx::Result<Option<GeneralChatSessionRow>> {
        sqlx::query_as(
            "SELECT id, parent_id, title, created_at, updated_at
             FROM parent_general_chat_sessions WHERE parent_id = ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(parent_id)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn general_messages_asc(
        &self,
        session_id: i64,
        limit: i64,
    ) -> sqlx::Result<Vec<GeneralChatMessageRow>> {
        sqlx::query_as(
            "SELECT id, session_id, parent_id, role, content, message_meta, created_at
             FROM parent_general_chat_messages WHERE session_id = ?
             ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
    }

    pub async fn append_general_exchange(
        &self,
        session_id: i64,
        parent_id: i64,
        question: &str,
        answer: &str,
        assistant_meta: &serde_json::Value,
    ) -> sqlx::Result<(i64, i64)> {
        let mut tx = self.pool().begin().await?;

        let question_id = sqlx::query(
            "INSERT INTO parent_general_chat_messages (session_id, parent_id, role, content, message_meta)
             VALUES (?, ?, 'user', ?, '{}')",
        )
        .bind(session_id)
        .bind(parent_id)
        .bind(question)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let answer_id = sqlx::query(
            "INSERT INTO parent_general_chat_messages (session_id, parent_id, role, content, message_meta)
             VALUES (?, ?, 'assistant', ?, ?)",
        )
        .bind(session_id)
        .bind(parent_id)
        .bind(answer)
        .bind(assistant_meta.to_string())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        Ok((question_id, answer_id))
    }
}

// ---------- advice docs & dynamic queries ----------

impl Store {
    pub async fn advice_docs(&self, limit: i64) -> sqlx::Result<Vec<AdviceDocRow>> {
        sqlx::query_as(
            "SELECT id, category, title, advice FROM advice_docs ORDER BY id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
    }

    pub async fn count_advice_docs(&self) -> sqlx::Result<i64> {
        let row = sqlx::query("SELECT COUNT(id) AS n FROM advice_docs")
            .fetch_one(self.pool())
            .await?;
        Ok(row.get("n"))
    }

    /// Execute a vetted read-only statement, binding `:child_id` when the
    /// statement references it, and serialize the rows to JSON objects.
    pub async fn execute_select(
        &self,
        sql: &str,
        child_id: i64,
    ) -> sqlx::Result<Vec<serde_json::Value>> {
        let query = sqlx::query(sql);
        let rows = if sql.contains(":child_id") {
            query.bind(child_id).fetch_all(self.pool()).await?
        } else {
            query.fetch_all(self.pool()).await?
        };

        Ok(rows.iter().map(row_to_json).collect())
    }
}

/// Serialize one dynamic row. Integers stay integers, REAL/NUMERIC become
/// floats, and everything else (including the ISO-8601 timestamp text) passes
/// through as strings.
fn row_to_json(row: &SqliteRow) -> serde_json::Value {
    let mut map = serde_json::Map::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let value = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => serde_json::Value::Null,
            Ok(raw) => {
                let type_name = raw.type_info().name().to_uppercase();
                decode_column(row, idx, &type_name)
            }
            Err(_) => serde_json::Value::Null,
        };
        map.insert(column.name().to_string(), value);
    }

    serde_json::Value::Object(map)
}

fn decode_column(row: &SqliteRow, idx: usize, type_name: &str) -> serde_json::Value {
    if type_name.contains("INT") {
        if let Ok(value) = row.try_get::<i64, _>(idx) {
            return serde_json::Value::from(value);
        }
    }
    if type_name.contains("REAL")
        || type_name.contains("NUMERIC")
        || type_name.contains("FLOA")
        || type_name.contains("DOUB")
    {
        if let Ok(value) = row.try_get::<f64, _>(idx) {
            return serde_json::Value::from(value);
        }
    }
    if type_name.contains("BOOL") {
        if let Ok(value) = row.try_get::<bool, _>(idx) {
            return serde_json::Value::from(value);
        }
    }
    if let Ok(value) = row.try_get::<String, _>(idx) {
        return serde_json::Value::from(value);
    }
    if let Ok(value) = row.try_get::<f64, _>(idx) {
        return serde_json::Value::from(value);
    }
    serde_json::Value::Null
}
