//! Windowed activity statistics for a child.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::database::Store;

/// Aggregated activity counters over the requested day window.
#[derive(Debug, Serialize)]
pub struct ChildStats {
    pub emotion_counts: HashMap<String, i64>,
    pub total_sessions: i64,
    pub total_time_seconds: i64,
    pub events_count: i64,
}

/// ISO-8601 cutoff string matching the stored timestamp format.
pub fn window_cutoff(days: i64) -> String {
    (Utc::now() - Duration::days(days))
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Aggregate emotion selections and finished sessions from the event log.
/// Returns `None` for an unknown child.
pub async fn calculate_child_stats(
    store: &Store,
    child_id: i64,
    days: i64,
) -> sqlx::Result<Option<ChildStats>> {
    if store.child_by_id(child_id).await?.is_none() {
        return Ok(None);
    }

    let cutoff = window_cutoff(days.max(0));
    let events = store.events_since(child_id, &cutoff).await?;

    let mut emotion_counts: HashMap<String, i64> = HashMap::new();
    let mut total_sessions = 0_i64;
    let mut total_time_seconds = 0_i64;

    for event in &events {
        match event.event_type.as_str() {
            "emotion_selected" => {
                if let Some(emotion) = event.payload.get("emotion").and_then(|v| v.as_str()) {
                    *emotion_counts.entry(emotion.to_string()).or_insert(0) += 1;
                }
            }
            "session_finished" => {
                total_sessions += 1;
                total_time_seconds += event
                    .payload
                    .get("duration")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0);
            }
            _ => {}
        }
    }

    Ok(Some(ChildStats {
        emotion_counts,
        total_sessions,
        total_time_seconds,
        events_count: events.len() as i64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_stats_aggregate_window() {
        let store = Store::in_memory().await.expect("store");
        let parent = store
            .create_user("p@example.com", "hash", "parent")
            .await
            .expect("parent");
        let child = store
            .create_child(parent.id, "Mira", 6, None, "beginner")
            .await
            .expect("child");

        store
            .insert_event(child.id, "emotion_selected", &json!({"emotion": "happy"}))
            .await
            .expect("event");
        store
            .insert_event(child.id, "emotion_selected", &json!({"emotion": "happy"}))
            .await
            .expect("event");
        store
            .insert_event(child.id, "session_finished", &json!({"duration": 90}))
            .await
            .expect("event");
        store
            .insert_event(child.id, "other", &json!({}))
            .await
            .expect("event");

        let stats = calculate_child_stats(&store, child.id, 7)
            .await
            .expect("stats")
            .expect("child exists");

        assert_eq!(stats.emotion_counts.get("happy"), Some(&2));
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_time_seconds, 90);
        assert_eq!(stats.events_count, 4);
    }

    #[tokio::test]
    async fn test_stats_unknown_child_is_none() {
        let store = Store::in_memory().await.expect("store");
        let stats = calculate_child_stats(&store, 999, 7).await.expect("stats");
        assert!(stats.is_none());
    }
}
