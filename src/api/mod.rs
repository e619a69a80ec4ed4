//! HTTP API endpoints.
//!
//! Each area exposes a `router()` merged by the server:
//!
//! - [`health`]: liveness and readiness probes
//! - [`auth`]: registration and login
//! - [`children`]: child CRUD, profile, avatar, and log ingestion
//! - [`parents`]: alerts, summaries, aggregations, and chat

pub mod auth;
pub mod children;
pub mod health;
pub mod parents;

use axum::Router;

use crate::AppState;

/// Assemble the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(children::router())
        .merge(parents::router())
}

/// Parse a tolerant integer field: JSON numbers and numeric strings both
/// count, anything else is `None`.
pub(crate) fn parse_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_i64_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_i64(&json!(7)), Some(7));
        assert_eq!(parse_i64(&json!("7")), Some(7));
        assert_eq!(parse_i64(&json!(" 7 ")), Some(7));
        assert_eq!(parse_i64(&json!("seven")), None);
        assert_eq!(parse_i64(&json!(null)), None);
        assert_eq!(parse_i64(&json!(3.5)), None);
    }
}
