//! Child CRUD, profile, avatar, and log-ingestion endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::api::{auth, parse_i64};
use crate::database::Store;
use crate::database::models::{ChildRow, Traits, UserRow};
use crate::error::ApiError;
use crate::{AppState, alerts, guidance, stats};

const CHILD_NOT_FOUND: &str = "Child not found";

const DEFAULT_PARENT_EMAIL: &str = "demo-parent@example.com";
const DEFAULT_PARENT_PASSWORD: &str = "demo123";
const DEFAULT_PARENT_ROLE: &str = "parent";

/// Create the child router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/child/create", post(create_child))
        .route("/child", get(list_children))
        .route("/child/{child_id}", get(get_child).delete(delete_child))
        .route("/child/{child_id}/task-response", post(log_task_response))
        .route("/child/{child_id}/level-result", post(log_level_result))
        .route("/child/{child_id}/speech-button", post(log_speech_button))
        .route("/child/{child_id}/event", post(log_event))
        .route("/child/{child_id}/stats", get(child_stats))
        .route(
            "/child/{child_id}/profile",
            get(get_child_profile).put(update_child_profile),
        )
        .route(
            "/child/{child_id}/avatar",
            get(get_avatar).post(store_avatar),
        )
        .route("/child/{child_id}/avatar/create", post(store_avatar))
        .route("/child/{child_id}/profile/refresh", put(force_refresh_guidance))
}

// ---------- payload validation ----------

#[derive(Debug, Clone, Default, Deserialize)]
struct TraitsPayload {
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    hair: Option<String>,
    #[serde(default)]
    skin: Option<String>,
    #[serde(default)]
    glasses: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProfilePayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    age: Option<serde_json::Value>,
    #[serde(default)]
    disability: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    traits: Option<TraitsPayload>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    parent_id: Option<serde_json::Value>,
}

#[derive(Debug)]
struct NormalizedProfile {
    name: String,
    age: i64,
    disability: String,
    notes: String,
    traits: Traits,
}

/// Validate and normalize the trait bag: gender, hair, and skin are required.
fn normalize_traits(payload: Option<&TraitsPayload>) -> Result<Traits, ApiError> {
    let payload = payload.cloned().unwrap_or_default();
    let traits = Traits {
        gender: payload.gender.clone().filter(|v| !v.trim().is_empty()),
        hair: payload.hair.clone().filter(|v| !v.trim().is_empty()),
        skin: payload.skin.clone().filter(|v| !v.trim().is_empty()),
        glasses: payload
            .glasses
            .as_ref()
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
    };

    let mut missing = Vec::new();
    if traits.gender.is_none() {
        missing.push("gender");
    }
    if traits.hair.is_none() {
        missing.push("hair");
    }
    if traits.skin.is_none() {
        missing.push("skin");
    }
    if !missing.is_empty() {
        return Err(ApiError::validation(format!(
            "Missing trait fields: {}",
            missing.join(", ")
        )));
    }

    Ok(traits)
}

fn build_profile(payload: &ProfilePayload) -> Result<NormalizedProfile, ApiError> {
    let mut missing = Vec::new();
    let name = payload.name.as_deref().map(str::trim).unwrap_or("");
    if name.is_empty() {
        missing.push("name");
    }
    if payload.age.is_none() {
        missing.push("age");
    }
    let disability = payload.disability.as_deref().map(str::trim).unwrap_or("");
    if disability.is_empty() {
        missing.push("disability");
    }
    if !missing.is_empty() {
        return Err(ApiError::validation(format!(
            "Missing profile fields: {}",
            missing.join(", ")
        )));
    }

    let age = payload
        .age
        .as_ref()
        .and_then(parse_i64)
        .ok_or_else(|| ApiError::validation("Age must be a whole number"))?;

    let traits = normalize_traits(payload.traits.as_ref())?;

    Ok(NormalizedProfile {
        name: name.to_string(),
        age,
        disability: disability.to_string(),
        notes: payload.notes.clone().unwrap_or_default(),
        traits,
    })
}

// ---------- shared helpers ----------

async fn require_child(store: &Store, child_id: i64) -> Result<ChildRow, ApiError> {
    store
        .child_by_id(child_id)
        .await?
        .ok_or_else(|| ApiError::not_found(CHILD_NOT_FOUND))
}

/// Resolve the requested parent, falling back to the demo parent which is
/// created on demand.
async fn resolve_parent(
    store: &Store,
    parent_id: Option<&serde_json::Value>,
) -> Result<UserRow, ApiError> {
    if let Some(parent_id) = parent_id.and_then(parse_i64) {
        if let Some(parent) = store.user_by_id(parent_id).await? {
            return Ok(parent);
        }
    }

    if let Some(parent) = store.user_by_email(DEFAULT_PARENT_EMAIL).await? {
        return Ok(parent);
    }

    let password_hash = auth::hash_password(DEFAULT_PARENT_PASSWORD)?;
    Ok(store
        .create_user(DEFAULT_PARENT_EMAIL, &password_hash, DEFAULT_PARENT_ROLE)
        .await?)
}

/// Full child payload with profile and avatar, matching the read endpoints.
async fn child_payload(store: &Store, child: &ChildRow) -> Result<serde_json::Value, ApiError> {
    let profile = store.profile_for_child(child.id).await?;
    let avatar = store.avatar_for_child(child.id).await?;

    let mut payload = serde_json::to_value(child).unwrap_or_default();
    payload["profile"] = profile
        .as_ref()
        .map(|profile| profile_view(child, profile))
        .unwrap_or(serde_json::Value::Null);
    payload["has_avatar"] = json!(avatar.is_some());
    payload["avatar"] = avatar
        .map(|avatar| serde_json::to_value(&avatar).unwrap_or_default())
        .unwrap_or(serde_json::Value::Null);

    Ok(payload)
}

fn profile_view(child: &ChildRow, profile: &crate::database::models::ProfileRow) -> serde_json::Value {
    json!({
        "name": child.name,
        "age": child.age,
        "disability": child.disability,
        "notes": profile.notes,
        "guidance": profile.guidance,
        "traits": profile.traits,
    })
}

// ---------- handlers ----------

async fn create_child(
    State(state): State<AppState>,
    Json(payload): Json<ProfilePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = build_profile(&payload)?;
    let parent = resolve_parent(&state.store, payload.parent_id.as_ref()).await?;
    let level = payload
        .level
        .as_deref()
        .map(str::trim)
        .filter(|level| !level.is_empty())
        .unwrap_or("beginner");

    let child = state
        .store
        .create_child(
            parent.id,
            &profile.name,
            profile.age,
            Some(&profile.disability),
            level,
        )
        .await?;
    state
        .store
        .upsert_profile(child.id, &profile.notes, &profile.traits)
        .await?;

    guidance::refresh_guidance_safely(&state.store, &state.generator, &child).await;

    let payload = child_payload(&state.store, &child).await?;
    Ok(Json(json!({ "message": "Child created", "child": payload })))
}

#[derive(Debug, Deserialize)]
struct ListChildrenParams {
    #[serde(default)]
    parent_id: Option<i64>,
}

async fn list_children(
    State(state): State<AppState>,
    Query(params): Query<ListChildrenParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let children = state.store.list_children(params.parent_id).await?;

    let mut payloads = Vec::with_capacity(children.len());
    for child in &children {
        payloads.push(child_payload(&state.store, child).await?);
    }

    Ok(Json(json!({ "children": payloads })))
}

async fn get_child(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let child = require_child(&state.store, child_id).await?;
    Ok(Json(child_payload(&state.store, &child).await?))
}

async fn delete_child(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_child(&state.store, child_id).await?;
    state.store.delete_child(child_id).await?;
    Ok(Json(json!({ "message": "Child deleted", "child_id": child_id })))
}

#[derive(Debug, Deserialize)]
struct TaskResponsePayload {
    #[serde(default)]
    task_name: Option<String>,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    stress_level: Option<serde_json::Value>,
}

/// Ingest a task emotion sample and run the distress evaluator on the
/// updated history.
async fn log_task_response(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Json(payload): Json<TaskResponsePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task_name = payload.task_name.as_deref().map(str::trim).unwrap_or("");
    let emotion = payload.emotion.as_deref().map(str::trim).unwrap_or("");
    if task_name.is_empty() || emotion.is_empty() || payload.stress_level.is_none() {
        return Err(ApiError::validation(
            "task_name, stress_level, and emotion are required",
        ));
    }

    let stress_level = payload
        .stress_level
        .as_ref()
        .and_then(parse_i64)
        .ok_or_else(|| {
            ApiError::validation("stress_level must be a number between 1 and 5")
        })?;
    if !(1..=5).contains(&stress_level) {
        return Err(ApiError::validation("stress_level must be between 1 and 5"));
    }

    let child = require_child(&state.store, child_id).await?;
    let log = state
        .store
        .insert_task_log(child_id, task_name, stress_level, emotion)
        .await?;

    let alert =
        alerts::evaluate_distress(&state.store, &state.corpus, &state.generator, &child).await?;

    let mut response = json!({ "message": "Task response saved", "log_id": log.id });
    if let Some(alert) = alert {
        response["parent_alert"] = serde_json::to_value(&alert).unwrap_or_default();
    }

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct LevelResultPayload {
    #[serde(default)]
    level: Option<serde_json::Value>,
    #[serde(default)]
    expected_answer: Option<String>,
    #[serde(default)]
    child_answer: Option<String>,
}

async fn log_level_result(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Json(payload): Json<LevelResultPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let expected = payload.expected_answer.as_deref().map(str::trim).unwrap_or("");
    let answer = payload.child_answer.as_deref().map(str::trim).unwrap_or("");
    if payload.level.is_none() || expected.is_empty() || answer.is_empty() {
        return Err(ApiError::validation(
            "level, expected_answer, and child_answer are required",
        ));
    }

    let level = payload
        .level
        .as_ref()
        .and_then(parse_i64)
        .ok_or_else(|| ApiError::validation("level must be a whole number"))?;

    require_child(&state.store, child_id).await?;
    let log_id = state
        .store
        .insert_level_result(child_id, level, expected, answer)
        .await?;

    Ok(Json(json!({ "message": "Level result saved", "log_id": log_id })))
}

#[derive(Debug, Deserialize)]
struct SpeechButtonPayload {
    #[serde(default)]
    button_key: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    increment: Option<serde_json::Value>,
}

async fn log_speech_button(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Json(payload): Json<SpeechButtonPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let label = payload.label.as_deref().map(str::trim).unwrap_or("");
    let category = payload.category.as_deref().map(str::trim).unwrap_or("");

    let normalized_key = payload
        .button_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .unwrap_or(label)
        .to_lowercase();
    if normalized_key.is_empty() {
        return Err(ApiError::validation("button_key or label is required"));
    }

    let increment = match payload.increment.as_ref() {
        None => 1,
        Some(value) => parse_i64(value)
            .filter(|n| *n >= 1)
            .ok_or_else(|| ApiError::validation("increment must be a positive integer"))?,
    };

    require_child(&state.store, child_id).await?;

    let usage = state
        .store
        .increment_speech_button(
            child_id,
            &normalized_key,
            Some(if label.is_empty() { &normalized_key } else { label }),
            if category.is_empty() { None } else { Some(category) },
            increment,
        )
        .await?;

    Ok(Json(json!({
        "message": "Speech button usage recorded",
        "button_key": usage.button_key,
        "press_count": usage.press_count,
    })))
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

async fn log_event(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Json(payload): Json<EventPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let event_type = payload.event_type.as_deref().map(str::trim).unwrap_or("");
    if event_type.is_empty() {
        return Err(ApiError::validation("event_type is required"));
    }

    require_child(&state.store, child_id).await?;
    state
        .store
        .insert_event(
            child_id,
            event_type,
            payload.payload.as_ref().unwrap_or(&json!({})),
        )
        .await?;

    Ok(Json(json!({ "message": "Event logged" })))
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    #[serde(default)]
    days: Option<String>,
}

async fn child_stats(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Query(params): Query<StatsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let days = params
        .days
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(7);

    let stats = stats::calculate_child_stats(&state.store, child_id, days)
        .await?
        .ok_or_else(|| ApiError::not_found(CHILD_NOT_FOUND))?;

    Ok(Json(serde_json::to_value(&stats).unwrap_or_default()))
}

/// Fetch the profile, lazily regenerating an empty guidance snapshot.
async fn get_child_profile(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let child = require_child(&state.store, child_id).await?;
    let Some(profile) = state.store.profile_for_child(child_id).await? else {
        return Err(ApiError::not_found("Child profile not found"));
    };

    let profile = if profile
        .guidance
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        guidance::refresh_guidance_safely(&state.store, &state.generator, &child).await;
        state
            .store
            .profile_for_child(child_id)
            .await?
            .unwrap_or(profile)
    } else {
        profile
    };

    Ok(Json(json!({
        "child_id": child.id,
        "parent_id": child.parent_id,
        "level": child.level,
        "name": child.name,
        "age": child.age,
        "disability": child.disability,
        "profile": profile_view(&child, &profile),
    })))
}

async fn update_child_profile(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Json(payload): Json<ProfilePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = build_profile(&payload)?;
    require_child(&state.store, child_id).await?;

    state
        .store
        .update_child_identity(child_id, &profile.name, profile.age, Some(&profile.disability))
        .await?;
    state
        .store
        .upsert_profile(child_id, &profile.notes, &profile.traits)
        .await?;

    let child = require_child(&state.store, child_id).await?;
    guidance::refresh_guidance_safely(&state.store, &state.generator, &child).await;

    let stored = state
        .store
        .profile_for_child(child_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Child profile not found"))?;

    Ok(Json(json!({
        "message": "Profile updated",
        "child_id": child_id,
        "profile": profile_view(&child, &stored),
    })))
}

/// Force a guidance regeneration regardless of the cached snapshot.
async fn force_refresh_guidance(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let child = require_child(&state.store, child_id).await?;
    let guidance =
        guidance::refresh_profile_guidance(&state.store, &state.generator, &child, true)
            .await
            .map_err(ApiError::Internal)?
            .ok_or_else(|| ApiError::not_found("Child profile not found"))?;

    Ok(Json(json!({ "child_id": child_id, "guidance": guidance })))
}

#[derive(Debug, Deserialize)]
struct AvatarPayload {
    #[serde(default)]
    base_avatar: Option<String>,
    #[serde(default)]
    emotions: Option<serde_json::Value>,
}

/// Store caller-provided avatar image references (upsert).
async fn store_avatar(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
    Json(payload): Json<AvatarPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let base_avatar = payload.base_avatar.as_deref().map(str::trim).unwrap_or("");
    if base_avatar.is_empty() {
        return Err(ApiError::validation("base_avatar is required"));
    }

    require_child(&state.store, child_id).await?;
    let avatar = state
        .store
        .upsert_avatar(
            child_id,
            base_avatar,
            payload.emotions.as_ref().unwrap_or(&json!({})),
        )
        .await?;

    Ok(Json(json!({
        "message": "Avatar saved",
        "data": serde_json::to_value(&avatar).unwrap_or_default(),
    })))
}

async fn get_avatar(
    State(state): State<AppState>,
    Path(child_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_child(&state.store, child_id).await?;
    let avatar = state
        .store
        .avatar_for_child(child_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Avatar not generated"))?;

    Ok(Json(serde_json::to_value(&avatar).unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(raw: serde_json::Value) -> ProfilePayload {
        serde_json::from_value(raw).expect("payload")
    }

    #[test]
    fn test_build_profile_reports_missing_fields() {
        let err = build_profile(&payload(json!({ "age": 6 }))).expect_err("missing");
        let ApiError::Validation(message) = err else {
            panic!("expected validation error");
        };
        assert!(message.contains("name"));
        assert!(message.contains("disability"));
    }

    #[test]
    fn test_build_profile_requires_trait_fields() {
        let err = build_profile(&payload(json!({
            "name": "Mira",
            "age": 6,
            "disability": "autism",
            "traits": { "gender": "girl" },
        })))
        .expect_err("missing traits");
        let ApiError::Validation(message) = err else {
            panic!("expected validation error");
        };
        assert!(message.contains("hair"));
        assert!(message.contains("skin"));
    }

    #[test]
    fn test_build_profile_rejects_non_numeric_age() {
        let err = build_profile(&payload(json!({
            "name": "Mira",
            "age": "six",
            "disability": "autism",
            "traits": { "gender": "girl", "hair": "curly", "skin": "light" },
        })))
        .expect_err("bad age");
        assert!(matches!(err, ApiError::Validation(ref m) if m == "Age must be a whole number"));
    }

    #[test]
    fn test_build_profile_accepts_numeric_string_age() {
        let profile = build_profile(&payload(json!({
            "name": " Mira ",
            "age": "6",
            "disability": "autism",
            "traits": { "gender": "girl", "hair": "curly", "skin": "light", "glasses": true },
        })))
        .expect("profile");
        assert_eq!(profile.name, "Mira");
        assert_eq!(profile.age, 6);
        assert!(profile.traits.glasses);
    }
}
