//! Daily task template suggestions.
//!
//! Recommends short regulation-focused tasks for a child based on recent
//! emotion/stress samples. The generator produces strict-JSON templates; on
//! any failure the heuristic fallback replays activities that went well,
//! topped up from a fixed default library.

use chrono::DateTime;
use serde::Serialize;
use serde_json::json;

use crate::database::models::{ChildRow, TaskEmotionLogRow};
use crate::llm::{CompletionRequest, GenerationCapability, Message};

const POSITIVE_EMOTIONS: [&str; 6] = ["happy", "very_happy", "joy", "excited", "calm", "proud"];
const PROMPT_LOG_LIMIT: usize = 50;

/// One recommended task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskTemplate {
    pub title: String,
    pub description: String,
    pub scheduled_time: String,
    pub focus: String,
}

fn default_library() -> Vec<TaskTemplate> {
    vec![
        TaskTemplate {
            title: "Balloon breathing break".to_string(),
            description: "2 minute guided breathing with arms drifting up like a balloon."
                .to_string(),
            scheduled_time: "08:30".to_string(),
            focus: "Regulation".to_string(),
        },
        TaskTemplate {
            title: "Emotion mirror game".to_string(),
            description: "Stand in front of a mirror and copy 3 joyful faces together."
                .to_string(),
            scheduled_time: "10:00".to_string(),
            focus: "Awareness".to_string(),
        },
        TaskTemplate {
            title: "Sensory bag check-in".to_string(),
            description: "Let the child pick a calming object and describe how it feels."
                .to_string(),
            scheduled_time: "12:30".to_string(),
            focus: "Sensory".to_string(),
        },
        TaskTemplate {
            title: "Stretch + wiggle reset".to_string(),
            description: "90 second stretch with silly wiggles to reset energy.".to_string(),
            scheduled_time: "15:00".to_string(),
            focus: "Movement".to_string(),
        },
        TaskTemplate {
            title: "Gratitude sticker moment".to_string(),
            description: "Name one win from today and place a sticker on the board.".to_string(),
            scheduled_time: "19:15".to_string(),
            focus: "Reflection".to_string(),
        },
    ]
}

/// Return up to `limit` recommended tasks for the given child.
pub async fn generate_child_task_templates(
    generator: &GenerationCapability,
    child: &ChildRow,
    logs: &[TaskEmotionLogRow],
    limit: usize,
) -> Vec<TaskTemplate> {
    let limit = limit.clamp(1, 10);
    let prompt = compose_prompt(child, logs, limit);

    let request = CompletionRequest::new(vec![
        Message::system(
            "You return concise parent coaching tasks as strict JSON with a top-level `tasks` \
             array. Each task must include title, description, scheduled_time, and focus.",
        ),
        Message::user(prompt),
    ])
    .with_temperature(0.2)
    .with_max_tokens(700)
    .with_json_object();

    if let Some(raw) = generator.try_complete(request).await {
        if let Some(templates) = parse_templates(&raw, limit) {
            return templates;
        }
    }

    tracing::info!(child_id = child.id, "Falling back to heuristic task templates");
    fallback_templates(logs, limit)
}

fn compose_prompt(child: &ChildRow, logs: &[TaskEmotionLogRow], limit: usize) -> String {
    let summarized: Vec<serde_json::Value> = logs
        .iter()
        .take(PROMPT_LOG_LIMIT)
        .map(|log| {
            json!({
                "task_name": if log.task_name.trim().is_empty() { "Unnamed task" } else { log.task_name.trim() },
                "emotion": log.emotion.trim().to_lowercase(),
                "stress_level": log.stress_level,
                "recorded_at": log.created_at,
            })
        })
        .collect();
    let logs_json =
        serde_json::to_string_pretty(&summarized).unwrap_or_else(|_| "[]".to_string());

    format!(
        "You are an occupational therapist crafting playful, regulation-focused tasks.\n\
         Child summary: name={name}, age={age}, focus={focus}.\n\
         Below is JSON feedback history describing tasks the child completed, the emotion \
         reported, and stress level (1=very calm, 5=very stressed).\n\
         Prefer activities where the child felt positive emotions (happy, calm, proud, joyful, \
         excited) or had stress_level <= 2.\n\
         Recommend exactly {limit} short tasks similar to those wins, but with small twists so \
         the routine feels fresh.\n\
         Return ONLY valid JSON: an object with a `tasks` array, each task containing `title`, \
         `description`, `scheduled_time` (HH:MM, 24h), and `focus` (one or two words).\n\
         Use encouraging, concrete descriptions under 140 characters.\n\
         Feedback logs JSON:\n{logs_json}",
        name = child.name,
        age = child.age,
        focus = child.disability.as_deref().unwrap_or("emotional regulation"),
    )
}

fn parse_templates(raw: &str, limit: usize) -> Option<Vec<TaskTemplate>> {
    let payload: serde_json::Value = serde_json::from_str(raw).ok()?;
    let entries = match &payload {
        serde_json::Value::Object(map) => map.get("tasks")?.as_array()?.as_slice(),
        serde_json::Value::Array(entries) => entries.as_slice(),
        _ => return None,
    };

    let normalized: Vec<TaskTemplate> = entries
        .iter()
        .take(limit)
        .filter_map(normalize_template)
        .collect();

    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn normalize_template(item: &serde_json::Value) -> Option<TaskTemplate> {
    let item = item.as_object()?;

    let field = |key: &str, default: &str| -> String {
        let value = item
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if value.is_empty() {
            default.to_string()
        } else {
            value
        }
    };

    let scheduled = field("scheduled_time", "09:00");
    Some(TaskTemplate {
        title: field("title", "Calm breathing moment"),
        description: field(
            "description",
            "Practice 3 deep breaths with gentle stretching.",
        ),
        scheduled_time: if is_valid_time(&scheduled) {
            scheduled
        } else {
            "09:00".to_string()
        },
        focus: field("focus", "Regulation"),
    })
}

fn is_valid_time(value: &str) -> bool {
    let Some((hours, minutes)) = value.split_once(':') else {
        return false;
    };
    let valid_hours = hours.len() == 2 && hours.parse::<u32>().is_ok_and(|h| h < 24);
    let valid_minutes = minutes.len() == 2 && minutes.parse::<u32>().is_ok_and(|m| m < 60);
    valid_hours && valid_minutes
}

/// Heuristic fallback: replay positive activities, then fill from the
/// default library.
fn fallback_templates(logs: &[TaskEmotionLogRow], limit: usize) -> Vec<TaskTemplate> {
    let mut templates: Vec<TaskTemplate> = Vec::new();

    for log in logs.iter().filter(|log| is_positive_log(log)) {
        let title = if log.task_name.is_empty() {
            "Repeat calming win".to_string()
        } else {
            format!("Replay {}", log.task_name)
        };
        let description = if log.task_name.is_empty() {
            "Repeat the upbeat routine that kept them relaxed.".to_string()
        } else {
            format!(
                "Repeat {} with the same cues that sparked {}.",
                log.task_name, log.emotion
            )
        };

        templates.push(TaskTemplate {
            title,
            description,
            scheduled_time: approximate_time_from_log(log),
            focus: "Joy practice".to_string(),
        });

        if templates.len() >= limit {
            break;
        }
    }

    if templates.len() < limit {
        let needed = limit - templates.len();
        templates.extend(default_library().into_iter().take(needed));
    }

    templates.truncate(limit);
    templates
}

fn is_positive_log(log: &TaskEmotionLogRow) -> bool {
    let emotion = log.emotion.trim().to_lowercase();
    POSITIVE_EMOTIONS.contains(&emotion.as_str()) || log.stress_level <= 2
}

fn approximate_time_from_log(log: &TaskEmotionLogRow) -> String {
    DateTime::parse_from_rfc3339(&log.created_at)
        .map(|timestamp| timestamp.format("%H:%M").to_string())
        .unwrap_or_else(|_| "09:00".to_string())
}
