//! Distress-alert evaluation and deduplication.
//!
//! After each new task emotion sample the evaluator inspects the two most
//! recent samples that no prior alert has consumed. When both are
//! high-distress it raises exactly one alert per `(latest, previous)` log-id
//! pair; re-evaluating the same pair returns the existing alert. The alert
//! message is composed by the generator from scored reference-corpus
//! excerpts, with a deterministic template when the generator is unavailable.

use serde_json::json;

use crate::corpus::{ReferenceCorpus, ReferenceDoc};
use crate::database::models::{AlertRow, ChildRow, ProfileRow, TaskEmotionLogRow};
use crate::database::Store;
use crate::llm::{CompletionRequest, GenerationCapability, Message};

const STRESS_LEVEL_THRESHOLD: i64 = 4;
const NEGATIVE_EMOTIONS: [&str; 2] = ["sad", "very_stressed"];
const ALERT_REASON: &str = "high_distress_sequence";
const MAX_SUPPORTING_DOCS: usize = 3;
const DOC_EXCERPT_LIMIT: usize = 600;

/// Check the two most recent unconsumed samples and create an alert when
/// both are high distress. Returns the existing alert when the pair was
/// already consumed.
pub async fn evaluate_distress(
    store: &Store,
    corpus: &ReferenceCorpus,
    generator: &GenerationCapability,
    child: &ChildRow,
) -> sqlx::Result<Option<AlertRow>> {
    let cutoff = store.alert_cutoff_log_id(child.id).await?;
    let recent = store.unconsumed_task_logs(child.id, cutoff).await?;

    if recent.len() < 2 {
        return Ok(None);
    }

    let latest = &recent[0];
    let previous = &recent[1];
    if !is_high_distress(latest) || !is_high_distress(previous) {
        return Ok(None);
    }

    if let Some(existing) = store.alert_by_pair(child.id, latest.id, previous.id).await? {
        return Ok(Some(existing));
    }

    let profile = store.profile_for_child(child.id).await?;
    let docs = select_reference_docs(corpus, child.age, &recent);
    let message = build_alert_message(generator, child, profile.as_ref(), &recent, &docs).await;

    let payload = json!({
        "tasks": recent.iter().rev().map(serialize_log).collect::<Vec<_>>(),
        "documents": docs.iter().map(|doc| summarize_doc(doc)).collect::<Vec<_>>(),
    });

    match store
        .insert_alert(child.id, ALERT_REASON, &message, &payload, latest.id, previous.id)
        .await
    {
        Ok(alert) => Ok(Some(alert)),
        // A concurrent evaluation won the unique index; return its row.
        Err(err) if is_unique_violation(&err) => {
            store.alert_by_pair(child.id, latest.id, previous.id).await
        }
        Err(err) => Err(err),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}

/// A sample is high-distress when the stress level reaches the threshold or
/// the emotion label is in the negative set.
pub fn is_high_distress(log: &TaskEmotionLogRow) -> bool {
    let emotion = log.emotion.trim().to_lowercase();
    log.stress_level >= STRESS_LEVEL_THRESHOLD || NEGATIVE_EMOTIONS.contains(&emotion.as_str())
}

/// Score the reference corpus against the child and the triggering samples,
/// keeping the top documents. The ranking is deterministic: stable descending
/// sort, ties broken by corpus order.
pub fn select_reference_docs<'a>(
    corpus: &'a ReferenceCorpus,
    child_age: i64,
    logs: &[TaskEmotionLogRow],
) -> Vec<&'a ReferenceDoc> {
    let keywords = keywords_from_logs(logs);
    let mut scored: Vec<(f64, &ReferenceDoc)> = Vec::new();

    for doc in corpus.reference_docs() {
        let mut score = 0.0;

        if doc
            .topics
            .iter()
            .any(|t| t == "emotional_regulation" || t == "behavior_support")
        {
            score += 2.0;
        }
        if doc.topics.iter().any(|t| t == "family_support") {
            score += 0.5;
        }
        if doc
            .skills_targeted
            .iter()
            .any(|s| s == "emotional_regulation" || s == "behavior")
        {
            score += 1.0;
        }
        if doc.emotion.as_deref().is_some_and(|e| {
            matches!(
                e.to_lowercase().as_str(),
                "sad" | "overwhelmed" | "general_wellbeing" | "anxious"
            )
        }) {
            score += 1.0;
        }
        if doc.support_context.as_deref().is_some_and(|c| {
            matches!(c, "home_routine" | "general_guidance" | "therapy" | "community")
        }) {
            score += 0.5;
        }
        if doc.age_matches(child_age) {
            score += 1.0;
        }

        let recommendation = doc.recommendation.to_lowercase();
        if keywords.iter().any(|keyword| recommendation.contains(keyword)) {
            score += 0.5;
        }

        if score > 0.0 {
            scored.push((score, doc));
        }
    }

    // Stable sort keeps corpus order on score ties.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(MAX_SUPPORTING_DOCS)
        .map(|(_, doc)| doc)
        .collect()
}

/// Keywords matched against document recommendations.
fn keywords_from_logs(logs: &[TaskEmotionLogRow]) -> Vec<&'static str> {
    let mut keywords = vec!["stress", "emotion", "task"];
    if logs.iter().any(|log| {
        NEGATIVE_EMOTIONS.contains(&log.emotion.trim().to_lowercase().as_str())
    }) {
        keywords.push("support");
    }
    keywords
}

async fn build_alert_message(
    generator: &GenerationCapability,
    child: &ChildRow,
    profile: Option<&ProfileRow>,
    logs: &[TaskEmotionLogRow],
    docs: &[&ReferenceDoc],
) -> String {
    let child_profile = format_child_profile(child, profile);
    let tasks_summary = format_task_summary(logs);
    let doc_context = format_doc_snippets(docs);

    let prompt = format!(
        "You are an autism specialist supporting a parent. Using the knowledge base excerpts, \
         craft a short alert (2-3 sentences) that:\n\
         - Mentions the child's name ({name}) and highlights the repeated high-stress responses.\n\
         - Offers one concrete, empathetic action the parent can take today.\n\
         - References the documents implicitly (no citations) and keeps the tone calm and supportive.\n\n\
         And don't use greeting words like Hi! Hello! etc.\n\
         Child profile:\n{child_profile}\n\n\
         Recent task feedback:\n{tasks_summary}\n\n\
         Knowledge base excerpts:\n{doc_context}",
        name = child.name,
        doc_context = if doc_context.is_empty() {
            "No documents available.".to_string()
        } else {
            doc_context
        },
    );

    let request = CompletionRequest::new(vec![
        Message::system("You are a compassionate autism support coach."),
        Message::user(prompt),
    ])
    .with_temperature(0.4)
    .with_max_tokens(220);

    if let Some(message) = generator.try_complete(request).await {
        return message;
    }

    fallback_message(child, logs, docs)
}

/// Deterministic alert message used when the generator is unavailable.
fn fallback_message(child: &ChildRow, logs: &[TaskEmotionLogRow], docs: &[&ReferenceDoc]) -> String {
    let task_titles = logs
        .iter()
        .map(|log| log.task_name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let doc_hint = docs
        .first()
        .map_or("your support plan", |doc| doc.source.as_str());

    format!(
        "We noticed that {} showed high stress during {}. Take a calming break together, \
         keep language simple, and lean on ideas from {} to reset before the next activity.",
        child.name, task_titles, doc_hint
    )
}

fn format_child_profile(child: &ChildRow, profile: Option<&ProfileRow>) -> String {
    let mut parts = vec![format!("Name: {}", child.name), format!("Age: {}", child.age)];
    if let Some(disability) = child.disability.as_deref() {
        if !disability.is_empty() {
            parts.push(format!("Diagnosis focus: {disability}"));
        }
    }
    if !child.level.is_empty() {
        parts.push(format!("Learning level: {}", child.level));
    }
    if let Some(notes) = profile.and_then(|p| p.notes.as_deref()) {
        if !notes.is_empty() {
            parts.push(format!("Goals/notes: {notes}"));
        }
    }
    parts.join(" | ")
}

fn format_task_summary(logs: &[TaskEmotionLogRow]) -> String {
    logs.iter()
        .map(|log| {
            format!(
                "Task '{}': emotion {}, stress {}/5 at {}",
                log.task_name,
                emotion_label(&log.emotion),
                log.stress_level,
                log.created_at,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reader-friendly emotion labels.
fn emotion_label(emotion: &str) -> &str {
    match emotion {
        "very_happy" => "very happy",
        "happy" => "happy",
        "neutral" => "okay",
        "sad" => "sad",
        "very_stressed" => "very stressed",
        other => other,
    }
}

fn format_doc_snippets(docs: &[&ReferenceDoc]) -> String {
    docs.iter()
        .enumerate()
        .map(|(idx, doc)| {
            let recommendation = sanitize_text(&doc.recommendation);
            let truncated = if recommendation.len() > DOC_EXCERPT_LIMIT {
                let mut end = DOC_EXCERPT_LIMIT;
                while !recommendation.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &recommendation[..end])
            } else {
                recommendation
            };
            format!(
                "Document {}: {} (pages {})\nTopics: {}\nAdvice: {}",
                idx + 1,
                doc.source,
                doc.pages.as_deref().unwrap_or("n/a"),
                doc.topics.join(", "),
                truncated,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn serialize_log(log: &TaskEmotionLogRow) -> serde_json::Value {
    json!({
        "task_name": log.task_name,
        "emotion": log.emotion,
        "stress_level": log.stress_level,
        "logged_at": log.created_at,
    })
}

fn summarize_doc(doc: &ReferenceDoc) -> serde_json::Value {
    json!({
        "source": doc.source,
        "pages": doc.pages,
        "topics": doc.topics,
        "support_context": doc.support_context,
    })
}

fn sanitize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
