//! Retrieval-augmented answering for general caregiver questions.
//!
//! The question is embedded, the nearest document chunks are fetched from the
//! vector store, and the generator answers strictly from the retrieved text.
//! With no matching chunks the generator answers directly (and the response
//! is marked as a fallback). A companion operation converts a guidance answer
//! into a bounded list of concrete caregiver tasks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::config::RagConfig;
use crate::error::ApiError;
use crate::llm::{CompletionRequest, GenerationCapability, Message};

const MIN_TASKS: usize = 2;
const MAX_TASKS: usize = 6;

/// One retrieved document chunk.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    /// Chunk identifier in the vector store.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Source label from the chunk metadata (falls back to the id).
    pub source: String,
    /// Distance reported by the store, smaller is closer.
    pub score: Option<f64>,
}

/// Opaque nearest-neighbor search service.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Return the `top_k` chunks nearest to the query embedding.
    async fn query(&self, embedding: &[f32], top_k: usize) -> anyhow::Result<Vec<RetrievedChunk>>;
}

/// Chroma-backed vector store client.
#[derive(Debug)]
pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    collection_id: OnceCell<String>,
}

impl ChromaStore {
    /// Build a client from configuration. The collection is resolved lazily
    /// on first query.
    pub fn new(config: &RagConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            collection_id: OnceCell::new(),
        }
    }

    async fn collection_id(&self) -> anyhow::Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .post(format!("{}/api/v1/collections", self.base_url))
                    .json(&serde_json::json!({
                        "name": self.collection,
                        "get_or_create": true,
                    }))
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let status = response.status();
                    anyhow::bail!("vector store collection lookup failed ({status})");
                }

                let body: serde_json::Value = response.json().await?;
                body["id"]
                    .as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| anyhow::anyhow!("vector store returned no collection id"))
            })
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl VectorSearch for ChromaStore {
    async fn query(&self, embedding: &[f32], top_k: usize) -> anyhow::Result<Vec<RetrievedChunk>> {
        let collection_id = self.collection_id().await?;

        let response = self
            .client
            .post(format!(
                "{}/api/v1/collections/{}/query",
                self.base_url, collection_id
            ))
            .json(&serde_json::json!({
                "query_embeddings": [embedding],
                "n_results": top_k,
                "include": ["documents", "metadatas", "distances"],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("vector store query failed ({status})");
        }

        let body: QueryResponse = response.json().await?;
        Ok(collect_contexts(&body))
    }
}

/// Parallel-array query response from the vector store.
#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Vec<Vec<Option<serde_json::Value>>>,
    #[serde(default)]
    distances: Vec<Vec<Option<f64>>>,
}

/// Zip the parallel arrays into chunks, dropping entries with no text.
fn collect_contexts(result: &QueryResponse) -> Vec<RetrievedChunk> {
    let ids = result.ids.first().map(Vec::as_slice).unwrap_or_default();
    let documents = result.documents.first().map(Vec::as_slice).unwrap_or_default();
    let metadatas = result.metadatas.first().map(Vec::as_slice).unwrap_or_default();
    let distances = result.distances.first().map(Vec::as_slice).unwrap_or_default();

    let mut contexts = Vec::new();
    for (idx, chunk_id) in ids.iter().enumerate() {
        let text = documents
            .get(idx)
            .and_then(|d| d.clone())
            .unwrap_or_default();
        if text.is_empty() {
            continue;
        }

        let source = metadatas
            .get(idx)
            .and_then(|m| m.as_ref())
            .and_then(|m| m.get("source"))
            .and_then(|s| s.as_str())
            .unwrap_or(chunk_id)
            .to_string();

        contexts.push(RetrievedChunk {
            id: chunk_id.clone(),
            text,
            source,
            score: distances.get(idx).copied().flatten(),
        });
    }
    contexts
}

/// Answer to a general caregiver question.
#[derive(Debug, Serialize)]
pub struct GeneralAnswer {
    /// The generated answer.
    pub answer: String,
    /// Retrieved chunks backing the answer; empty on fallback.
    pub sources: Vec<RetrievedChunk>,
    /// Whether the answer was produced without retrieved context.
    pub fallback: bool,
    /// Note attached to fallback answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Return a retrieval-backed answer for a general caregiver question.
pub async fn answer_general_question(
    generator: &GenerationCapability,
    vector: &dyn VectorSearch,
    question: &str,
    top_k: usize,
) -> Result<GeneralAnswer, ApiError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ApiError::validation("The question is required."));
    }

    let embedding = generator
        .embed(question)
        .await
        .map_err(|err| ApiError::Upstream(format!("Embedding request failed: {err}")))?;

    let contexts = vector
        .query(&embedding, top_k)
        .await
        .map_err(|err| ApiError::Upstream(format!("Vector store query failed: {err}")))?;

    if contexts.is_empty() {
        return answer_directly(generator, question).await;
    }

    let answer = answer_with_contexts(generator, question, &contexts).await?;
    Ok(GeneralAnswer {
        answer,
        sources: contexts,
        fallback: false,
        note: None,
    })
}

/// Unscoped answer used when retrieval finds nothing. The generator is
/// explicitly told never to claim insufficient information.
async fn answer_directly(
    generator: &GenerationCapability,
    question: &str,
) -> Result<GeneralAnswer, ApiError> {
    let request = CompletionRequest::new(vec![
        Message::system(
            "You are a compassionate autism specialist. Even without references, give practical \
             guidance for the parent's question below. Never say you lack enough information—offer \
             best-practice advice.",
        ),
        Message::user(question),
    ])
    .with_temperature(0.6)
    .with_max_tokens(500);

    let answer = generator
        .complete(request)
        .await
        .map_err(|err| ApiError::Upstream(format!("Answer generation failed: {err}")))?;
    let answer = if answer.trim().is_empty() {
        "I could not find enough information, but you can ask your care team directly for more details."
            .to_string()
    } else {
        answer
    };

    Ok(GeneralAnswer {
        answer,
        sources: Vec::new(),
        fallback: true,
        note: Some("No matches in the document library".to_string()),
    })
}

async fn answer_with_contexts(
    generator: &GenerationCapability,
    question: &str,
    contexts: &[RetrievedChunk],
) -> Result<String, ApiError> {
    let blocks: Vec<String> = contexts
        .iter()
        .enumerate()
        .map(|(idx, ctx)| format!("Source {} ({}):\n{}", idx + 1, ctx.source, ctx.text))
        .collect();

    let prompt = format!(
        "You are an empathetic autism guide for parents.\n\
         Use only the context snippets below to answer the parent's question.\n\
         Write in natural English without citing sources or mentioning source numbers.\n\
         If the snippets do not contain the answer, be honest and offer gentle best-practice advice.\n\n\
         Context snippets:\n{}\n\nParent question: {}\nCaring answer:",
        blocks.join("\n\n"),
        question,
    );

    let request = CompletionRequest::new(vec![
        Message::system("You help parents care for autistic children using curated resources."),
        Message::user(prompt),
    ])
    .with_temperature(0.4)
    .with_max_tokens(500);

    generator
        .complete(request)
        .await
        .map_err(|err| ApiError::Upstream(format!("Answer generation failed: {err}")))
}

/// One suggested caregiver task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSuggestion {
    pub title: String,
    pub description: String,
    pub suggested_time: String,
}

/// Convert a guidance answer plus the original question into concrete
/// caregiver tasks. Malformed or empty generator output is a hard failure.
pub async fn plan_tasks_from_guidance(
    generator: &GenerationCapability,
    question: &str,
    guidance: &str,
    child_name: Option<&str>,
    max_tasks: Option<usize>,
) -> Result<Vec<TaskSuggestion>, ApiError> {
    let question = question.trim();
    let guidance = guidance.trim();
    if question.is_empty() || guidance.is_empty() {
        return Err(ApiError::validation(
            "Both the question and guidance answer are required.",
        ));
    }

    let friendly_child = child_name.unwrap_or("the child");
    let task_cap = match max_tasks {
        Some(cap) if cap > 0 => cap,
        _ => estimate_task_cap(guidance),
    };

    let system_prompt = format!(
        "You are an autism parenting coach. Based on the parent's original question and the \
         guidance already given, create up to {task_cap} simple caregiver tasks for \
         {friendly_child}. Each task should be practical, phrased as an action, and mapped to a \
         part of the day (morning, afternoon, evening, bedtime, or anytime). Respond ONLY with \
         JSON using this structure: {{\"tasks\": [{{\"title\": str, \"description\": str, \
         \"suggested_time\": str}}]}}. Keep titles under 8 words and descriptions under 25 words."
    );

    let request = CompletionRequest::new(vec![
        Message::system(system_prompt),
        Message::user(format!(
            "Parent question: {question}\n\nGuidance that should be converted into tasks:\n{guidance}"
        )),
    ])
    .with_temperature(0.5)
    .with_max_tokens(700);

    let raw = generator
        .complete(request)
        .await
        .map_err(|err| ApiError::Upstream(format!("Task planning failed: {err}")))?;

    let tasks = parse_task_suggestions(&raw, task_cap);
    if tasks.is_empty() {
        return Err(ApiError::validation(
            "The assistant did not return any task suggestions.",
        ));
    }
    Ok(tasks)
}

/// Estimate how many tasks a guidance text supports, bounded to `[2, 6]`:
/// bullet lines first, then long sentences, then paragraphs, then raw length.
pub fn estimate_task_cap(guidance: &str) -> usize {
    let text = guidance.trim();
    if text.is_empty() {
        return MIN_TASKS;
    }

    let bullet_lines = text.lines().filter(|line| is_bullet_line(line)).count();
    if bullet_lines > 0 {
        return bullet_lines.clamp(MIN_TASKS, MAX_TASKS);
    }

    let long_sentences = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .filter(|sentence| sentence.split_whitespace().count() >= 8)
        .count();
    if long_sentences > 0 {
        return long_sentences.clamp(MIN_TASKS, MAX_TASKS);
    }

    let paragraphs = text
        .split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .count();
    if paragraphs > 0 {
        return paragraphs.clamp(MIN_TASKS, MAX_TASKS);
    }

    match text.split_whitespace().count() {
        0..=40 => MIN_TASKS,
        41..=120 => (MIN_TASKS + 1).min(MAX_TASKS),
        _ => (MIN_TASKS + 2).min(MAX_TASKS),
    }
}

/// Bullet detection: `- `, `* `, or `1.`/`1)` prefixes.
fn is_bullet_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix(['-', '*']) {
        return rest.starts_with(char::is_whitespace);
    }

    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    let rest = &trimmed[digits..];
    rest.strip_prefix(['.', ')'])
        .is_some_and(|tail| tail.starts_with(char::is_whitespace))
}

/// Strip a fenced code block wrapper, if present, and parse either a bare
/// array or a `{"tasks": [...]}` object into normalized suggestions.
pub fn parse_task_suggestions(raw: &str, max_tasks: usize) -> Vec<TaskSuggestion> {
    let cleaned = strip_json_fences(raw);
    let Ok(data) = serde_json::from_str::<serde_json::Value>(&cleaned) else {
        tracing::warn!("Failed to parse task suggestions JSON");
        return Vec::new();
    };

    let entries = match &data {
        serde_json::Value::Array(entries) => entries.as_slice(),
        serde_json::Value::Object(map) => match map.get("tasks") {
            Some(serde_json::Value::Array(entries)) => entries.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut normalized = Vec::new();
    for entry in entries {
        let Some(entry) = entry.as_object() else {
            continue;
        };
        let title = entry
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if title.is_empty() {
            continue;
        }

        let description = entry
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let suggested_time = entry
            .get("suggested_time")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_lowercase();

        normalized.push(TaskSuggestion {
            description: if description.is_empty() {
                title.clone()
            } else {
                description
            },
            title,
            suggested_time: if suggested_time.is_empty() {
                "anytime".to_string()
            } else {
                suggested_time
            },
        });

        if normalized.len() >= max_tasks {
            break;
        }
    }

    normalized
}

fn strip_json_fences(raw: &str) -> String {
    let text = raw.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }

    let without_opening = text.split_once('\n').map_or("", |(_, rest)| rest);
    let body = without_opening
        .rsplit_once("```")
        .map_or(without_opening, |(body, _)| body);
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_cap_prefers_bullets() {
        let guidance = "Try these:\n- breathe together\n- use a visual timer\n- narrate feelings\n- offer choices";
        assert_eq!(estimate_task_cap(guidance), 4);
    }

    #[test]
    fn test_estimate_cap_bounds() {
        let one_bullet = "- single tip";
        assert_eq!(estimate_task_cap(one_bullet), MIN_TASKS);

        let many: String = (0..10).map(|n| format!("- tip {n}\n")).collect();
        assert_eq!(estimate_task_cap(&many), MAX_TASKS);

        assert_eq!(estimate_task_cap(""), MIN_TASKS);
    }

    #[test]
    fn test_estimate_cap_falls_back_to_sentences() {
        let guidance = "Practice the morning routine together every single day this week. \
                        Celebrate the small wins with a sticker chart in the kitchen. short one.";
        assert_eq!(estimate_task_cap(guidance), 2);
    }

    #[test]
    fn test_parse_tasks_object_form() {
        let raw = r#"{"tasks": [{"title": "Morning breathing", "description": "Two minutes of balloon breaths.", "suggested_time": "Morning"}]}"#;
        let tasks = parse_task_suggestions(raw, 4);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Morning breathing");
        assert_eq!(tasks[0].suggested_time, "morning");
    }

    #[test]
    fn test_parse_tasks_fenced_array_form() {
        let raw = "```json\n[{\"title\": \"Quiet corner\"}]\n```";
        let tasks = parse_task_suggestions(raw, 4);
        assert_eq!(tasks.len(), 1);
        // Description defaults to the title, time defaults to anytime.
        assert_eq!(tasks[0].description, "Quiet corner");
        assert_eq!(tasks[0].suggested_time, "anytime");
    }

    #[test]
    fn test_parse_tasks_respects_cap_and_skips_untitled() {
        let raw = r#"{"tasks": [{"title": ""}, {"title": "A"}, {"title": "B"}, {"title": "C"}]}"#;
        let tasks = parse_task_suggestions(raw, 2);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "A");
    }

    #[test]
    fn test_parse_tasks_malformed_is_empty() {
        assert!(parse_task_suggestions("not json at all", 4).is_empty());
        assert!(parse_task_suggestions(r#"{"tasks": "nope"}"#, 4).is_empty());
    }

    #[test]
    fn test_collect_contexts_skips_empty_documents() {
        let response = QueryResponse {
            ids: vec![vec!["a".to_string(), "b".to_string()]],
            documents: vec![vec![Some("text a".to_string()), None]],
            metadatas: vec![vec![
                Some(serde_json::json!({"source": "Guide"})),
                None,
            ]],
            distances: vec![vec![Some(0.12), Some(0.5)]],
        };

        let contexts = collect_contexts(&response);
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].source, "Guide");
        assert_eq!(contexts[0].score, Some(0.12));
    }

    mod answering {
        use std::sync::Arc;

        use super::*;
        use crate::llm::LlmDriver;

        struct StaticDriver {
            completion: String,
        }

        #[async_trait]
        impl LlmDriver for StaticDriver {
            async fn complete(&self, _req: CompletionRequest) -> anyhow::Result<String> {
                Ok(self.completion.clone())
            }

            async fn embed(&self, _input: &str) -> anyhow::Result<Vec<f32>> {
                Ok(vec![0.1; 8])
            }
        }

        struct FixedVector {
            chunks: Vec<RetrievedChunk>,
        }

        #[async_trait]
        impl VectorSearch for FixedVector {
            async fn query(
                &self,
                _embedding: &[f32],
                _top_k: usize,
            ) -> anyhow::Result<Vec<RetrievedChunk>> {
                Ok(self.chunks.clone())
            }
        }

        fn capability(completion: &str) -> GenerationCapability {
            GenerationCapability::configured(Arc::new(StaticDriver {
                completion: completion.to_string(),
            }))
        }

        #[tokio::test]
        async fn test_empty_retrieval_marks_fallback() {
            let generator = capability("General best-practice advice.");
            let vector = FixedVector { chunks: Vec::new() };

            let answer = answer_general_question(&generator, &vector, "How to handle meltdowns?", 4)
                .await
                .expect("answer");

            assert!(answer.fallback);
            assert!(answer.sources.is_empty());
            assert!(answer.note.is_some());
        }

        #[tokio::test]
        async fn test_retrieved_chunks_mark_non_fallback() {
            let generator = capability("Use the quiet corner strategy.");
            let vector = FixedVector {
                chunks: vec![RetrievedChunk {
                    id: "c1".to_string(),
                    text: "Quiet corners reduce overload.".to_string(),
                    source: "Sensory Guide".to_string(),
                    score: Some(0.2),
                }],
            };

            let answer = answer_general_question(&generator, &vector, "How to handle meltdowns?", 4)
                .await
                .expect("answer");

            assert!(!answer.fallback);
            assert_eq!(answer.sources.len(), 1);
            assert!(answer.note.is_none());
        }

        #[tokio::test]
        async fn test_blank_question_is_validation_error() {
            let generator = capability("x");
            let vector = FixedVector { chunks: Vec::new() };
            let result = answer_general_question(&generator, &vector, "   ", 4).await;
            assert!(matches!(result, Err(ApiError::Validation(_))));
        }

        #[tokio::test]
        async fn test_unconfigured_generator_is_upstream_error() {
            let vector = FixedVector { chunks: Vec::new() };
            let result = answer_general_question(
                &GenerationCapability::Disabled,
                &vector,
                "How to handle meltdowns?",
                4,
            )
            .await;
            assert!(matches!(result, Err(ApiError::Upstream(_))));
        }

        #[tokio::test]
        async fn test_plan_tasks_hard_fails_on_malformed_output() {
            let generator = capability("not json");
            let result = plan_tasks_from_guidance(
                &generator,
                "How to build routines?",
                "Use visual schedules every morning.",
                Some("Mira"),
                None,
            )
            .await;
            assert!(matches!(result, Err(ApiError::Validation(_))));
        }

        #[tokio::test]
        async fn test_plan_tasks_parses_generator_json() {
            let generator = capability(
                r#"{"tasks": [{"title": "Visual schedule", "description": "Review the picture plan.", "suggested_time": "morning"}]}"#,
            );
            let tasks = plan_tasks_from_guidance(
                &generator,
                "How to build routines?",
                "Use visual schedules every morning.",
                None,
                Some(3),
            )
            .await
            .expect("tasks");
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].title, "Visual schedule");
        }
    }
}
