//! OpenAI and OpenAI-compatible completion/embedding driver.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::GenerationConfig;
use crate::llm::{CompletionRequest, LlmDriver, MessageRole};

/// OpenAI-compatible API driver.
#[derive(Debug, Clone)]
pub struct OpenAiDriver {
    config: GenerationConfig,
    api_key: String,
    client: Client,
}

impl OpenAiDriver {
    /// Create a driver from a configuration with a present API key.
    ///
    /// Returns `None` when no API key is configured, so the caller can fall
    /// back to the disabled capability variant.
    pub fn from_config(config: &GenerationConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Some(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    /// Build the chat completions URL.
    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Build the embeddings URL.
    fn embeddings_url(&self) -> String {
        format!(
            "{}/v1/embeddings",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Convert messages to the wire format.
    fn convert_messages(req: &CompletionRequest) -> Vec<serde_json::Value> {
        req.messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": match msg.role {
                        MessageRole::System => "system",
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                    },
                    "content": msg.content,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmDriver for OpenAiDriver {
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<String> {
        let model = req.model.as_deref().unwrap_or(&self.config.model);

        let mut body = serde_json::json!({
            "model": model,
            "messages": Self::convert_messages(&req),
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
        });

        if req.json_object {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("completion API error ({}): {}", status, text);
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            anyhow::bail!("completion API returned no content");
        }

        Ok(content)
    }

    async fn embed(&self, input: &str) -> anyhow::Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.config.embed_model,
            "input": input,
        });

        let response = self
            .client
            .post(self.embeddings_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("embedding API error ({}): {}", status, text);
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .unwrap_or_default();

        if embedding.is_empty() {
            anyhow::bail!("embedding API returned no vector");
        }

        Ok(embedding)
    }
}

/// Chat completion response body.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Embedding response body.
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_without_key_is_none() {
        let config = GenerationConfig::default();
        assert!(OpenAiDriver::from_config(&config).is_none());
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let config = GenerationConfig {
            api_key: Some("sk-test".to_string()),
            base_url: "https://api.openai.com/".to_string(),
            ..GenerationConfig::default()
        };
        let driver = OpenAiDriver::from_config(&config).expect("driver");
        assert_eq!(
            driver.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(driver.embeddings_url(), "https://api.openai.com/v1/embeddings");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"content":" hello "}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some(" hello ")
        );
    }
}
