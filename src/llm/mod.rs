//! Text-generation driver abstraction.
//!
//! The [`LlmDriver`] trait defines the blocking completion/embedding
//! interface the rest of the service programs against. The concrete
//! implementation is [`openai::OpenAiDriver`]; tests substitute scripted
//! fakes through the same trait.
//!
//! [`GenerationCapability`] wraps a driver into an explicit
//! configured/disabled pair so callers with deterministic fallbacks never
//! need to special-case a missing API key.

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// Request to a completion driver.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Model to use (overrides the driver default).
    pub model: Option<String>,
    /// Temperature for sampling.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Constrain the response to a JSON object.
    pub json_object: bool,
}

impl CompletionRequest {
    /// Create a new request with messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            temperature: 0.7,
            max_tokens: 1024,
            json_object: false,
        }
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the maximum tokens to generate.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Request a strict JSON object response.
    #[must_use]
    pub fn with_json_object(mut self) -> Self {
        self.json_object = true;
        self
    }
}

/// Trait for text-generation drivers.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Generate a completion. An empty response is an error.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<String>;

    /// Embed a single input text into a fixed-length vector.
    async fn embed(&self, input: &str) -> anyhow::Result<Vec<f32>>;
}

/// Constructor-injected optional generation capability.
///
/// A deployment without a configured API key constructs the [`Disabled`]
/// variant; every operation with a deterministic fallback then degrades
/// through [`try_complete`] without a single scattered null check.
///
/// [`Disabled`]: GenerationCapability::Disabled
/// [`try_complete`]: GenerationCapability::try_complete
#[derive(Clone)]
pub enum GenerationCapability {
    /// A live driver is available.
    Configured(Arc<dyn LlmDriver>),
    /// No credential was configured; all calls degrade to fallbacks.
    Disabled,
}

impl GenerationCapability {
    /// Wrap a driver.
    pub fn configured(driver: Arc<dyn LlmDriver>) -> Self {
        Self::Configured(driver)
    }

    /// Whether a live driver is available.
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured(_))
    }

    /// Best-effort completion: `None` when the capability is disabled or the
    /// call fails for any reason. The failure is logged, never propagated.
    pub async fn try_complete(&self, req: CompletionRequest) -> Option<String> {
        match self {
            Self::Disabled => None,
            Self::Configured(driver) => match driver.complete(req).await {
                Ok(text) => Some(text),
                Err(err) => {
                    tracing::warn!(error = %err, "Completion request failed");
                    None
                }
            },
        }
    }

    /// Required completion: used by operations without a deterministic
    /// fallback, where an unconfigured or failing generator is a hard error.
    pub async fn complete(&self, req: CompletionRequest) -> anyhow::Result<String> {
        match self {
            Self::Disabled => anyhow::bail!("text generation is not configured"),
            Self::Configured(driver) => driver.complete(req).await,
        }
    }

    /// Embed an input text. Hard error when unconfigured.
    pub async fn embed(&self, input: &str) -> anyhow::Result<Vec<f32>> {
        match self {
            Self::Disabled => anyhow::bail!("text generation is not configured"),
            Self::Configured(driver) => driver.embed(input).await,
        }
    }
}

impl std::fmt::Debug for GenerationCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configured(_) => f.write_str("GenerationCapability::Configured"),
            Self::Disabled => f.write_str("GenerationCapability::Disabled"),
        }
    }
}
