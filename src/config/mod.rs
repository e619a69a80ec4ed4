//! Configuration management for the Carebridge API.
//!
//! Configuration is loaded in layers: built-in defaults, then an optional
//! `config/carebridge` file, then
//! `CAREBRIDGE__`-prefixed environment variables, and finally a handful of
//! well-known variables (`OPENAI_API_KEY`, `DATABASE_URL`, `CHROMA_URL`, ...)
//! that override everything else.

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Text-generation and embedding service configuration.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Retrieval-augmented answering configuration.
    #[serde(default)]
    pub rag: RagConfig,
    /// Static data directory (advice and reference corpora).
    #[serde(default)]
    pub data: DataConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment and config files.
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("generation.model", "gpt-4o-mini")?
            .set_default("generation.embed_model", "text-embedding-3-large")?
            // Add config file if it exists
            .add_source(config::File::with_name("config/carebridge").required(false))
            // Override with environment variables
            .add_source(
                config::Environment::with_prefix("CAREBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize().unwrap_or_default();

        // Well-known environment variables win over everything
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                app_config.generation.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            app_config.generation.base_url = url;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            app_config.database.url = url;
        }
        if let Ok(url) = std::env::var("CHROMA_URL") {
            app_config.rag.url = url;
        }
        if let Ok(name) = std::env::var("RAG_COLLECTION") {
            app_config.rag.collection = name;
        }
        if let Ok(model) = std::env::var("RAG_EMBED_MODEL") {
            app_config.generation.embed_model = model;
        }
        if let Ok(top_k) = std::env::var("RAG_TOP_K") {
            if let Ok(parsed) = top_k.parse() {
                app_config.rag.top_k = parsed;
            }
        }

        Ok(app_config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Main API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum connection pool size.
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://carebridge.db".to_string()
}

fn default_pool_size() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_pool_size(),
        }
    }
}

/// Text-generation and embedding service configuration.
///
/// An absent API key is a supported deployment: every dependent operation
/// degrades to its deterministic fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// API key for the generation service. `None` disables the capability.
    pub api_key: Option<String>,
    /// Base URL for the OpenAI-compatible API.
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    /// Default completion model.
    #[serde(default = "default_model")]
    pub model: String,
    /// Embedding model for retrieval-augmented answering.
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    /// Request timeout in seconds.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

fn default_generation_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embed_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_generation_timeout() -> u64 {
    60
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_generation_base_url(),
            model: default_model(),
            embed_model: default_embed_model(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

/// Retrieval-augmented answering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Vector store base URL.
    #[serde(default = "default_rag_url")]
    pub url: String,
    /// Collection name holding the document chunks.
    #[serde(default = "default_rag_collection")]
    pub collection: String,
    /// Number of nearest chunks to retrieve.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_rag_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_rag_collection() -> String {
    "caregiver_rag".to_string()
}

fn default_top_k() -> usize {
    4
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            url: default_rag_url(),
            collection: default_rag_collection(),
            top_k: default_top_k(),
        }
    }
}

/// Static data directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding `advice_docs.json` and `reference_docs.json`.
    #[serde(default = "default_data_dir")]
    pub dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.generation.model, "gpt-4o-mini");
        assert_eq!(config.rag.top_k, 4);
        assert!(config.generation.api_key.is_none());
    }
}
