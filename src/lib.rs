//! Carebridge API - Child Progress Tracking and Parental Support Backend
//!
//! This crate provides the backend service for a child-progress tracking and
//! parental-support application:
//!
//! - **Persistence**: SQLite-backed store for users, children, profiles,
//!   behavioral events, and emotion/stress samples
//! - **Distress alerts**: rule-based evaluation of recent stress samples with
//!   idempotent deduplication
//! - **Guidance snapshots**: AI-composed coaching text per child profile with
//!   a deterministic fallback
//! - **Parent chat**: natural-language questions translated into scoped
//!   read-only SQL and narrated from the retrieved rows
//! - **General Q&A**: retrieval-augmented answering over a curated document
//!   store
//!
//! # Architecture
//!
//! The service is organized into several key modules:
//!
//! - [`config`]: Configuration management and environment loading
//! - [`database`]: SQLite store, migrations, and repositories
//! - [`llm`]: Text-generation and embedding driver abstraction
//! - [`corpus`]: Static reference-document corpus, loaded once at startup
//! - [`alerts`]: Distress evaluation and alert creation
//! - [`guidance`]: Profile guidance composition
//! - [`chat`]: Parent chat orchestration (text-to-SQL pipeline)
//! - [`rag`]: Retrieval-augmented answering and task planning
//! - [`api`]: HTTP API endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use carebridge_api::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod alerts;
pub mod api;
pub mod chat;
pub mod config;
pub mod corpus;
pub mod database;
pub mod error;
pub mod guidance;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod server;
pub mod stats;
pub mod tasks;

use std::sync::Arc;

use config::AppConfig;
use corpus::ReferenceCorpus;
use database::Store;
use llm::GenerationCapability;
use rag::VectorSearch;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// SQLite-backed store.
    pub store: Store,
    /// Text-generation capability (configured or disabled).
    pub generator: GenerationCapability,
    /// Static reference-document corpus, loaded once at startup.
    pub corpus: Arc<ReferenceCorpus>,
    /// Vector-similarity store for retrieval-augmented answering.
    pub vector: Arc<dyn VectorSearch>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("store", &"Store")
            .field("generator", &self.generator.is_configured())
            .field("corpus_docs", &self.corpus.reference_docs().len())
            .finish()
    }
}
