//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::config::AppConfig;
use crate::corpus::{self, ReferenceCorpus};
use crate::database::Store;
use crate::llm::openai::OpenAiDriver;
use crate::llm::GenerationCapability;
use crate::logging::OpTimer;
use crate::rag::ChromaStore;
use crate::{log_banner, log_init_step, log_init_warning, log_success, AppState};

/// Carebridge API version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the application with all routes and middleware.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("🚀 Carebridge API v{}", VERSION),
        format!("Database: {}", config.database.url)
    );

    // [1/5] Database connection + migrations + advice seeding
    let step_timer = OpTimer::new("server", "database");
    let data_dir = std::path::PathBuf::from(&config.data.dir);
    let store = Store::connect(&config.database).await?;
    let advice_seeds = corpus::load_advice_seeds(&data_dir);
    store.init(&advice_seeds).await?;
    log_init_step!(
        1,
        5,
        "Database",
        format!("🗄️  {} ({} advice seeds)", config.database.url, advice_seeds.len())
    );
    step_timer.finish();

    // [2/5] Reference corpus, loaded once and shared immutably
    let step_timer = OpTimer::new("server", "corpus");
    let reference_corpus = Arc::new(ReferenceCorpus::load(&data_dir));
    if reference_corpus.reference_docs().is_empty() {
        log_init_warning!("Reference corpus is empty; alerts will use the template fallback.");
    }
    log_init_step!(
        2,
        5,
        "Reference Corpus",
        format!("📚 {} documents", reference_corpus.reference_docs().len())
    );
    step_timer.finish();

    // [3/5] Text-generation capability
    let step_timer = OpTimer::new("server", "generator");
    let generator = match OpenAiDriver::from_config(&config.generation) {
        Some(driver) => {
            log_init_step!(
                3,
                5,
                "Generator",
                format!("⚙️ {} ({}) ✓", config.generation.model, config.generation.base_url)
            );
            GenerationCapability::configured(Arc::new(driver))
        }
        None => {
            log_init_warning!(
                "No generation API key configured. AI features degrade to deterministic fallbacks."
            );
            log_init_step!(3, 5, "Generator", "⚙️ Disabled (no API key)");
            GenerationCapability::Disabled
        }
    };
    step_timer.finish();

    // [4/5] Vector store client
    let step_timer = OpTimer::new("server", "vector_store");
    let vector = Arc::new(ChromaStore::new(&config.rag));
    log_init_step!(
        4,
        5,
        "Vector Store",
        format!("🔎 {} (collection {})", config.rag.url, config.rag.collection)
    );
    step_timer.finish();

    // [5/5] Router + middleware
    let step_timer = OpTimer::new("server", "router");
    let timeout = Duration::from_secs(config.server.timeout_secs);
    let state = AppState {
        config: Arc::new(config),
        store,
        generator,
        corpus: reference_corpus,
        vector,
    };
    let app = build_router(state).layer(TimeoutLayer::new(timeout));
    log_init_step!(5, 5, "Router", "🌐 Routes and middleware ready");
    step_timer.finish();

    log_success!("Carebridge API server created successfully");
    overall_timer.finish();

    Ok(app)
}

/// Assemble the router over a prepared state. Split out so tests can inject
/// an in-memory store and a scripted generator.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
