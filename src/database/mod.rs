//! SQLite-backed persistence layer.
//!
//! [`Store`] owns the connection pool and exposes entity repositories as
//! inherent methods (see [`repository`]). Schema management lives in
//! [`migrations`]; the advice corpus is seeded once on startup and read-only
//! afterwards.

pub mod migrations;
pub mod models;
pub mod repository;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::DatabaseConfig;
use crate::corpus::AdviceSeed;

pub use models::{
    AdviceDocRow, AlertRow, AvatarRow, ChatMessageRow, ChatSessionRow, ChildRow, EventRow,
    GeneralChatMessageRow, GeneralChatSessionRow, LevelResultRow, ProfileRow, SpeechButtonRow,
    TaskEmotionLogRow, Traits, UserRow,
};

/// SQLite-backed store shared across handlers.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the configured database, creating the file if missing.
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory store with schema applied; used by tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        migrations::run_migrations(store.pool()).await?;
        Ok(store)
    }

    /// Run migrations and seed the advice corpus if the table is empty.
    pub async fn init(&self, advice_seeds: &[AdviceSeed]) -> anyhow::Result<()> {
        migrations::run_migrations(&self.pool).await?;
        self.seed_advice_docs(advice_seeds).await?;
        Ok(())
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Seed advice documents once; existing rows win.
    async fn seed_advice_docs(&self, seeds: &[AdviceSeed]) -> anyhow::Result<()> {
        if seeds.is_empty() {
            return Ok(());
        }

        let existing = self.count_advice_docs().await?;
        if existing > 0 {
            return Ok(());
        }

        for seed in seeds {
            sqlx::query("INSERT INTO advice_docs (id, category, title, advice) VALUES (?, ?, ?, ?)")
                .bind(seed.id)
                .bind(&seed.category)
                .bind(&seed.title)
                .bind(&seed.advice)
                .execute(&self.pool)
                .await?;
        }

        tracing::info!(count = seeds.len(), "Advice documents seeded");
        Ok(())
    }
}
