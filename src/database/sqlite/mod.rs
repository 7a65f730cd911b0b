use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::corpus::{CorpusSource, QuestionAnswer, RawRow};
use crate::database::sqlite::models::{NewMedicationEntry, NewQaEntry};
use crate::database::sqlite::queries::CorpusQueries;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

pub const DATABASE_FILE_NAME: &str = "corpus.db";

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join(DATABASE_FILE_NAME);

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(&db_path).await
    }

    #[inline]
    pub async fn insert_qa(&self, table: &str, entry: &NewQaEntry) -> Result<i64> {
        CorpusQueries::insert_qa(&self.pool, table, entry).await
    }

    #[inline]
    pub async fn insert_medication(&self, table: &str, entry: &NewMedicationEntry) -> Result<i64> {
        CorpusQueries::insert_medication(&self.pool, table, entry).await
    }

    #[inline]
    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        CorpusQueries::count_rows(&self.pool, table).await
    }
}

#[async_trait]
impl CorpusSource for Database {
    #[inline]
    async fn fetch_rows(&self, table: &str, columns: &[&str]) -> Result<Vec<RawRow>> {
        CorpusQueries::fetch_embedded_rows(&self.pool, table, columns).await
    }

    #[inline]
    async fn sample_pairs(&self, table: &str, count: usize) -> Result<Vec<QuestionAnswer>> {
        CorpusQueries::sample_pairs(&self.pool, table, count).await
    }
}
