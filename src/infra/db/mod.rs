//! Postgres-backed repository implementations.

mod friendships;
mod jobs;
mod newsfeeds;
mod posts;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use apalis_sql::postgres::PostgresStorage;
use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;
// Four bind parameters per newsfeed row; Postgres caps a statement at 65535.
const MAX_INSERT_CHUNK_SIZE: usize = 16_000;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    insert_chunk_size: usize,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        }
    }

    /// Rows per `INSERT` statement when persisting newsfeed entries.
    pub fn with_insert_chunk_size(mut self, size: usize) -> Self {
        self.insert_chunk_size = size.clamp(1, MAX_INSERT_CHUNK_SIZE);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    /// Create or upgrade the job queue tables.
    pub async fn setup_job_storage(pool: &PgPool) -> Result<(), sqlx::Error> {
        PostgresStorage::setup(pool).await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
