//! Database access layer implementing the repository pattern for ingestion
//! persistence.
//!
//! The repository layer acts as an anti-corruption layer, translating between
//! domain models and database schemas. This isolation allows schema evolution
//! without breaking domain logic.
//!
//! All database operations MUST go through these repositories. Direct SQL
//! queries outside this module are forbidden to maintain consistency.

use std::sync::Arc;

use sqlx::SqlitePool;

pub mod documents;
pub mod index_jobs;
pub mod webhook_events;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
///
/// The `Storage` struct is the entry point for all database operations in
/// Silt. It manages a shared connection pool and provides type-safe access to
/// each domain repository.
#[derive(Clone)]
pub struct Storage {
    /// Repository for the webhook event dedup ledger.
    pub webhook_events: Arc<webhook_events::Repository>,

    /// Repository for document content and change detection.
    pub documents: Arc<documents::Repository>,

    /// Repository for the indexing outbox.
    pub index_jobs: Arc<index_jobs::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    ///
    /// All repositories share the same pool with Arc for efficient resource
    /// usage.
    pub fn new(pool: SqlitePool) -> Self {
        let pool = Arc::new(pool);

        Self {
            webhook_events: Arc::new(webhook_events::Repository::new(pool.clone())),
            documents: Arc::new(documents::Repository::new(pool.clone())),
            index_jobs: Arc::new(index_jobs::Repository::new(pool)),
        }
    }

    /// Returns the shared connection pool.
    ///
    /// Used by callers that need to begin a transaction spanning multiple
    /// repositories, such as the document-plus-outbox commit.
    pub fn pool(&self) -> Arc<SqlitePool> {
        self.webhook_events.pool()
    }

    /// Performs a health check on the database connection.
    ///
    /// Executes a simple query to verify database connectivity. Used by
    /// the `/health/ready` endpoint for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy or
    /// the query times out.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool()).await?;

        Ok(())
    }
}

/// Creates the schema if it does not exist yet.
///
/// Statements are idempotent so the function can run on every startup and
/// against fresh in-memory databases in tests. Timestamps are written by the
/// application, never by SQLite defaults, so that stored values compare and
/// order consistently with bound `chrono` values.
///
/// # Errors
///
/// Returns `CoreError::Database` if any statement fails.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            signature TEXT,
            body_digest TEXT NOT NULL,
            payload TEXT NOT NULL,
            received_at TEXT NOT NULL,
            UNIQUE(event_id, event_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_key TEXT NOT NULL UNIQUE,
            tenant_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            url TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            content TEXT NOT NULL,
            crawl_job_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_key TEXT NOT NULL UNIQUE,
            tenant_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            url TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            body TEXT NOT NULL,
            doc_metadata TEXT NOT NULL,
            crawl_job_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT NOT NULL,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_tenant_source
        ON documents(tenant_id, source_id, updated_at DESC)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_index_jobs_due
        ON index_jobs(status, next_attempt_at)
        WHERE status IN ('pending', 'in_flight')
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
