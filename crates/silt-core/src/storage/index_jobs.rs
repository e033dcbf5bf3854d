//! Repository for the indexing outbox.
//!
//! Jobs are enqueued in the same transaction as the document write they
//! belong to and claimed by workers in batches. The table keeps at most one
//! row per document key: re-enqueueing an already-queued key replaces the
//! carried content and resets the job to pending.
//!
//! Settlement transitions (`completed`, rescheduled, `failed`) are guarded
//! on `content_hash` and the `in_flight` status. A worker holding a claim
//! that was refreshed mid-flight matches zero rows and its outcome is
//! discarded; the refreshed job gets claimed again with the newer content.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};

use crate::{
    error::Result,
    models::{DocKey, IndexJob, JobStatus, NewIndexJob},
};

/// Repository for index job database operations.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }

    /// Enqueues an index job for a document, due immediately.
    ///
    /// Upserts on `doc_key`: a key that already has a job (whatever its
    /// status) gets its content replaced and the job reset to pending with
    /// zero attempts. Callers run this in the transaction that writes the
    /// document so the two commit or roll back together.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn enqueue(&self, job: &NewIndexJob) -> Result<()> {
        self.enqueue_impl(&*self.pool, job).await
    }

    /// Enqueues an index job within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub async fn enqueue_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        job: &NewIndexJob,
    ) -> Result<()> {
        self.enqueue_impl(&mut **tx, job).await
    }

    /// Private helper for enqueueing jobs with generic executor.
    async fn enqueue_impl<'e, E>(&self, executor: E, job: &NewIndexJob) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO index_jobs (
                doc_key, tenant_id, source_id, url, content_hash, body,
                doc_metadata, crawl_job_id, status, attempts, next_attempt_at,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 0, ?9, ?9, ?9)
            ON CONFLICT(doc_key) DO UPDATE SET
                content_hash = excluded.content_hash,
                body = excluded.body,
                doc_metadata = excluded.doc_metadata,
                crawl_job_id = excluded.crawl_job_id,
                status = 'pending',
                attempts = 0,
                next_attempt_at = excluded.next_attempt_at,
                last_error = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.doc_key.0)
        .bind(&job.tenant_id.0)
        .bind(&job.source_id.0)
        .bind(&job.url)
        .bind(&job.content_hash)
        .bind(&job.body)
        .bind(sqlx::types::Json(&job.doc_metadata))
        .bind(&job.crawl_job_id)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Claims due pending jobs for delivery processing.
    ///
    /// Atomically flips up to `batch_size` due jobs to `in_flight` and
    /// returns them. The flip and the read are a single statement, so
    /// concurrent workers and concurrent process instances never claim the
    /// same job twice.
    ///
    /// Jobs are claimed oldest-due first to preserve scheduling order.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn claim_due(&self, batch_size: usize) -> Result<Vec<IndexJob>> {
        let now = Utc::now();

        let jobs = sqlx::query_as::<_, IndexJob>(
            r#"
            UPDATE index_jobs
            SET status = 'in_flight', updated_at = ?1
            WHERE id IN (
                SELECT id FROM index_jobs
                WHERE status = 'pending' AND next_attempt_at <= ?1
                ORDER BY next_attempt_at ASC, id ASC
                LIMIT ?2
            )
            RETURNING id, doc_key, tenant_id, source_id, url, content_hash, body,
                      doc_metadata, crawl_job_id, status, attempts, next_attempt_at,
                      last_error, created_at, updated_at
            "#,
        )
        .bind(now)
        .bind(batch_size as i32)
        .fetch_all(&*self.pool)
        .await?;

        if !jobs.is_empty() {
            tracing::debug!(claimed = jobs.len(), "Claimed index jobs for delivery");
        }

        Ok(jobs)
    }

    /// Marks a claimed job as completed.
    ///
    /// Guarded on `content_hash` and `in_flight` status. Returns `false`
    /// when the guard matched zero rows, meaning the job was refreshed with
    /// newer content while the attempt ran; the outcome must be discarded.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_completed(&self, id: i64, content_hash: &str) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE index_jobs
            SET status = 'completed', attempts = attempts + 1,
                last_error = NULL, updated_at = ?3
            WHERE id = ?1 AND content_hash = ?2 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(content_hash)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns a claimed job to pending with a retry schedule.
    ///
    /// `attempts` is the new total including the attempt that just failed.
    /// Same hash/status guard as [`mark_completed`](Self::mark_completed).
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn reschedule(
        &self,
        id: i64,
        content_hash: &str,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE index_jobs
            SET status = 'pending', attempts = ?3, next_attempt_at = ?4,
                last_error = ?5, updated_at = ?6
            WHERE id = ?1 AND content_hash = ?2 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(content_hash)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(error)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Marks a claimed job as permanently failed.
    ///
    /// Terminal state for non-retryable errors or exhausted retries. Same
    /// hash/status guard as [`mark_completed`](Self::mark_completed).
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_failed(
        &self,
        id: i64,
        content_hash: &str,
        attempts: i32,
        error: &str,
    ) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE index_jobs
            SET status = 'failed', attempts = ?3, last_error = ?4, updated_at = ?5
            WHERE id = ?1 AND content_hash = ?2 AND status = 'in_flight'
            "#,
        )
        .bind(id)
        .bind(content_hash)
        .bind(attempts)
        .bind(error)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Finds the job for a document key.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_doc_key(&self, doc_key: &DocKey) -> Result<Option<IndexJob>> {
        let job = sqlx::query_as::<_, IndexJob>(
            r#"
            SELECT id, doc_key, tenant_id, source_id, url, content_hash, body,
                   doc_metadata, crawl_job_id, status, attempts, next_attempt_at,
                   last_error, created_at, updated_at
            FROM index_jobs
            WHERE doc_key = ?1
            "#,
        )
        .bind(&doc_key.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(job)
    }

    /// Counts jobs by status.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM index_jobs
            WHERE status = ?1
            "#,
        )
        .bind(status.to_string())
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }
}
