//! Index workers and the supervised pool running them.
//!
//! Each worker claims batches of due outbox jobs, forwards them through
//! the [`Indexer`] trait, and settles the outcome. Settlement updates are
//! guarded on `content_hash`, so a job refreshed with newer content while
//! an attempt ran keeps its pending state and the stale outcome is
//! discarded.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use silt_core::{models::IndexJob, storage::Storage};
use tokio::{sync::RwLock, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{IndexRequest, Indexer},
    engine::{EngineConfig, EngineStats},
    error::{IndexError, Result},
    retry::{RetryContext, RetryDecision},
};

/// Individual worker that processes index jobs.
pub struct IndexWorker {
    id: usize,
    storage: Arc<Storage>,
    config: EngineConfig,
    indexer: Arc<dyn Indexer>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
}

impl IndexWorker {
    /// Creates a new index worker with the given configuration.
    pub fn new(
        id: usize,
        storage: Arc<Storage>,
        config: EngineConfig,
        indexer: Arc<dyn Indexer>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, storage, config, indexer, stats, cancellation_token }
    }

    /// Main worker loop - claims and processes jobs until cancelled.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "index worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "index worker received shutdown signal");
                break;
            }

            match self.process_batch().await {
                Ok(processed_count) => {
                    if processed_count == 0 {
                        // No jobs due, wait before polling again
                        tokio::select! {
                            () = sleep(self.config.poll_interval) => {}
                            () = self.cancellation_token.cancelled() => break,
                        }
                    }
                },
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        error = %error,
                        "worker batch processing failed"
                    );
                    // Wait before retrying to avoid tight error loops
                    tokio::select! {
                        () = sleep(Duration::from_secs(5)) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "index worker stopped");
        Ok(())
    }

    /// Claims and processes a batch of due jobs.
    ///
    /// The claim atomically flips the rows to `in_flight`, so concurrent
    /// workers never pick up the same job twice.
    pub async fn process_batch(&self) -> Result<usize> {
        let jobs = self
            .storage
            .index_jobs
            .claim_due(self.config.batch_size)
            .await
            .map_err(|e| IndexError::database(format!("failed to claim index jobs: {e}")))?;
        let batch_size = jobs.len();

        debug!(worker_id = self.id, batch_size, "processing job batch");

        for job in jobs {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            if let Err(error) = self.process_job(job).await {
                error!(
                    worker_id = self.id,
                    error = %error,
                    "job processing failed"
                );
            }
        }

        Ok(batch_size)
    }

    /// Processes a single claimed job through the hand-off pipeline.
    async fn process_job(&self, job: IndexJob) -> Result<()> {
        {
            let mut stats = self.stats.write().await;
            stats.in_flight_jobs += 1;
        }

        let result = self.forward_job(&job).await;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight_jobs -= 1;
            stats.jobs_processed += 1;
        }

        result
    }

    /// Forwards one job to the indexer and settles the outcome.
    ///
    /// Always returns `Ok` when the outcome was recorded, even if the
    /// hand-off itself failed; errors surface only when settlement cannot
    /// reach the database.
    async fn forward_job(&self, job: &IndexJob) -> Result<()> {
        let attempt_number = u32::try_from(job.attempts).unwrap_or(u32::MAX).saturating_add(1);
        let request = IndexRequest::from_job(job);

        debug!(
            worker_id = self.id,
            job_id = job.id,
            doc_key = %job.doc_key,
            attempt_number,
            "attempting document hand-off"
        );

        match self.indexer.index_document(&request).await {
            Ok(receipt) => {
                let settled = self
                    .storage
                    .index_jobs
                    .mark_completed(job.id, &job.content_hash)
                    .await
                    .map_err(|e| {
                        IndexError::database(format!("failed to mark job completed: {e}"))
                    })?;

                if settled {
                    {
                        let mut stats = self.stats.write().await;
                        stats.completed_jobs += 1;
                    }

                    info!(
                        worker_id = self.id,
                        job_id = job.id,
                        doc_key = %job.doc_key,
                        status_code = receipt.status_code,
                        duration_ms = receipt.duration.as_millis(),
                        "document indexed successfully"
                    );
                } else {
                    debug!(
                        worker_id = self.id,
                        job_id = job.id,
                        doc_key = %job.doc_key,
                        "job refreshed while in flight, discarding stale completion"
                    );
                }
            },
            Err(error) => {
                {
                    let mut stats = self.stats.write().await;
                    stats.failed_attempts += 1;
                }

                self.handle_failed_attempt(job, attempt_number, error).await?;
            },
        }

        Ok(())
    }

    /// Settles a failed attempt: schedule a retry or fail permanently.
    async fn handle_failed_attempt(
        &self,
        job: &IndexJob,
        attempt_number: u32,
        error: IndexError,
    ) -> Result<()> {
        if !error.is_retryable() {
            let settled = self.fail_job(job, attempt_number, &error).await?;
            if settled {
                error!(
                    worker_id = self.id,
                    job_id = job.id,
                    doc_key = %job.doc_key,
                    attempt_number,
                    error = %error,
                    "hand-off failed with non-retryable error"
                );
            }
            return Ok(());
        }

        let retry_context = RetryContext::new(
            attempt_number,
            error.clone(),
            Utc::now(),
            self.config.retry_policy.clone(),
        );

        match retry_context.decide_retry() {
            RetryDecision::Retry { next_attempt_at } => {
                let attempts = i32::try_from(attempt_number).unwrap_or(i32::MAX);
                let settled = self
                    .storage
                    .index_jobs
                    .reschedule(
                        job.id,
                        &job.content_hash,
                        attempts,
                        next_attempt_at,
                        &error.to_string(),
                    )
                    .await
                    .map_err(|e| {
                        IndexError::database(format!("failed to schedule retry: {e}"))
                    })?;

                if settled {
                    warn!(
                        worker_id = self.id,
                        job_id = job.id,
                        doc_key = %job.doc_key,
                        attempt_number,
                        next_attempt_at = %next_attempt_at,
                        error = %error,
                        "hand-off failed, retry scheduled"
                    );
                } else {
                    debug!(
                        worker_id = self.id,
                        job_id = job.id,
                        doc_key = %job.doc_key,
                        "job refreshed while in flight, discarding stale retry"
                    );
                }
            },
            RetryDecision::GiveUp { reason } => {
                let settled = self.fail_job(job, attempt_number, &error).await?;
                if settled {
                    error!(
                        worker_id = self.id,
                        job_id = job.id,
                        doc_key = %job.doc_key,
                        attempt_number,
                        reason = %reason,
                        error = %error,
                        "hand-off permanently failed"
                    );
                }
            },
        }

        Ok(())
    }

    /// Marks a job permanently failed, counting it when the guard settles.
    async fn fail_job(
        &self,
        job: &IndexJob,
        attempt_number: u32,
        error: &IndexError,
    ) -> Result<bool> {
        let attempts = i32::try_from(attempt_number).unwrap_or(i32::MAX);
        let settled = self
            .storage
            .index_jobs
            .mark_failed(job.id, &job.content_hash, attempts, &error.to_string())
            .await
            .map_err(|e| IndexError::database(format!("failed to mark job failed: {e}")))?;

        if settled {
            let mut stats = self.stats.write().await;
            stats.permanent_failures += 1;
        } else {
            debug!(
                worker_id = self.id,
                job_id = job.id,
                doc_key = %job.doc_key,
                "job refreshed while in flight, discarding stale failure"
            );
        }

        Ok(settled)
    }
}

/// Worker pool that manages index worker tasks with supervision.
///
/// Provides structured concurrency for the engine's workers: collective
/// spawning, health inspection, and graceful shutdown within a bounded
/// drain timeout.
pub struct WorkerPool {
    storage: Arc<Storage>,
    config: EngineConfig,
    indexer: Arc<dyn Indexer>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    /// Creates a new worker pool with the given configuration.
    pub fn new(
        storage: Arc<Storage>,
        config: EngineConfig,
        indexer: Arc<dyn Indexer>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            storage,
            config,
            indexer,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
        }
    }

    /// Spawns all configured workers and begins processing.
    ///
    /// Workers run until cancellation is requested via the cancellation
    /// token. Returns immediately after spawning all workers.
    pub async fn spawn_workers(&mut self) {
        info!(worker_count = self.config.worker_count, "spawning index workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = IndexWorker::new(
                worker_id,
                self.storage.clone(),
                self.config.clone(),
                self.indexer.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(
                        worker_id,
                        error = %error,
                        "index worker terminated with error"
                    );
                } else {
                    info!(worker_id, "index worker stopped gracefully");
                }

                result
            });

            self.worker_handles.push(handle);
        }

        info!(spawned_workers = self.worker_handles.len(), "all index workers spawned");
    }

    /// Gracefully shuts down all workers, waiting for in-flight hand-offs
    /// to complete.
    ///
    /// Signals cancellation to all workers and waits for them to finish
    /// their current work within the given timeout.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::ShutdownTimeout` if the timeout is exceeded.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let shutdown_future = async {
            let mut results = Vec::new();

            for (worker_id, handle) in
                std::mem::take(&mut self.worker_handles).into_iter().enumerate()
            {
                match handle.await {
                    Ok(worker_result) => {
                        if let Err(error) = worker_result {
                            warn!(
                                worker_id,
                                error = %error,
                                "worker completed with error during shutdown"
                            );
                        }
                        results.push(Ok(()));
                    },
                    Err(join_error) => {
                        error!(
                            worker_id,
                            error = %join_error,
                            "worker task panicked during shutdown"
                        );
                        results.push(Err(IndexError::WorkerPanic {
                            worker_id,
                            message: format!("{join_error}"),
                        }));
                    },
                }
            }

            {
                let mut stats = self.stats.write().await;
                stats.active_workers = 0;
            }

            results
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(results) => {
                let error_count = results.iter().filter(|r| r.is_err()).count();
                if error_count > 0 {
                    warn!(
                        error_count,
                        total_workers = results.len(),
                        "some workers completed with errors during shutdown"
                    );
                }
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_timeout) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(IndexError::ShutdownTimeout { timeout_seconds: timeout.as_secs() })
            },
        }
    }

    /// Checks if any workers are still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.worker_handles.is_empty() {
            let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

            if active_count > 0 && !self.cancellation_token.is_cancelled() {
                error!(
                    active_workers = active_count,
                    "WorkerPool dropped with active workers, forcing cancellation"
                );

                self.cancellation_token.cancel();

                warn!(
                    "WorkerPool was not shut down gracefully, call shutdown_graceful() before dropping"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use silt_core::{
        models::{sha256_hex, DocKey, JobStatus, NewIndexJob, SourceId, TenantId},
        storage::run_migrations,
    };
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::client::mock::MockIndexer;
    use crate::retry::RetryPolicy;

    async fn test_storage() -> Arc<Storage> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        run_migrations(&pool).await.expect("migrations");
        Arc::new(Storage::new(pool))
    }

    fn sample_job(url: &str, body: &str) -> NewIndexJob {
        let tenant_id = TenantId::new("acme");
        let source_id = SourceId::new("site1");
        NewIndexJob {
            doc_key: DocKey::derive(&tenant_id, &source_id, url),
            tenant_id,
            source_id,
            url: url.to_string(),
            content_hash: sha256_hex(body.as_bytes()),
            body: body.to_string(),
            doc_metadata: json!({"crawler": {}}),
            crawl_job_id: Some("job-1".to_string()),
        }
    }

    fn test_worker(
        storage: Arc<Storage>,
        indexer: Arc<MockIndexer>,
        config: EngineConfig,
    ) -> IndexWorker {
        IndexWorker::new(
            0,
            storage,
            config,
            indexer,
            Arc::new(RwLock::new(EngineStats::default())),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn worker_completes_claimed_job() {
        let storage = test_storage().await;
        let indexer = Arc::new(MockIndexer::new());
        let job = sample_job("https://x/a", "# Hi");
        storage.index_jobs.enqueue(&job).await.expect("enqueue");

        let worker = test_worker(storage.clone(), indexer.clone(), EngineConfig::default());
        let processed = worker.process_batch().await.expect("batch");
        assert_eq!(processed, 1);

        let stored = storage
            .index_jobs
            .find_by_doc_key(&job.doc_key)
            .await
            .expect("find")
            .expect("job exists");
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.attempts, 1);

        assert_eq!(indexer.call_count().await, 1);
        let requests = indexer.recorded_requests().await;
        assert_eq!(requests[0].body, "# Hi");
        assert_eq!(requests[0].doc_key, job.doc_key);
    }

    #[tokio::test]
    async fn retryable_failure_schedules_backoff_retry() {
        let storage = test_storage().await;
        let indexer = Arc::new(MockIndexer::new());
        indexer.inject_failure(IndexError::server_error(503, "unavailable")).await;

        let job = sample_job("https://x/a", "# Hi");
        storage.index_jobs.enqueue(&job).await.expect("enqueue");

        let worker = test_worker(storage.clone(), indexer, EngineConfig::default());
        worker.process_batch().await.expect("batch");

        let stored = storage
            .index_jobs
            .find_by_doc_key(&job.doc_key)
            .await
            .expect("find")
            .expect("job exists");
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert!(stored.next_attempt_at > Utc::now());
        assert!(stored.last_error.as_deref().unwrap().contains("server error"));
    }

    #[tokio::test]
    async fn non_retryable_failure_is_terminal() {
        let storage = test_storage().await;
        let indexer = Arc::new(MockIndexer::new());
        indexer.inject_failure(IndexError::client_error(404, "not found")).await;

        let job = sample_job("https://x/a", "# Hi");
        storage.index_jobs.enqueue(&job).await.expect("enqueue");

        let worker = test_worker(storage.clone(), indexer, EngineConfig::default());
        worker.process_batch().await.expect("batch");

        let stored = storage
            .index_jobs
            .find_by_doc_key(&job.doc_key)
            .await
            .expect("find")
            .expect("job exists");
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.last_error.as_deref().unwrap().contains("client error"));

        // Failed jobs are not reclaimed
        let again = worker.process_batch().await.expect("second batch");
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn exhausted_attempts_mark_job_failed() {
        let storage = test_storage().await;
        let indexer = Arc::new(MockIndexer::new());
        indexer.inject_failure(IndexError::server_error(500, "boom")).await;

        let job = sample_job("https://x/a", "# Hi");
        storage.index_jobs.enqueue(&job).await.expect("enqueue");

        let config = EngineConfig {
            retry_policy: RetryPolicy { max_attempts: 1, ..Default::default() },
            ..Default::default()
        };
        let worker = test_worker(storage.clone(), indexer, config);
        worker.process_batch().await.expect("batch");

        let stored = storage
            .index_jobs
            .find_by_doc_key(&job.doc_key)
            .await
            .expect("find")
            .expect("job exists");
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn rate_limit_defers_next_attempt_by_retry_after() {
        let storage = test_storage().await;
        let indexer = Arc::new(MockIndexer::new());
        indexer.inject_failure(IndexError::rate_limited(120)).await;

        let job = sample_job("https://x/a", "# Hi");
        storage.index_jobs.enqueue(&job).await.expect("enqueue");

        let worker = test_worker(storage.clone(), indexer, EngineConfig::default());
        worker.process_batch().await.expect("batch");

        let stored = storage
            .index_jobs
            .find_by_doc_key(&job.doc_key)
            .await
            .expect("find")
            .expect("job exists");
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.next_attempt_at > Utc::now() + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn stale_completion_after_refresh_leaves_newer_job_pending() {
        let storage = test_storage().await;
        let indexer = Arc::new(MockIndexer::new());

        storage.index_jobs.enqueue(&sample_job("https://x/a", "# Hi")).await.expect("v1");

        // Claim v1 directly, then refresh the key with newer content while
        // the claim is outstanding
        let claimed = storage.index_jobs.claim_due(1).await.expect("claim").remove(0);
        let revised = sample_job("https://x/a", "# Hi v2");
        storage.index_jobs.enqueue(&revised).await.expect("v2");

        let worker = test_worker(storage.clone(), indexer.clone(), EngineConfig::default());
        worker.forward_job(&claimed).await.expect("forward");

        // The stale completion is discarded; the refreshed job still runs
        let stored = storage
            .index_jobs
            .find_by_doc_key(&revised.doc_key)
            .await
            .expect("find")
            .expect("job exists");
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.content_hash, revised.content_hash);

        let processed = worker.process_batch().await.expect("batch");
        assert_eq!(processed, 1);
        let requests = indexer.recorded_requests().await;
        assert_eq!(requests.last().unwrap().body, "# Hi v2");
    }

    #[tokio::test]
    async fn worker_tracks_processing_stats() {
        let storage = test_storage().await;
        let indexer = Arc::new(MockIndexer::new());
        indexer.inject_failure(IndexError::client_error(400, "bad")).await;

        storage.index_jobs.enqueue(&sample_job("https://x/a", "# A")).await.expect("a");
        storage.index_jobs.enqueue(&sample_job("https://x/b", "# B")).await.expect("b");

        let stats = Arc::new(RwLock::new(EngineStats::default()));
        let worker = IndexWorker::new(
            0,
            storage,
            EngineConfig::default(),
            indexer,
            stats.clone(),
            CancellationToken::new(),
        );
        worker.process_batch().await.expect("batch");

        let snapshot = stats.read().await.clone();
        assert_eq!(snapshot.jobs_processed, 2);
        assert_eq!(snapshot.failed_attempts, 1);
        assert_eq!(snapshot.completed_jobs, 1);
        assert_eq!(snapshot.permanent_failures, 1);
        assert_eq!(snapshot.in_flight_jobs, 0);
    }

    #[tokio::test]
    async fn worker_pool_spawns_configured_number_of_workers() {
        let storage = test_storage().await;
        let config = EngineConfig { worker_count: 5, ..Default::default() };
        let stats = Arc::new(RwLock::new(EngineStats::default()));

        let mut pool = WorkerPool::new(
            storage,
            config,
            Arc::new(MockIndexer::new()),
            stats.clone(),
            CancellationToken::new(),
        );
        pool.spawn_workers().await;

        assert!(pool.has_active_workers());
        assert_eq!(stats.read().await.active_workers, 5);

        pool.shutdown_graceful(Duration::from_secs(3))
            .await
            .expect("graceful shutdown should succeed");

        assert_eq!(stats.read().await.active_workers, 0);
    }

    #[tokio::test]
    async fn worker_pool_without_workers_shuts_down_immediately() {
        let storage = test_storage().await;
        let pool = WorkerPool::new(
            storage,
            EngineConfig::default(),
            Arc::new(MockIndexer::new()),
            Arc::new(RwLock::new(EngineStats::default())),
            CancellationToken::new(),
        );

        let result = pool.shutdown_graceful(Duration::from_millis(1)).await;
        assert!(result.is_ok());
    }
}
