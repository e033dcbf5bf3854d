//! Index engine orchestrating outbox hand-off.
//!
//! The engine owns the worker pool that drains the `index_jobs` outbox
//! and forwards documents to the downstream indexer. It provides
//! lifecycle management (start, graceful shutdown) and aggregate
//! statistics over all workers.

use std::{sync::Arc, time::Duration};

use silt_core::storage::Storage;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    client::{ClientConfig, HttpIndexer, Indexer},
    error::Result,
    retry::RetryPolicy,
    worker::{IndexWorker, WorkerPool},
};

/// Configuration for the index engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,

    /// Jobs each worker claims per batch.
    pub batch_size: usize,

    /// How often workers poll for due jobs when the outbox is empty.
    pub poll_interval: Duration,

    /// Endpoint of the downstream indexer.
    pub indexer_url: String,

    /// HTTP client settings for indexer requests.
    pub client_config: ClientConfig,

    /// Retry policy applied to failed hand-offs.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for in-flight hand-offs during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            indexer_url: "http://127.0.0.1:8081/index".to_string(),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Aggregate statistics for engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of workers currently running.
    pub active_workers: usize,

    /// Total jobs picked up by workers.
    pub jobs_processed: u64,

    /// Jobs settled as successfully indexed.
    pub completed_jobs: u64,

    /// Individual hand-off attempts that failed.
    pub failed_attempts: u64,

    /// Jobs settled as permanently failed.
    pub permanent_failures: u64,

    /// Jobs currently being forwarded.
    pub in_flight_jobs: u64,
}

/// Engine managing index workers and outbox hand-off.
pub struct IndexEngine {
    storage: Arc<Storage>,
    config: EngineConfig,
    indexer: Arc<dyn Indexer>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
}

impl IndexEngine {
    /// Creates a new engine forwarding to the configured HTTP indexer.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Configuration` if the indexer URL or client
    /// settings are invalid.
    pub fn new(storage: Arc<Storage>, config: EngineConfig) -> Result<Self> {
        let indexer =
            HttpIndexer::new(&config.indexer_url, config.client_config.clone())?;
        Ok(Self::with_indexer(storage, config, Arc::new(indexer)))
    }

    /// Creates an engine with a custom indexer implementation.
    pub fn with_indexer(
        storage: Arc<Storage>,
        config: EngineConfig,
        indexer: Arc<dyn Indexer>,
    ) -> Self {
        Self {
            storage,
            config,
            indexer,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
        }
    }

    /// Starts the engine's worker pool.
    pub async fn start(&mut self) {
        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            "starting index engine"
        );

        let mut pool = WorkerPool::new(
            self.storage.clone(),
            self.config.clone(),
            self.indexer.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        pool.spawn_workers().await;
        self.worker_pool = Some(pool);
    }

    /// Gracefully shuts down the engine, draining in-flight hand-offs.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::ShutdownTimeout` if workers do not finish
    /// within the configured timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down index engine");

        match self.worker_pool.take() {
            Some(pool) => pool.shutdown_graceful(self.config.shutdown_timeout).await,
            None => {
                info!("engine was not started, nothing to shut down");
                Ok(())
            },
        }
    }

    /// Returns a snapshot of engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Claims and processes one batch of due jobs on the caller's task.
    ///
    /// Intended for tests and tooling that drive the outbox
    /// deterministically instead of running the polling workers.
    ///
    /// # Errors
    ///
    /// Returns error if claiming the batch fails.
    pub async fn process_batch(&self) -> Result<usize> {
        let worker = IndexWorker::new(
            0,
            self.storage.clone(),
            self.config.clone(),
            self.indexer.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        worker.process_batch().await
    }
}
