//! Outbox hand-off engine forwarding ingested documents to the
//! downstream indexer.
//!
//! This crate drains the durable `index_jobs` outbox written by the
//! ingest pipeline and hands each document off to the indexer service
//! with retries and backoff. A document enters the outbox when its
//! content changes; hand-off failures never affect ingestion.
//!
//! # Architecture
//!
//! The engine operates as a continuous background process:
//!
//! 1. Workers claim batches of due jobs, atomically flipping them to
//!    `in_flight`
//! 2. Each claimed job is forwarded to the indexer over HTTP
//! 3. Outcomes are settled with hash-guarded updates, so a job
//!    refreshed with newer content while an attempt ran is never
//!    clobbered by the stale result
//! 4. Failed hand-offs are retried with exponential backoff and jitter
//!    until the attempt limit is reached
//!
//! # Key Features
//!
//! - **At-least-once hand-off**: jobs survive restarts and are retried
//!   until settled
//! - **Stale-result protection**: settlement is guarded on the content
//!   hash captured at claim time
//! - **Rate-limit awareness**: `Retry-After` guidance from the indexer
//!   overrides computed backoff
//! - **Graceful shutdown**: in-flight hand-offs drain within a bounded
//!   timeout
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use silt_core::storage::Storage;
//! use silt_indexer::{EngineConfig, IndexEngine};
//!
//! # async fn example(storage: Arc<Storage>) -> silt_indexer::Result<()> {
//! let config = EngineConfig {
//!     worker_count: 4,
//!     indexer_url: "http://indexer.internal:8081/index".to_string(),
//!     ..Default::default()
//! };
//!
//! let mut engine = IndexEngine::new(storage, config)?;
//! engine.start().await;
//!
//! // ... application runs ...
//!
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod retry;

mod worker;

pub use client::{ClientConfig, HttpIndexer, IndexReceipt, IndexRequest, Indexer};
pub use engine::{EngineConfig, EngineStats, IndexEngine};
pub use error::{IndexError, Result};
pub use retry::RetryPolicy;

/// Default number of concurrent index workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default number of jobs claimed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default indexer request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
