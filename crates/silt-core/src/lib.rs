//! Core domain models and storage for the crawl-webhook ingestion pipeline.
//!
//! Provides strongly-typed domain primitives, the error taxonomy, and the
//! repository layer over SQLite. The API and indexing crates depend on these
//! foundational types; all dedup and change-detection guarantees live in the
//! storage layer here, enforced by constraints rather than application checks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;

pub use error::{CoreError, Result};
pub use models::{
    sha256_hex, DocKey, Document, EventId, IndexJob, JobStatus, NewDocument, NewIndexJob,
    NewWebhookEvent, SourceId, TenantId, WebhookEvent,
};
pub use storage::{run_migrations, Storage};
