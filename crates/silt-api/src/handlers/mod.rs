//! HTTP request handlers for the Silt API.
//!
//! This module contains all HTTP endpoint handlers following a consistent
//! pattern:
//! - Signature verification before any parsing
//! - Input validation with appropriate error codes
//! - Tracing for observability
//! - Database transaction management
//! - Standardized error responses
//!
//! # Handler Organization
//!
//! Handlers are grouped by functionality:
//! - `ingest` - Signed crawl webhook ingestion
//! - `health` - Liveness and readiness probes
//!
//! # Error Handling
//!
//! All handlers return standardized error responses with:
//! - Appropriate HTTP status codes
//! - Machine-readable error codes (`missing_signature`, `malformed_payload`,
//!   `missing_tenant_mapping`, ...)
//! - Human-readable error messages
//! - Request tracing IDs for debugging

pub mod health;
pub mod ingest;

// Re-export handlers for convenient access
pub use health::{liveness_check, readiness_check};
pub use ingest::ingest_webhook;
