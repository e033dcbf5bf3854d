//! Silt HTTP API.
//!
//! Signed webhook ingestion for crawler notifications: signature
//! verification, event dedup, document change detection, and outbox
//! enqueueing for downstream indexing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use silt_core::Storage;

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::{create_router, start_server};

/// Shared application state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Storage repositories over the connection pool.
    pub storage: Arc<Storage>,
    /// Service configuration loaded at startup.
    pub config: Arc<Config>,
}
