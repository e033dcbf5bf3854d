//! Error types for index job processing.
//!
//! Defines all failure conditions a worker can hit while forwarding
//! documents to the downstream indexer, including network failures, HTTP
//! errors, and database operations. Errors carry enough context for
//! debugging and are categorized for retry decisions.

use thiserror::Error;

/// Result type alias for indexing operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Error types for document forwarding and job settlement.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Indexer response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Indexer response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Rate limit exceeded with retry guidance.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying
        retry_after_seconds: u64,
    },

    /// All delivery attempts exhausted.
    #[error("indexing failed after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
    },

    /// Database operation failed during job processing.
    #[error("database error: {message}")]
    Database {
        /// Database error message
        message: String,
    },

    /// Invalid indexer or client configuration.
    #[error("invalid indexer configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Worker shutdown requested.
    #[error("worker shutdown requested")]
    ShutdownRequested,

    /// Worker task panicked during shutdown.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanic {
        /// Identifier of the panicked worker
        worker_id: usize,
        /// Join error message
        message: String,
    },

    /// Graceful shutdown exceeded its drain timeout.
    #[error("worker shutdown timed out after {timeout_seconds}s")]
    ShutdownTimeout {
        /// Configured drain timeout in seconds
        timeout_seconds: u64,
    },
}

impl IndexError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error with retry guidance.
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(attempts: u32) -> Self {
        Self::RetriesExhausted { attempts }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Determines if this error represents a temporary failure that should
    /// be retried.
    ///
    /// Returns `true` for network errors, timeouts, server errors (5xx),
    /// rate limits, and database failures. Returns `false` for client
    /// errors (4xx), configuration issues, and exhausted retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Retryable errors - temporary network/server issues
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. }
            | Self::Database { .. } => true,

            // Non-retryable errors - client issues or lifecycle states
            Self::ClientError { .. }
            | Self::RetriesExhausted { .. }
            | Self::Configuration { .. }
            | Self::ShutdownRequested
            | Self::WorkerPanic { .. }
            | Self::ShutdownTimeout { .. } => false,
        }
    }

    /// Returns the suggested retry delay in seconds for rate limit errors.
    ///
    /// Uses the Retry-After header value for rate limits, or None to
    /// indicate standard exponential backoff should be used.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}
