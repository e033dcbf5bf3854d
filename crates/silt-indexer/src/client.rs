//! Downstream indexer interface and HTTP implementation.
//!
//! Defines the narrow [`Indexer`] trait the engine forwards documents
//! through, the production HTTP client that POSTs documents as JSON, and a
//! mock implementation for testing job processing without a live endpoint.
//! HTTP failures are categorized for retry decisions.

use std::{future::Future, pin::Pin, time::Duration};

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use silt_core::models::{DocKey, IndexJob, SourceId, TenantId};
use tracing::{info_span, Instrument};

use crate::error::{IndexError, Result};

/// Fallback retry delay when a 429 response carries no usable Retry-After.
const DEFAULT_RETRY_AFTER_SECONDS: u64 = 60;

/// Configuration for the indexer HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default timeout for HTTP requests.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Silt-Indexer/1.0".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// Document hand-off payload sent to the downstream indexer.
///
/// `doc_key` is the stable identity for the page, so re-delivery of
/// identical content upserts on the indexer side rather than duplicating.
#[derive(Debug, Clone, Serialize)]
pub struct IndexRequest {
    /// Stable document identity.
    pub doc_key: DocKey,
    /// Tenant that owns the document.
    pub tenant_id: TenantId,
    /// Crawl source the document came from.
    pub source_id: SourceId,
    /// Page URL.
    pub url: String,
    /// Body text to index.
    pub body: String,
    /// Document metadata forwarded alongside the body.
    pub doc_metadata: serde_json::Value,
    /// Hash of the carried body.
    pub content_hash: String,
    /// Correlation ID of the originating crawl job.
    pub crawl_job_id: Option<String>,
}

impl IndexRequest {
    /// Builds the hand-off payload from a claimed outbox job.
    pub fn from_job(job: &IndexJob) -> Self {
        Self {
            doc_key: job.doc_key.clone(),
            tenant_id: job.tenant_id.clone(),
            source_id: job.source_id.clone(),
            url: job.url.clone(),
            body: job.body.clone(),
            doc_metadata: job.doc_metadata.0.clone(),
            content_hash: job.content_hash.clone(),
            crawl_job_id: job.crawl_job_id.clone(),
        }
    }
}

/// Acknowledgement from a successful indexer hand-off.
#[derive(Debug, Clone)]
pub struct IndexReceipt {
    /// HTTP status code (2xx).
    pub status_code: u16,
    /// Total duration of the request.
    pub duration: Duration,
    /// Response body (limited size).
    pub body: String,
}

/// Downstream indexer the engine forwards documents through.
///
/// Abstracts the indexing destination so job processing, retry policies,
/// and error handling can be tested without a live endpoint. Production
/// uses [`HttpIndexer`]; tests use [`mock::MockIndexer`].
pub trait Indexer: Send + Sync + 'static {
    /// Forwards one document to the index.
    ///
    /// Returns a receipt on 2xx. Any other outcome is an error categorized
    /// for retry decisions: `Network`, `Timeout`, `RateLimited` (429 with
    /// Retry-After honored), `ClientError` (4xx), or `ServerError` (5xx).
    fn index_document<'a>(
        &'a self,
        request: &'a IndexRequest,
    ) -> Pin<Box<dyn Future<Output = Result<IndexReceipt>> + Send + 'a>>;
}

/// HTTP indexer client that POSTs documents as JSON.
///
/// Uses connection pooling and configurable timeouts to forward documents
/// to the configured indexing endpoint concurrently.
#[derive(Debug, Clone)]
pub struct HttpIndexer {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    config: ClientConfig,
}

impl HttpIndexer {
    /// Creates a new HTTP indexer for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Configuration` if the endpoint URL is invalid
    /// or the HTTP client cannot be configured with the provided settings.
    pub fn new(endpoint: &str, config: ClientConfig) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| IndexError::configuration(format!("invalid indexer URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| IndexError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint, config })
    }

    /// Creates a new HTTP indexer with default client configuration.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Configuration` if the endpoint URL is invalid.
    pub fn with_defaults(endpoint: &str) -> Result<Self> {
        Self::new(endpoint, ClientConfig::default())
    }

    async fn send_document(&self, request: &IndexRequest) -> Result<IndexReceipt> {
        let start_time = std::time::Instant::now();

        tracing::debug!("Forwarding document to indexer");

        let response = match self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .header("x-silt-doc-key", request.doc_key.0.as_str())
            .header("x-silt-content-hash", request.content_hash.as_str())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let duration = start_time.elapsed();
                tracing::warn!(duration_ms = duration.as_millis(), "Request failed: {}", e);

                if e.is_timeout() {
                    return Err(IndexError::timeout(self.config.timeout.as_secs()));
                }
                if e.is_connect() {
                    return Err(IndexError::network(format!("connection failed: {e}")));
                }
                return Err(IndexError::network(e.to_string()));
            },
        };

        let duration = start_time.elapsed();
        let status_code = response.status().as_u16();
        let is_success = response.status().is_success();
        let retry_after = extract_retry_after_seconds(response.headers());
        let body = read_body_truncated(response).await;

        tracing::debug!(
            status = status_code,
            duration_ms = duration.as_millis(),
            "Received indexer response"
        );

        if is_success {
            tracing::info!(status = status_code, "Document accepted by indexer");
            return Ok(IndexReceipt { status_code, duration, body });
        }

        match status_code {
            429 => {
                tracing::warn!(status = status_code, "Indexer rate limited the request");
                Err(IndexError::rate_limited(
                    retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECONDS),
                ))
            },
            400..=499 => {
                tracing::warn!(status = status_code, "Client error response");
                Err(IndexError::client_error(status_code, body))
            },
            _ => {
                tracing::warn!(status = status_code, "Server error response");
                Err(IndexError::server_error(status_code, body))
            },
        }
    }
}

impl Indexer for HttpIndexer {
    fn index_document<'a>(
        &'a self,
        request: &'a IndexRequest,
    ) -> Pin<Box<dyn Future<Output = Result<IndexReceipt>> + Send + 'a>> {
        let span = info_span!(
            "index_document",
            doc_key = %request.doc_key,
            url = %request.url
        );

        Box::pin(self.send_document(request).instrument(span))
    }
}

/// Reads the response body, keeping at most 1KB for error context.
async fn read_body_truncated(response: reqwest::Response) -> String {
    const MAX_BODY_BYTES: usize = 1024;

    match response.bytes().await {
        Ok(bytes) => {
            if bytes.len() > MAX_BODY_BYTES {
                let suffix = "... (truncated)";
                let truncated = String::from_utf8_lossy(&bytes[..MAX_BODY_BYTES]);
                format!("{truncated}{suffix}")
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read response body: {}", e);
            format!("[Failed to read response body: {e}]")
        },
    }
}

/// Extracts the retry-after delay from response headers.
///
/// Supports both seconds format and HTTP-date format. Returns the delay in
/// seconds, or a default value (60s) if the header exists but cannot be
/// parsed.
fn extract_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    let retry_after = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let now = chrono::Utc::now();
        let retry_time = date_time.with_timezone(&chrono::Utc);

        if retry_time > now {
            let duration = retry_time.signed_duration_since(now);
            if let Ok(std_duration) = duration.to_std() {
                return Some(std_duration.as_secs());
            }
        }
    }

    Some(DEFAULT_RETRY_AFTER_SECONDS)
}

pub mod mock {
    //! Mock indexer implementation for testing.
    //!
    //! Records every hand-off and replays queued outcomes, so tests can
    //! drive job processing through success, retryable failure, and
    //! permanent failure paths deterministically.

    use std::{collections::VecDeque, future::Future, pin::Pin, sync::Arc, time::Duration};

    use tokio::sync::RwLock;

    use super::{IndexReceipt, IndexRequest, Indexer};
    use crate::error::{IndexError, Result};

    /// Mock indexer that records calls and replays queued outcomes.
    ///
    /// When the outcome queue is empty, calls succeed with a synthetic
    /// 200 receipt.
    pub struct MockIndexer {
        requests: Arc<RwLock<Vec<IndexRequest>>>,
        outcomes: Arc<RwLock<VecDeque<Result<IndexReceipt>>>>,
    }

    impl MockIndexer {
        /// Creates a new mock indexer with empty state.
        pub fn new() -> Self {
            Self {
                requests: Arc::new(RwLock::new(Vec::new())),
                outcomes: Arc::new(RwLock::new(VecDeque::new())),
            }
        }

        /// Queues an error to return from an upcoming call.
        pub async fn inject_failure(&self, error: IndexError) {
            self.outcomes.write().await.push_back(Err(error));
        }

        /// Queues a receipt to return from an upcoming call.
        pub async fn inject_receipt(&self, receipt: IndexReceipt) {
            self.outcomes.write().await.push_back(Ok(receipt));
        }

        /// Returns all recorded hand-off requests for verification.
        pub async fn recorded_requests(&self) -> Vec<IndexRequest> {
            self.requests.read().await.clone()
        }

        /// Returns the number of hand-off calls made.
        pub async fn call_count(&self) -> usize {
            self.requests.read().await.len()
        }
    }

    impl Default for MockIndexer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Indexer for MockIndexer {
        fn index_document<'a>(
            &'a self,
            request: &'a IndexRequest,
        ) -> Pin<Box<dyn Future<Output = Result<IndexReceipt>> + Send + 'a>> {
            let requests = self.requests.clone();
            let outcomes = self.outcomes.clone();

            Box::pin(async move {
                requests.write().await.push(request.clone());

                match outcomes.write().await.pop_front() {
                    Some(outcome) => outcome,
                    None => Ok(IndexReceipt {
                        status_code: 200,
                        duration: Duration::from_millis(1),
                        body: "ok".to_string(),
                    }),
                }
            })
        }
    }
}
