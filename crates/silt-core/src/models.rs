//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhook events, documents, index jobs, and newtype ID wrappers
//! for compile-time type safety. Includes database serialization traits and
//! the status state machine for the indexing outbox.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type Db = sqlx::Sqlite;
type SqliteTypeInfo = sqlx::sqlite::SqliteTypeInfo;
type SqliteValueRef<'r> = sqlx::sqlite::SqliteValueRef<'r>;
type SqliteArgBuffer<'q> = <sqlx::Sqlite as sqlx::Database>::ArgumentBuffer<'q>;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Computes the SHA-256 digest of `data` as lowercase hex.
///
/// Every hash in the pipeline goes through this function, so body digests,
/// content hashes, and document keys all share the same 64-character format.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Strongly-typed event identifier.
///
/// Wraps the sender-assigned ID from the webhook envelope. The value is
/// opaque to this system; uniqueness is only meaningful in combination with
/// the event type, which is why the storage constraint covers the
/// `(event_id, event_type)` pair.
///
/// # Example
///
/// ```
/// use silt_core::models::EventId;
/// let event_id = EventId::new("evt_9f8a2c");
/// println!("Processing event: {}", event_id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// Creates an event ID from the sender-assigned value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl sqlx::Type<Db> for EventId {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for EventId {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as sqlx::Decode<Db>>::decode(value)?;
        Ok(Self(s))
    }
}

impl<'q> sqlx::Encode<'q, Db> for EventId {
    fn encode_by_ref(&self, buf: &mut SqliteArgBuffer<'q>) -> EncodeResult {
        <String as sqlx::Encode<Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed tenant identifier.
///
/// Provides multi-tenancy isolation. Resolved from envelope metadata during
/// ingestion; every document and index job is scoped to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    /// Creates a tenant ID from a resolved value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl sqlx::Type<Db> for TenantId {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for TenantId {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as sqlx::Decode<Db>>::decode(value)?;
        Ok(Self(s))
    }
}

impl<'q> sqlx::Encode<'q, Db> for TenantId {
    fn encode_by_ref(&self, buf: &mut SqliteArgBuffer<'q>) -> EncodeResult {
        <String as sqlx::Encode<Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed crawl source identifier.
///
/// Identifies the crawl configuration a page came from. A tenant can run
/// several sources against the same site without their documents colliding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    /// Creates a source ID from a resolved value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl sqlx::Type<Db> for SourceId {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for SourceId {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as sqlx::Decode<Db>>::decode(value)?;
        Ok(Self(s))
    }
}

impl<'q> sqlx::Encode<'q, Db> for SourceId {
    fn encode_by_ref(&self, buf: &mut SqliteArgBuffer<'q>) -> EncodeResult {
        <String as sqlx::Encode<Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Deterministic document identity.
///
/// Derived from the `(tenant, source, url)` triple, so repeated crawls of
/// the same page always resolve to the same key. Use [`DocKey::derive`]
/// rather than constructing one from a raw string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocKey(pub String);

impl DocKey {
    /// Derives the document key for a `(tenant, source, url)` triple.
    ///
    /// The components are pipe-joined before hashing so tenants or sources
    /// that share a URL can never collide.
    ///
    /// # Example
    ///
    /// ```
    /// use silt_core::models::{DocKey, SourceId, TenantId};
    /// let key = DocKey::derive(
    ///     &TenantId::new("acme"),
    ///     &SourceId::new("docs-site"),
    ///     "https://docs.acme.test/intro",
    /// );
    /// assert_eq!(key.as_str().len(), 64);
    /// ```
    pub fn derive(tenant_id: &TenantId, source_id: &SourceId, url: &str) -> Self {
        let joined = format!("{}|{}|{}", tenant_id.as_str(), source_id.as_str(), url);
        Self(sha256_hex(joined.as_bytes()))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl sqlx::Type<Db> for DocKey {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for DocKey {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as sqlx::Decode<Db>>::decode(value)?;
        Ok(Self(s))
    }
}

impl<'q> sqlx::Encode<'q, Db> for DocKey {
    fn encode_by_ref(&self, buf: &mut SqliteArgBuffer<'q>) -> EncodeResult {
        <String as sqlx::Encode<Db>>::encode_by_ref(&self.0, buf)
    }
}

/// Index job lifecycle status.
///
/// Jobs progress through these states while a document waits to be handed
/// to the downstream indexer:
///
/// ```text
/// Pending -> InFlight -> Completed
///         |           -> Pending   (retryable failure, rescheduled)
///         |           -> Failed    (non-retryable or retries exhausted)
///         `-> refreshed in place when the document changes again
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued and waiting for a worker.
    Pending,

    /// Worker actively delivering to the indexer.
    ///
    /// A worker has claimed this job and is forwarding the document.
    /// This state prevents duplicate hand-offs.
    InFlight,

    /// Successfully handed to the indexer.
    ///
    /// Terminal until the document's content changes again, at which point
    /// the row is reset to pending with the new content.
    Completed,

    /// Permanently failed.
    ///
    /// Terminal failure state after all retries exhausted or a
    /// non-retryable error. Kept for inspection; a later content change
    /// re-enqueues the key as pending.
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InFlight => write!(f, "in_flight"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<Db> for JobStatus {
    fn type_info() -> SqliteTypeInfo {
        <&str as sqlx::Type<Db>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Db> for JobStatus {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<Db>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid job status: {s}").into()),
        }
    }
}

/// A durably recorded webhook delivery.
///
/// Rows are written once when an `(event_id, event_type)` pair is first
/// accepted and never updated afterwards. The table doubles as the dedup
/// ledger and the audit trail of everything the sender delivered.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
    /// Storage-assigned row ID.
    pub id: i64,

    /// Sender-assigned event identifier.
    pub event_id: EventId,

    /// Event type tag (e.g. `crawl.page`).
    pub event_type: String,

    /// Verbatim signature header value, kept for audit.
    pub signature: Option<String>,

    /// SHA-256 hex digest of the verified raw request body.
    pub body_digest: String,

    /// Full decoded envelope, stored for audit and replay.
    pub payload: sqlx::types::Json<serde_json::Value>,

    /// When the delivery was accepted.
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// Decoded envelope as a plain JSON value.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload.0
    }
}

/// Fields for recording a new webhook delivery.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    /// Sender-assigned event identifier.
    pub event_id: EventId,
    /// Event type tag.
    pub event_type: String,
    /// Verbatim signature header value.
    pub signature: Option<String>,
    /// SHA-256 hex digest of the raw body.
    pub body_digest: String,
    /// Full decoded envelope.
    pub payload: serde_json::Value,
}

/// Latest accepted content for a logical document.
///
/// Exactly one row exists per [`DocKey`]. The `content_hash` column is the
/// change-detection signal: an incoming document with an equal hash is
/// skipped without touching the row or the indexing outbox.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    /// Storage-assigned row ID.
    pub id: i64,

    /// Deterministic document identity.
    pub doc_key: DocKey,

    /// Tenant that owns this document.
    pub tenant_id: TenantId,

    /// Crawl source the page came from.
    pub source_id: SourceId,

    /// URL the content was crawled from.
    pub url: String,

    /// SHA-256 hex digest of the current body text.
    pub content_hash: String,

    /// Structured payload: body text plus crawl metadata.
    pub content: sqlx::types::Json<serde_json::Value>,

    /// Correlation ID of the crawl job that produced the content.
    pub crawl_job_id: Option<String>,

    /// When the document was first seen.
    pub created_at: DateTime<Utc>,

    /// When the content last changed.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Structured content as a plain JSON value.
    pub fn content(&self) -> &serde_json::Value {
        &self.content.0
    }
}

/// Fields for inserting or updating a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Deterministic document identity.
    pub doc_key: DocKey,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Crawl source.
    pub source_id: SourceId,
    /// Page URL.
    pub url: String,
    /// SHA-256 hex digest of the body text.
    pub content_hash: String,
    /// Structured payload.
    pub content: serde_json::Value,
    /// Optional crawl correlation ID.
    pub crawl_job_id: Option<String>,
}

/// A pending (or settled) hand-off of a document to the downstream indexer.
///
/// Written in the same transaction as the document change it belongs to, so
/// an accepted change can never exist without its indexing marker. At most
/// one row exists per [`DocKey`]; re-enqueueing refreshes the row in place
/// and resets it to pending.
///
/// # Stale claims
///
/// Status transitions are guarded on `content_hash`. A worker that claimed
/// the job before a newer document write landed cannot settle the refreshed
/// row, because its remembered hash no longer matches.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IndexJob {
    /// Storage-assigned row ID.
    pub id: i64,

    /// Document this job indexes.
    pub doc_key: DocKey,

    /// Tenant that owns the document.
    pub tenant_id: TenantId,

    /// Crawl source the document came from.
    pub source_id: SourceId,

    /// Page URL.
    pub url: String,

    /// Hash of the body carried by this job.
    pub content_hash: String,

    /// Body text to index.
    pub body: String,

    /// Document metadata forwarded alongside the body.
    pub doc_metadata: sqlx::types::Json<serde_json::Value>,

    /// Correlation ID of the originating crawl job.
    pub crawl_job_id: Option<String>,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Completed delivery attempts so far.
    pub attempts: i32,

    /// Earliest time the next attempt may run.
    pub next_attempt_at: DateTime<Utc>,

    /// Error message from the most recent failed attempt.
    pub last_error: Option<String>,

    /// When the job was first enqueued.
    pub created_at: DateTime<Utc>,

    /// When the job last changed.
    pub updated_at: DateTime<Utc>,
}

impl IndexJob {
    /// Metadata as a plain JSON value.
    pub fn metadata(&self) -> &serde_json::Value {
        &self.doc_metadata.0
    }
}

/// Fields for enqueueing an index job.
#[derive(Debug, Clone)]
pub struct NewIndexJob {
    /// Document this job indexes.
    pub doc_key: DocKey,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Crawl source.
    pub source_id: SourceId,
    /// Page URL.
    pub url: String,
    /// Hash of the body carried by this job.
    pub content_hash: String,
    /// Body text to index.
    pub body: String,
    /// Document metadata forwarded alongside the body.
    pub doc_metadata: serde_json::Value,
    /// Optional crawl correlation ID.
    pub crawl_job_id: Option<String>,
}
