//! Crawl webhook ingestion handler.
//!
//! Accepts signed deliveries from the crawl service, verifies and records
//! them idempotently, applies per-document change detection, and enqueues
//! changed documents on the indexing outbox. The document write and its
//! outbox job commit in one transaction.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use silt_core::{
    sha256_hex, storage::webhook_events::InsertOutcome, CoreError, DocKey, EventId, NewDocument,
    NewIndexJob, NewWebhookEvent, Result, SourceId, TenantId,
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    crypto::{verify_signature, SignatureError, SIGNATURE_HEADER},
    envelope::{extract_document, EnvelopeError, ExtractedDocument, WebhookEnvelope},
    AppState,
};

/// Bound on optimistic-concurrency retries for one document.
const MAX_UPSERT_ATTEMPTS: u32 = 3;

/// Success response for an accepted delivery.
///
/// Three shapes share this struct: full processing carries the document
/// counters, recorded-only events carry neither, and duplicate deliveries
/// carry `deduped` instead.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Always true; failures use `ErrorResponse` instead.
    pub ok: bool,
    /// Present and true when this delivery was already recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduped: Option<bool>,
    /// Sender-assigned event id.
    pub event_id: String,
    /// Event type tag.
    pub event_type: String,
    /// Documents inserted or updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
    /// Documents skipped because their content was unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_unchanged: Option<usize>,
}

impl IngestResponse {
    fn deduped(envelope: &WebhookEnvelope) -> Self {
        Self {
            ok: true,
            deduped: Some(true),
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            processed: None,
            skipped_unchanged: None,
        }
    }

    fn recorded(envelope: &WebhookEnvelope) -> Self {
        Self {
            ok: true,
            deduped: None,
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            processed: None,
            skipped_unchanged: None,
        }
    }

    fn processed(envelope: &WebhookEnvelope, outcome: &BatchOutcome) -> Self {
        Self {
            ok: true,
            deduped: None,
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            processed: Some(outcome.processed),
            skipped_unchanged: Some(outcome.skipped_unchanged),
        }
    }
}

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// Request-path failures for webhook ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Signature verification failed; nothing was recorded.
    #[error(transparent)]
    Signature(SignatureError),

    /// Body failed envelope validation; nothing was recorded.
    #[error(transparent)]
    MalformedPayload(EnvelopeError),

    /// Document-bearing event without tenant/source metadata. The event
    /// row is already recorded and stays recorded.
    #[error("envelope metadata must carry non-empty tenant_id and source_id")]
    MissingTenantMapping,

    /// Storage failure, including upsert retry exhaustion.
    #[error(transparent)]
    Storage(CoreError),
}

impl IngestError {
    /// Machine-readable code used in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Signature(e) => e.code(),
            Self::MalformedPayload(_) => "malformed_payload",
            Self::MissingTenantMapping => "missing_tenant_mapping",
            Self::Storage(_) => "storage_error",
        }
    }
}

/// Outcome counters for one delivery's document batch.
struct BatchOutcome {
    processed: usize,
    skipped_unchanged: usize,
}

/// Result of one document upsert.
enum DocumentOutcome {
    /// Row inserted or updated; an outbox job is enqueued.
    Written,
    /// Stored content hash matched; nothing written.
    Unchanged,
}

/// Ingests a signed crawl webhook delivery.
///
/// Verifies the signature over the raw bytes, records the event with
/// storage-enforced dedup, and for document-bearing event types upserts
/// each extracted document with change detection, enqueueing changed
/// documents for downstream indexing.
///
/// # Errors
///
/// Returns appropriate HTTP status codes:
/// - 401: Signature missing, malformed, unsupported, or mismatched
/// - 400: Body is not a valid envelope
/// - 422: Document event without tenant/source metadata
/// - 500: Storage failures, including concurrent-update retry exhaustion
#[instrument(
    name = "ingest_webhook",
    skip(state, headers, body),
    fields(content_length = body.len())
)]
#[allow(clippy::too_many_lines)]
pub async fn ingest_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!("Processing crawl webhook delivery");

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    if let Err(e) = verify_signature(&state.config.webhook_secret, signature, &body) {
        warn!(code = e.code(), "Rejected delivery with invalid signature");
        return create_error_response(StatusCode::UNAUTHORIZED, &IngestError::Signature(e));
    }

    let envelope = match WebhookEnvelope::parse(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Rejected delivery with malformed envelope");
            return create_error_response(
                StatusCode::BAD_REQUEST,
                &IngestError::MalformedPayload(e),
            );
        },
    };

    debug!(event_id = %envelope.id, event_type = %envelope.event_type, "Envelope verified");

    let event = NewWebhookEvent {
        event_id: EventId::new(envelope.id.clone()),
        event_type: envelope.event_type.clone(),
        signature: signature.map(ToString::to_string),
        body_digest: sha256_hex(&body),
        payload: envelope.raw.clone(),
    };

    match state.storage.webhook_events.insert(&event).await {
        Ok(InsertOutcome::Created { id }) => {
            debug!(event_row_id = id, "Webhook event recorded");
        },
        Ok(InsertOutcome::Duplicate) => {
            info!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                "Duplicate delivery, skipping document work"
            );
            return (StatusCode::OK, Json(IngestResponse::deduped(&envelope))).into_response();
        },
        Err(e) => {
            error!(error = %e, "Failed to record webhook event");
            return create_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &IngestError::Storage(e),
            );
        },
    }

    if !envelope.is_document_bearing() {
        info!(
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            "Event recorded, no document payload"
        );
        return (StatusCode::OK, Json(IngestResponse::recorded(&envelope))).into_response();
    }

    let Some((tenant_id, source_id)) = resolve_tenant(&envelope) else {
        warn!(event_id = %envelope.id, "Document event without tenant/source mapping");
        return create_error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &IngestError::MissingTenantMapping,
        );
    };

    let crawl_job_id =
        envelope.metadata_str("crawl_job_id").unwrap_or(envelope.id.as_str()).to_string();

    debug!(
        tenant_id = %tenant_id,
        source_id = %source_id,
        crawl_job_id = %crawl_job_id,
        records = envelope.data.len(),
        "Processing document records"
    );

    match process_documents(&state, &envelope, &tenant_id, &source_id, &crawl_job_id).await {
        Ok(outcome) => {
            info!(
                event_id = %envelope.id,
                processed = outcome.processed,
                skipped_unchanged = outcome.skipped_unchanged,
                "Delivery processed"
            );
            (StatusCode::OK, Json(IngestResponse::processed(&envelope, &outcome))).into_response()
        },
        Err(e) => {
            error!(error = %e, "Failed to process document records");
            create_error_response(StatusCode::INTERNAL_SERVER_ERROR, &IngestError::Storage(e))
        },
    }
}

/// Resolves the tenant/source mapping from envelope metadata.
///
/// Both values must be present and non-empty; there is no default tenant.
fn resolve_tenant(envelope: &WebhookEnvelope) -> Option<(TenantId, SourceId)> {
    let tenant_id = envelope.metadata_str("tenant_id")?;
    let source_id = envelope.metadata_str("source_id")?;

    Some((TenantId::new(tenant_id), SourceId::new(source_id)))
}

/// Processes every document record in a delivery, in array order.
///
/// Records missing a body or URL are skipped without failing the batch.
/// Two records for the same URL resolve last-in-order-wins because each
/// upsert commits before the next record is read.
async fn process_documents(
    state: &AppState,
    envelope: &WebhookEnvelope,
    tenant_id: &TenantId,
    source_id: &SourceId,
    crawl_job_id: &str,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome { processed: 0, skipped_unchanged: 0 };

    for record in &envelope.data {
        let Some(extracted) = extract_document(record) else {
            debug!(event_id = %envelope.id, "Skipping record without body or url");
            continue;
        };

        let written =
            upsert_document(state, record, tenant_id, source_id, crawl_job_id, &extracted).await?;

        match written {
            DocumentOutcome::Written => outcome.processed += 1,
            DocumentOutcome::Unchanged => outcome.skipped_unchanged += 1,
        }
    }

    Ok(outcome)
}

/// Upserts one document with change detection.
///
/// Reads the current row, skips when the content hash is unchanged, and
/// otherwise writes the document and its outbox job in one transaction.
/// The update is conditional on the hash as read; losing that race re-reads
/// and retries up to [`MAX_UPSERT_ATTEMPTS`] times.
async fn upsert_document(
    state: &AppState,
    record: &Value,
    tenant_id: &TenantId,
    source_id: &SourceId,
    crawl_job_id: &str,
    extracted: &ExtractedDocument,
) -> Result<DocumentOutcome> {
    let doc_key = DocKey::derive(tenant_id, source_id, &extracted.url);
    let content_hash = sha256_hex(extracted.body.as_bytes());
    let doc_metadata = document_metadata(record);

    let doc = NewDocument {
        doc_key: doc_key.clone(),
        tenant_id: tenant_id.clone(),
        source_id: source_id.clone(),
        url: extracted.url.clone(),
        content_hash: content_hash.clone(),
        content: document_content(tenant_id, source_id, crawl_job_id, extracted, &doc_metadata),
        crawl_job_id: Some(crawl_job_id.to_string()),
    };

    let job = NewIndexJob {
        doc_key: doc_key.clone(),
        tenant_id: tenant_id.clone(),
        source_id: source_id.clone(),
        url: extracted.url.clone(),
        content_hash: content_hash.clone(),
        body: extracted.body.clone(),
        doc_metadata,
        crawl_job_id: Some(crawl_job_id.to_string()),
    };

    let pool = state.storage.pool();

    for attempt in 1..=MAX_UPSERT_ATTEMPTS {
        match state.storage.documents.find_by_key(&doc_key).await? {
            Some(current) if current.content_hash == content_hash => {
                debug!(doc_key = %doc_key, "Content unchanged, skipping document");
                return Ok(DocumentOutcome::Unchanged);
            },
            Some(current) => {
                let mut tx = pool.begin().await?;
                let updated = state
                    .storage
                    .documents
                    .update_content_in_tx(&mut tx, &doc, &current.content_hash)
                    .await?;

                if updated {
                    state.storage.index_jobs.enqueue_in_tx(&mut tx, &job).await?;
                    tx.commit().await?;
                    debug!(doc_key = %doc_key, "Document content updated");
                    return Ok(DocumentOutcome::Written);
                }

                tx.rollback().await?;
                debug!(doc_key = %doc_key, attempt, "Concurrent update detected, retrying");
            },
            None => {
                let mut tx = pool.begin().await?;
                let created = state.storage.documents.create_in_tx(&mut tx, &doc).await?;

                if created {
                    state.storage.index_jobs.enqueue_in_tx(&mut tx, &job).await?;
                    tx.commit().await?;
                    debug!(doc_key = %doc_key, "Document created");
                    return Ok(DocumentOutcome::Written);
                }

                tx.rollback().await?;
                debug!(doc_key = %doc_key, attempt, "Concurrent insert detected, retrying");
            },
        }
    }

    Err(CoreError::ConstraintViolation(format!(
        "document {doc_key} was modified concurrently on every upsert attempt"
    )))
}

/// Builds the structured content payload stored with a document.
fn document_content(
    tenant_id: &TenantId,
    source_id: &SourceId,
    crawl_job_id: &str,
    extracted: &ExtractedDocument,
    doc_metadata: &Value,
) -> Value {
    serde_json::json!({
        "tenant_id": tenant_id.as_str(),
        "source_id": source_id.as_str(),
        "crawl_job_id": crawl_job_id,
        "url": extracted.url,
        "content": {"markdown": extracted.body},
        "metadata": doc_metadata,
    })
}

/// Metadata forwarded with a document to the indexer.
///
/// Carries the crawler's own record metadata for debugging and future
/// ranking, plus the ingestion timestamp.
fn document_metadata(record: &Value) -> Value {
    let crawler = record.get("metadata").cloned().unwrap_or_else(|| serde_json::json!({}));

    serde_json::json!({
        "crawler": crawler,
        "received_at": Utc::now().to_rfc3339(),
    })
}

/// Creates a standardized error response.
fn create_error_response(status: StatusCode, error: &IngestError) -> Response {
    let error_response = ErrorResponse {
        error: ErrorDetail { code: error.code().to_string(), message: error.to_string() },
    };

    (status, Json(error_response)).into_response()
}
