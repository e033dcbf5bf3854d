//! Webhook envelope parsing and document extraction.
//!
//! The crawl service posts a loose JSON envelope: an event id, an event
//! type tag, an optional array of document records, and a metadata object
//! for tenant routing. Parsing happens only after signature verification,
//! and document fields are pulled out of the records through fixed-priority
//! strategy tables because the record shape varies by event type.

use serde::Deserialize;
use serde_json::Value;

/// Event types that carry embedded document records.
///
/// Every other type (`crawl.started`, `crawl.completed`, `crawl.failed`,
/// ...) is recorded for audit but triggers no document work.
pub const DOCUMENT_EVENT_TYPES: [&str; 3] = ["crawl.page", "batch.page", "scrape.completed"];

/// Body text strategies, tried in order. First non-empty string wins.
const BODY_FIELDS: [&str; 2] = ["markdown", "content"];

/// Source URL strategies, tried in order. A `metadata.` prefix selects a
/// field of the record's own metadata object.
const URL_FIELDS: [&str; 3] = ["metadata.source_url", "source_url", "url"];

/// Envelope parsing failures. Both map to HTTP 400 `malformed_payload`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Body is not valid JSON or does not match the envelope shape.
    #[error("invalid envelope: {0}")]
    Json(String),

    /// A required field is absent or empty.
    #[error("missing or empty required field: {0}")]
    MissingField(&'static str),
}

/// A decoded webhook envelope.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    /// Sender-assigned event id.
    pub id: String,
    /// Event type tag, e.g. `crawl.page`.
    pub event_type: String,
    /// Document records carried by document-bearing events.
    pub data: Vec<Value>,
    /// String-keyed envelope metadata (tenant mapping, correlation ids).
    pub metadata: serde_json::Map<String, Value>,
    /// Full decoded payload, persisted verbatim with the event row.
    pub raw: Value,
}

#[derive(Deserialize)]
struct WireEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    metadata: serde_json::Map<String, Value>,
}

impl WebhookEnvelope {
    /// Parses verified raw bytes into an envelope.
    ///
    /// # Errors
    ///
    /// Returns `EnvelopeError::Json` when the bytes are not a JSON object
    /// of the expected shape, and `EnvelopeError::MissingField` when `id`
    /// or `type` is empty.
    pub fn parse(body: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: Value =
            serde_json::from_slice(body).map_err(|e| EnvelopeError::Json(e.to_string()))?;
        let wire: WireEnvelope =
            serde_json::from_value(raw.clone()).map_err(|e| EnvelopeError::Json(e.to_string()))?;

        if wire.id.is_empty() {
            return Err(EnvelopeError::MissingField("id"));
        }
        if wire.event_type.is_empty() {
            return Err(EnvelopeError::MissingField("type"));
        }

        Ok(Self {
            id: wire.id,
            event_type: wire.event_type,
            data: wire.data,
            metadata: wire.metadata,
            raw,
        })
    }

    /// True when this event type embeds document records.
    pub fn is_document_bearing(&self) -> bool {
        DOCUMENT_EVENT_TYPES.contains(&self.event_type.as_str())
    }

    /// Returns a metadata value when it is a non-empty string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Body text and source URL pulled out of one document record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// Text to hash and index.
    pub body: String,
    /// URL the page was crawled from.
    pub url: String,
}

/// Extracts body text and source URL from a raw document record.
///
/// Strategies run in declared order and the first non-empty string wins;
/// empty strings and non-string values fall through to the next strategy.
/// Returns `None` when either value is absent, which callers treat as a
/// malformed record to skip, not an error.
pub fn extract_document(record: &Value) -> Option<ExtractedDocument> {
    let body = first_non_empty(record, &BODY_FIELDS)?;
    let url = first_non_empty(record, &URL_FIELDS)?;

    Some(ExtractedDocument { body: body.to_string(), url: url.to_string() })
}

/// Runs a strategy table against a record, returning the first hit.
fn first_non_empty<'a>(record: &'a Value, strategies: &[&str]) -> Option<&'a str> {
    strategies.iter().find_map(|path| lookup_str(record, path))
}

fn lookup_str<'a>(record: &'a Value, path: &str) -> Option<&'a str> {
    let value = match path.split_once('.') {
        Some((outer, inner)) => record.get(outer)?.get(inner)?,
        None => record.get(path)?,
    };

    value.as_str().filter(|s| !s.is_empty())
}
