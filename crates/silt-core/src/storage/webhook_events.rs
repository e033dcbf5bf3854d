//! Repository for the webhook event dedup ledger.
//!
//! Provides type-safe access to received webhook deliveries. The table's
//! UNIQUE(event_id, event_type) constraint is the dedup mechanism: callers
//! insert unconditionally and branch on the reported outcome instead of
//! checking for an existing row first.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    error::Result,
    models::{EventId, NewWebhookEvent, WebhookEvent},
};

/// Outcome of recording a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First delivery of this `(event_id, event_type)` pair.
    Created {
        /// Storage-assigned row ID of the new event.
        id: i64,
    },

    /// The pair was already recorded; the constraint rejected the insert.
    Duplicate,
}

/// Repository for webhook event database operations.
///
/// Handles all database interactions for the dedup ledger. Rows are written
/// once and never mutated.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }

    /// Records a webhook delivery, deduplicating on `(event_id, event_type)`.
    ///
    /// The insert races safely with concurrent duplicate deliveries: exactly
    /// one caller observes `Created`, every other observes `Duplicate`.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails for any reason other than the
    /// uniqueness constraint.
    pub async fn insert(&self, event: &NewWebhookEvent) -> Result<InsertOutcome> {
        let now = Utc::now();

        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO webhook_events (
                event_id, event_type, signature, body_digest, payload, received_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id
            "#,
        )
        .bind(&event.event_id.0)
        .bind(&event.event_type)
        .bind(&event.signature)
        .bind(&event.body_digest)
        .bind(sqlx::types::Json(&event.payload))
        .bind(now)
        .fetch_one(&*self.pool)
        .await;

        match result {
            Ok(id) => Ok(InsertOutcome::Created { id }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::Duplicate)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Finds a recorded delivery by its dedup pair.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find(
        &self,
        event_id: &EventId,
        event_type: &str,
    ) -> Result<Option<WebhookEvent>> {
        let event = sqlx::query_as::<_, WebhookEvent>(
            r#"
            SELECT id, event_id, event_type, signature, body_digest, payload, received_at
            FROM webhook_events
            WHERE event_id = ?1 AND event_type = ?2
            "#,
        )
        .bind(&event_id.0)
        .bind(event_type)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Counts all recorded deliveries.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM webhook_events
            "#,
        )
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::storage::run_migrations;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    fn sample_event(event_id: &str, event_type: &str) -> NewWebhookEvent {
        NewWebhookEvent {
            event_id: EventId::new(event_id),
            event_type: event_type.to_string(),
            signature: Some("sha256=abc123".to_string()),
            body_digest: "d".repeat(64),
            payload: json!({"id": event_id, "type": event_type}),
        }
    }

    #[tokio::test]
    async fn insert_creates_then_detects_duplicate() {
        let repo = Repository::new(Arc::new(test_pool().await));
        let event = sample_event("evt-1", "crawl.page");

        let first = repo.insert(&event).await.expect("first insert");
        assert!(matches!(first, InsertOutcome::Created { .. }));

        let second = repo.insert(&event).await.expect("second insert");
        assert_eq!(second, InsertOutcome::Duplicate);

        assert_eq!(repo.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn same_event_id_with_different_type_is_not_a_duplicate() {
        let repo = Repository::new(Arc::new(test_pool().await));

        let page = repo.insert(&sample_event("evt-1", "crawl.page")).await.expect("page");
        let done = repo.insert(&sample_event("evt-1", "crawl.completed")).await.expect("done");

        assert!(matches!(page, InsertOutcome::Created { .. }));
        assert!(matches!(done, InsertOutcome::Created { .. }));
        assert_eq!(repo.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn find_round_trips_stored_fields() {
        let repo = Repository::new(Arc::new(test_pool().await));
        let event = sample_event("evt-9", "crawl.page");
        repo.insert(&event).await.expect("insert");

        let found = repo
            .find(&EventId::new("evt-9"), "crawl.page")
            .await
            .expect("find")
            .expect("event exists");

        assert_eq!(found.event_id, EventId::new("evt-9"));
        assert_eq!(found.event_type, "crawl.page");
        assert_eq!(found.signature.as_deref(), Some("sha256=abc123"));
        assert_eq!(found.payload()["type"], "crawl.page");

        let missing = repo.find(&EventId::new("evt-9"), "batch.page").await.expect("find");
        assert!(missing.is_none());
    }
}
