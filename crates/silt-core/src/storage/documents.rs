//! Repository for document content and change detection.
//!
//! Documents are keyed by the deterministic [`DocKey`] with one live row per
//! key. Writes are optimistic: inserts absorb key races through the unique
//! constraint, and updates are conditional on the content hash the caller
//! previously read. Both report whether they won so the caller can retry.

use std::sync::Arc;

use chrono::Utc;
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};

use crate::{
    error::Result,
    models::{DocKey, Document, NewDocument, TenantId},
};

/// Repository for document database operations.
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

    /// Finds a document by its key.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_key(&self, doc_key: &DocKey) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, doc_key, tenant_id, source_id, url, content_hash, content,
                   crawl_job_id, created_at, updated_at
            FROM documents
            WHERE doc_key = ?1
            "#,
        )
        .bind(&doc_key.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(doc)
    }

    /// Creates a new document row.
    ///
    /// Returns `false` when a row for the key already exists, which happens
    /// when a concurrent writer inserted the same key first. The caller
    /// re-reads and retries in that case.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails for any reason other than the
    /// uniqueness constraint.
    pub async fn create(&self, doc: &NewDocument) -> Result<bool> {
        self.create_impl(&*self.pool, doc).await
    }

    /// Creates a document within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        doc: &NewDocument,
    ) -> Result<bool> {
        self.create_impl(&mut **tx, doc).await
    }

    /// Private helper for creating documents with generic executor.
    async fn create_impl<'e, E>(&self, executor: E, doc: &NewDocument) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO documents (
                doc_key, tenant_id, source_id, url, content_hash, content,
                crawl_job_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
        )
        .bind(&doc.doc_key.0)
        .bind(&doc.tenant_id.0)
        .bind(&doc.source_id.0)
        .bind(&doc.url)
        .bind(&doc.content_hash)
        .bind(sqlx::types::Json(&doc.content))
        .bind(&doc.crawl_job_id)
        .bind(now)
        .execute(executor)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces a document's content, conditional on the hash the caller
    /// previously read.
    ///
    /// Returns `false` when zero rows matched, meaning a concurrent writer
    /// changed the row since the read. The caller re-reads and retries.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn update_content(&self, doc: &NewDocument, expected_hash: &str) -> Result<bool> {
        self.update_content_impl(&*self.pool, doc, expected_hash).await
    }

    /// Replaces a document's content within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn update_content_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        doc: &NewDocument,
        expected_hash: &str,
    ) -> Result<bool> {
        self.update_content_impl(&mut **tx, doc, expected_hash).await
    }

    /// Private helper for conditional content updates with generic executor.
    async fn update_content_impl<'e, E>(
        &self,
        executor: E,
        doc: &NewDocument,
        expected_hash: &str,
    ) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET content_hash = ?1,
                content = ?2,
                crawl_job_id = ?3,
                updated_at = ?4
            WHERE doc_key = ?5 AND content_hash = ?6
            "#,
        )
        .bind(&doc.content_hash)
        .bind(sqlx::types::Json(&doc.content))
        .bind(&doc.crawl_job_id)
        .bind(now)
        .bind(&doc.doc_key.0)
        .bind(expected_hash)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Finds all documents for a tenant.
    ///
    /// Returns documents ordered by `updated_at` descending (newest first).
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_tenant(
        &self,
        tenant_id: &TenantId,
        limit: Option<i64>,
    ) -> Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, doc_key, tenant_id, source_id, url, content_hash, content,
                   crawl_job_id, created_at, updated_at
            FROM documents
            WHERE tenant_id = ?1
            ORDER BY updated_at DESC
            LIMIT ?2
            "#,
        )
        .bind(&tenant_id.0)
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(docs)
    }

    /// Counts all documents.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM documents
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
    use crate::{
        models::{sha256_hex, SourceId},
        storage::run_migrations,
    };

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

    fn sample_doc(url: &str, body: &str) -> NewDocument {
        let tenant_id = TenantId::new("acme");
        let source_id = SourceId::new("site1");
        NewDocument {
            doc_key: DocKey::derive(&tenant_id, &source_id, url),
            tenant_id,
            source_id,
            url: url.to_string(),
            content_hash: sha256_hex(body.as_bytes()),
            content: json!({"content": {"markdown": body}}),
            crawl_job_id: Some("job-1".to_string()),
        }
    }

    #[tokio::test]
    async fn create_then_find_round_trips() {
        let repo = Repository::new(Arc::new(test_pool().await));
        let doc = sample_doc("https://x/a", "# Hi");

        assert!(repo.create(&doc).await.expect("create"));

        let found =
            repo.find_by_key(&doc.doc_key).await.expect("find").expect("document exists");
        assert_eq!(found.doc_key, doc.doc_key);
        assert_eq!(found.url, "https://x/a");
        assert_eq!(found.content_hash, doc.content_hash);
        assert_eq!(found.content()["content"]["markdown"], "# Hi");
        assert_eq!(found.created_at, found.updated_at);
    }

    #[tokio::test]
    async fn create_reports_existing_key() {
        let repo = Repository::new(Arc::new(test_pool().await));
        let doc = sample_doc("https://x/a", "# Hi");

        assert!(repo.create(&doc).await.expect("first create"));
        assert!(!repo.create(&doc).await.expect("second create"));
        assert_eq!(repo.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn update_content_applies_when_hash_matches() {
        let repo = Repository::new(Arc::new(test_pool().await));
        let original = sample_doc("https://x/a", "# Hi");
        repo.create(&original).await.expect("create");

        let revised = sample_doc("https://x/a", "# Hi v2");
        let won = repo
            .update_content(&revised, &original.content_hash)
            .await
            .expect("update");
        assert!(won);

        let found =
            repo.find_by_key(&original.doc_key).await.expect("find").expect("document exists");
        assert_eq!(found.content_hash, revised.content_hash);
        assert_eq!(found.content()["content"]["markdown"], "# Hi v2");
        assert!(found.updated_at >= found.created_at);
    }

    #[tokio::test]
    async fn update_content_skips_when_hash_is_stale() {
        let repo = Repository::new(Arc::new(test_pool().await));
        let original = sample_doc("https://x/a", "# Hi");
        repo.create(&original).await.expect("create");

        let revised = sample_doc("https://x/a", "# Hi v2");
        let stale_hash = sha256_hex(b"some other body");
        let won = repo.update_content(&revised, &stale_hash).await.expect("update");
        assert!(!won);

        // Row untouched
        let found =
            repo.find_by_key(&original.doc_key).await.expect("find").expect("document exists");
        assert_eq!(found.content_hash, original.content_hash);
    }

    #[tokio::test]
    async fn find_by_tenant_returns_only_that_tenant() {
        let repo = Repository::new(Arc::new(test_pool().await));
        repo.create(&sample_doc("https://x/a", "# A")).await.expect("create a");
        repo.create(&sample_doc("https://x/b", "# B")).await.expect("create b");

        let mut other = sample_doc("https://x/a", "# A");
        other.tenant_id = TenantId::new("globex");
        other.doc_key = DocKey::derive(&other.tenant_id, &other.source_id, &other.url);
        repo.create(&other).await.expect("create other");

        let docs = repo.find_by_tenant(&TenantId::new("acme"), None).await.expect("find");
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.tenant_id == TenantId::new("acme")));
    }
}
