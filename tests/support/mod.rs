//! Shared test environment for integration tests.
//!
//! Builds the full application router over an in-memory SQLite database
//! and drives it with `tower::ServiceExt::oneshot`, so each test runs the
//! real ingestion path without binding a socket.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use silt_api::{crypto, AppState, Config};
use silt_core::{run_migrations, Storage};
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

/// Webhook secret every test environment is configured with.
pub const TEST_SECRET: &str = "test-webhook-secret";

/// Ingestion endpoint path.
pub const INGEST_PATH: &str = "/v1/hooks/crawl-ingest";

/// A fully wired application over in-memory storage.
pub struct TestEnv {
    pub router: Router,
    pub storage: Arc<Storage>,
    pub config: Arc<Config>,
}

impl TestEnv {
    /// Creates a fresh environment with migrated in-memory storage.
    pub async fn new() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory database should connect");
        run_migrations(&pool).await.expect("migrations should apply");

        let storage = Arc::new(Storage::new(pool));
        let config = Arc::new(Config {
            webhook_secret: TEST_SECRET.to_string(),
            ..Config::default()
        });
        let state = AppState { storage: storage.clone(), config: config.clone() };

        Self { router: silt_api::create_router(state), storage, config }
    }

    /// Signs a payload the way a legitimate sender would.
    pub fn sign(&self, body: &[u8]) -> String {
        format!("sha256={}", crypto::generate_signature(TEST_SECRET, body))
    }

    /// Posts a correctly signed delivery to the ingestion endpoint.
    pub async fn post_signed(&self, body: &str) -> (StatusCode, Value) {
        let signature = self.sign(body.as_bytes());
        self.post_with_signature(body, Some(&signature)).await
    }

    /// Posts a delivery with an explicit (or absent) signature header.
    pub async fn post_with_signature(
        &self,
        body: &str,
        signature: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(INGEST_PATH)
            .header("content-type", "application/json");

        if let Some(signature) = signature {
            builder = builder.header("x-crawl-signature", signature);
        }

        let request = builder.body(Body::from(body.to_string())).expect("request should build");
        self.send(request).await
    }

    /// Sends a GET request to the given path.
    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let request =
            Request::builder().uri(path).body(Body::empty()).expect("request should build");
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router should produce a response");
        let status = response.status();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body should be JSON")
        };

        (status, value)
    }
}
