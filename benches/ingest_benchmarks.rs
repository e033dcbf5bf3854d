//! Performance benchmarks for the ingestion hot path.
//!
//! Tracks the request-path costs that bound ingestion latency: signature
//! verification, envelope decoding, content hashing, and the storage
//! writes behind dedup and change detection.

use std::{hint::black_box, time::Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use silt_api::{
    crypto::{generate_signature, verify_signature},
    envelope::{extract_document, WebhookEnvelope},
};
use silt_core::{
    run_migrations, sha256_hex, DocKey, EventId, NewDocument, NewIndexJob, NewWebhookEvent,
    SourceId, Storage, TenantId,
};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::runtime::Runtime;

const SECRET: &str = "bench-webhook-secret";

/// Benchmarks HMAC verification across payload sizes.
fn bench_signature_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto");

    for payload_size in [128, 1024, 16384] {
        let body = make_body(payload_size);
        let header = format!("sha256={}", generate_signature(SECRET, &body));

        group.throughput(criterion::Throughput::Bytes(payload_size as u64));
        group.bench_with_input(
            BenchmarkId::new("verify_signature", payload_size),
            &payload_size,
            |b, _| {
                b.iter(|| {
                    verify_signature(black_box(SECRET), Some(black_box(header.as_str())), &body)
                        .expect("signature should verify")
                });
            },
        );
    }

    group.bench_function("generate_signature_1k", |b| {
        let body = make_body(1024);
        b.iter(|| generate_signature(black_box(SECRET), black_box(&body)));
    });

    group.finish();
}

/// Benchmarks content hashing, the per-document change detection cost.
fn bench_content_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");

    for payload_size in [1024, 65536] {
        let body = make_body(payload_size);

        group.throughput(criterion::Throughput::Bytes(payload_size as u64));
        group.bench_with_input(
            BenchmarkId::new("sha256_hex", payload_size),
            &payload_size,
            |b, _| {
                b.iter(|| sha256_hex(black_box(&body)));
            },
        );
    }

    group.bench_function("doc_key_derive", |b| {
        let tenant = TenantId::new("acme");
        let source = SourceId::new("site1");
        b.iter(|| DocKey::derive(black_box(&tenant), black_box(&source), "https://x/a"));
    });

    group.finish();
}

/// Benchmarks envelope decoding and document extraction.
fn bench_envelope_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    let payload = json!({
        "id": "evt-bench",
        "type": "crawl.page",
        "data": [{
            "markdown": String::from_utf8(make_body(2048)).unwrap(),
            "url": "https://example.com/page",
            "metadata": {"source_url": "https://example.com/page", "status_code": 200}
        }],
        "metadata": {"tenant_id": "acme", "source_id": "site1", "crawl_job_id": "job-1"}
    })
    .to_string();
    let bytes = payload.as_bytes().to_vec();

    group.bench_function("parse_envelope", |b| {
        b.iter(|| WebhookEnvelope::parse(black_box(&bytes)).expect("envelope should parse"));
    });

    group.bench_function("extract_document", |b| {
        let envelope = WebhookEnvelope::parse(&bytes).expect("envelope should parse");
        b.iter(|| extract_document(black_box(&envelope.data[0])).expect("record should extract"));
    });

    group.finish();
}

/// Benchmarks the storage operations on the ingestion path.
fn bench_storage_operations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("storage");
    group.sample_size(50);

    // Duplicate detection, the redelivery fast path
    group.bench_function("event_dedup_hit", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let storage = bench_storage().await;
                let event = make_event("evt-1");
                storage.webhook_events.insert(&event).await.unwrap();

                let start = Instant::now();
                for _ in 0..iters {
                    storage.webhook_events.insert(&event).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    // First-seen event insert
    group.bench_function("event_insert", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let storage = bench_storage().await;
                let events: Vec<_> =
                    (0..iters).map(|i| make_event(&format!("evt-{i}"))).collect();

                let start = Instant::now();
                for event in &events {
                    storage.webhook_events.insert(event).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    // Changed-content write: document update plus outbox enqueue in one tx
    group.bench_function("document_update_with_outbox", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let storage = bench_storage().await;
                let pool = storage.pool();
                seed_document(&storage, 0).await;

                let start = Instant::now();
                for i in 1..=iters {
                    let (doc, job) = make_document(i);
                    let current = storage
                        .documents
                        .find_by_key(&doc.doc_key)
                        .await
                        .unwrap()
                        .expect("seeded document");

                    let mut tx = pool.begin().await.unwrap();
                    storage
                        .documents
                        .update_content_in_tx(&mut tx, &doc, &current.content_hash)
                        .await
                        .unwrap();
                    storage.index_jobs.enqueue_in_tx(&mut tx, &job).await.unwrap();
                    tx.commit().await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    // Worker-side batch claim
    group.bench_function("claim_due_batch", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let storage = bench_storage().await;
                for i in 0..1000 {
                    let (_, job) = make_document_at(i, &format!("https://x/{i}"));
                    storage.index_jobs.enqueue(&job).await.unwrap();
                }

                let start = Instant::now();
                for _ in 0..iters {
                    storage.index_jobs.claim_due(10).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

// Helper functions

fn make_body(size: usize) -> Vec<u8> {
    (0..size).map(|i| b'a' + (i % 26) as u8).collect()
}

fn make_event(event_id: &str) -> NewWebhookEvent {
    let payload = json!({"id": event_id, "type": "crawl.page"});

    NewWebhookEvent {
        event_id: EventId::new(event_id),
        event_type: "crawl.page".to_string(),
        signature: Some("sha256=feedbeef".to_string()),
        body_digest: sha256_hex(payload.to_string().as_bytes()),
        payload,
    }
}

fn make_document(revision: u64) -> (NewDocument, NewIndexJob) {
    make_document_at(revision, "https://x/a")
}

fn make_document_at(revision: u64, url: &str) -> (NewDocument, NewIndexJob) {
    let tenant_id = TenantId::new("acme");
    let source_id = SourceId::new("site1");
    let doc_key = DocKey::derive(&tenant_id, &source_id, url);
    let body = format!("# revision {revision}");
    let content_hash = sha256_hex(body.as_bytes());

    let doc = NewDocument {
        doc_key: doc_key.clone(),
        tenant_id: tenant_id.clone(),
        source_id: source_id.clone(),
        url: url.to_string(),
        content_hash: content_hash.clone(),
        content: json!({"content": {"markdown": body}}),
        crawl_job_id: Some("job-1".to_string()),
    };

    let job = NewIndexJob {
        doc_key,
        tenant_id,
        source_id,
        url: url.to_string(),
        content_hash,
        body,
        doc_metadata: json!({"crawler": {}}),
        crawl_job_id: Some("job-1".to_string()),
    };

    (doc, job)
}

async fn bench_storage() -> Storage {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database should connect");
    run_migrations(&pool).await.expect("migrations should apply");
    Storage::new(pool)
}

async fn seed_document(storage: &Storage, revision: u64) {
    let (doc, _) = make_document(revision);
    storage.documents.create(&doc).await.expect("seed insert should succeed");
}

criterion_group!(
    benches,
    bench_signature_verification,
    bench_content_hashing,
    bench_envelope_decoding,
    bench_storage_operations
);

criterion_main!(benches);
