//! Prometheus metrics for the trove server.
//!
//! Exposes counters for ingest, deduplication, resumable sessions and space
//! reclamation, plus gauges for the upload worker queue.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no user names, paths or hashes, only aggregate usage.
//! The endpoint MUST be network-restricted to authorized scrapers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Streaming ingest metrics
pub static UPLOADS_ACCEPTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_uploads_accepted_total",
        "Total number of streaming uploads accepted",
    )
    .expect("metric creation failed")
});

pub static BYTES_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_bytes_ingested_total",
        "Total bytes received by streaming and chunked uploads",
    )
    .expect("metric creation failed")
});

pub static DEDUP_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_dedup_hits_total",
        "Total number of uploads that reused an existing object",
    )
    .expect("metric creation failed")
});

pub static QUEUE_REJECTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_upload_queue_rejections_total",
        "Total number of uploads failed because the worker queue was full",
    )
    .expect("metric creation failed")
});

// Worker pool metrics
pub static WORKER_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_upload_worker_failures_total",
        "Total number of staged uploads the backend did not accept",
    )
    .expect("metric creation failed")
});

pub static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "trove_upload_queue_depth",
        "Upload jobs queued or in progress",
    )
    .expect("metric creation failed")
});

// Resumable session metrics
pub static SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_upload_sessions_created_total",
        "Total number of resumable upload sessions created",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_upload_sessions_completed_total",
        "Total number of resumable upload sessions assembled into files",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_CANCELLED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_upload_sessions_cancelled_total",
        "Total number of resumable upload sessions cancelled by their owner",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_upload_sessions_expired_total",
        "Total number of resumable upload sessions that expired",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_chunks_received_total",
        "Total number of chunk bodies written, retries included",
    )
    .expect("metric creation failed")
});

// Reclamation metrics
pub static OBJECTS_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_objects_reclaimed_total",
        "Total number of backend objects deleted after their last reference",
    )
    .expect("metric creation failed")
});

pub static BYTES_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_bytes_reclaimed_total",
        "Total bytes debited from quotas by permanent deletes",
    )
    .expect("metric creation failed")
});

// Sweeper metrics
pub static SWEEP_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("trove_sweep_errors_total", "Per-item errors during sweeps"),
        &["sweeper"],
    )
    .expect("metric creation failed")
});

pub static SWEEP_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "trove_sweep_duration_seconds",
            "Time taken by one retention or session sweep",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOADS_ACCEPTED.clone()),
            Box::new(BYTES_INGESTED.clone()),
            Box::new(DEDUP_HITS.clone()),
            Box::new(QUEUE_REJECTIONS.clone()),
            Box::new(WORKER_FAILURES.clone()),
            Box::new(QUEUE_DEPTH.clone()),
            Box::new(SESSIONS_CREATED.clone()),
            Box::new(SESSIONS_COMPLETED.clone()),
            Box::new(SESSIONS_CANCELLED.clone()),
            Box::new(SESSIONS_EXPIRED.clone()),
            Box::new(CHUNKS_RECEIVED.clone()),
            Box::new(OBJECTS_RECLAIMED.clone()),
            Box::new(BYTES_RECLAIMED.clone()),
            Box::new(SWEEP_ERRORS.clone()),
            Box::new(SWEEP_DURATION.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record a per-item sweep error.
pub fn record_sweep_error(sweeper: &str) {
    SWEEP_ERRORS.with_label_values(&[sweeper]).inc();
}
