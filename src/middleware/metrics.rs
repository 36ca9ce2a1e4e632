use actix_web::{HttpResponse, Result};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, GaugeVec, HistogramVec, Registry,
    TextEncoder,
};
use std::time::Duration;

static METRICS_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static BATCHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec_with_registry!(
        "ingest_batches_total",
        "Import batches by terminal outcome",
        &["outcome"],
        METRICS_REGISTRY.clone()
    )
    .expect("failed to create ingest_batches_total")
});

static RECORDS_PROCESSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec_with_registry!(
        "ingest_records_processed_total",
        "Records landed or skipped, by element kind and outcome",
        &["kind", "outcome"],
        METRICS_REGISTRY.clone()
    )
    .expect("failed to create ingest_records_processed_total")
});

static BATCH_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec_with_registry!(
        "ingest_batch_duration_seconds",
        "Wall-clock duration of a full ingestion run",
        &["outcome"],
        vec![0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 1800.0, 3600.0],
        METRICS_REGISTRY.clone()
    )
    .expect("failed to create ingest_batch_duration_seconds")
});

static QUEUE_DEPTH: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec_with_registry!(
        "ingest_queue_depth",
        "Payloads currently buffered between producer and consumers",
        &["batch_id"],
        METRICS_REGISTRY.clone()
    )
    .expect("failed to create ingest_queue_depth")
});

static DB_CONNECTIONS_ACTIVE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec_with_registry!(
        "ingest_db_connections",
        "Database pool size split by active/idle",
        &["state"],
        METRICS_REGISTRY.clone()
    )
    .expect("failed to create ingest_db_connections")
});

/// Thin facade over the process-wide Prometheus registry, matching the
/// existing call-site style (`Metrics::record_x(...)`) without exposing the
/// `Lazy` statics themselves.
pub struct Metrics;

impl Metrics {
    pub fn record_batch_completed(outcome: &str, duration: Duration) {
        BATCHES_TOTAL.with_label_values(&[outcome]).inc();
        BATCH_DURATION_SECONDS
            .with_label_values(&[outcome])
            .observe(duration.as_secs_f64());
    }

    pub fn record_records(kind: &str, outcome: &str, count: u64) {
        RECORDS_PROCESSED_TOTAL
            .with_label_values(&[kind, outcome])
            .inc_by(count as f64);
    }

    pub fn set_queue_depth(batch_id: &str, depth: usize) {
        QUEUE_DEPTH
            .with_label_values(&[batch_id])
            .set(depth as f64);
    }

    pub fn update_db_connection_metrics(active: u64, idle: u64) {
        DB_CONNECTIONS_ACTIVE
            .with_label_values(&["active"])
            .set(active as f64);
        DB_CONNECTIONS_ACTIVE
            .with_label_values(&["idle"])
            .set(idle as f64);
    }
}

/// `/metrics` handler exposing the registry in the Prometheus text format.
pub async fn metrics_handler() -> Result<HttpResponse> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return Ok(HttpResponse::InternalServerError().finish());
    }
    Ok(HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer))
}
