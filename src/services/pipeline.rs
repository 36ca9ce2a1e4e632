//! Single producer, K consumers, one progress/cancellation task, joined by a
//! bounded channel of `BatchPayload` (component C5).
//!
//! The producer drives the element stream (C2/C3), resolves each element's
//! source via the registry (C4), and accumulates records into payloads of
//! up to `batch_size`. Consumers hand each payload to the batch writer (C6).
//! The monitor (C7) is driven separately against the same shared state by
//! `src/services/monitor.rs`; this module only owns the producer/consumer
//! half of the run.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::config::{LogContext, PipelineConfig};
use crate::error::{IngestError, IngestResult};
use crate::models::{ActivitySummary, CategoricalSample, QuantitativeSample, RoutePoint, Workout};
use crate::services::batch_writer::{write_payload, BatchPayload};
use crate::services::classifier::{ClassifiedElement, ElementStream, StreamItem};
use crate::services::source_registry::SourceRegistry;
use crate::log_with_context;

/// State shared between the producer, consumers, and the progress monitor.
pub struct PipelineShared {
    pub processed_count: AtomicU64,
    pub error_count: AtomicU64,
    pub skipped_count: AtomicU64,
    pub cancel_requested: AtomicBool,
    pub diagnostics: Mutex<Vec<String>>,
    pub max_diagnostics: usize,
}

impl PipelineShared {
    pub fn new(max_diagnostics: usize) -> Self {
        Self {
            processed_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            skipped_count: AtomicU64::new(0),
            cancel_requested: AtomicBool::new(false),
            diagnostics: Mutex::new(Vec::new()),
            max_diagnostics,
        }
    }

    pub fn record_diagnostic(&self, message: String) {
        let mut diagnostics = self.diagnostics.lock().unwrap();
        if diagnostics.len() < self.max_diagnostics {
            diagnostics.push(message);
        }
    }
}

enum Message {
    Payload(BatchPayload),
    Sentinel,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub processed_count: u64,
    pub error_count: u64,
    pub skipped_count: u64,
    pub diagnostics: Vec<String>,
    pub cancelled: bool,
}

/// Run the producer/consumer pipeline over `xml_path` to completion,
/// cancellation, or first fatal error.
pub async fn run_pipeline(
    pool: PgPool,
    config: Arc<PipelineConfig>,
    registry: Arc<SourceRegistry>,
    owner_id: Uuid,
    batch_id: Uuid,
    xml_path: &Path,
    shared: Arc<PipelineShared>,
) -> IngestResult<PipelineSummary> {
    let (tx, rx) = mpsc::channel::<Message>(config.queue_depth);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let producer_config = config.clone();
    let producer_path = xml_path.to_path_buf();
    let producer_registry = registry.clone();
    let producer_shared = shared.clone();
    let producer_tx = tx.clone();
    let consumer_count = config.consumer_count;

    let producer = tokio::spawn(async move {
        run_producer(
            producer_path,
            owner_id,
            batch_id,
            producer_config,
            producer_registry,
            producer_shared,
            producer_tx,
            consumer_count,
        )
        .await
    });

    let mut consumers = Vec::with_capacity(config.consumer_count);
    for id in 0..config.consumer_count {
        let pool = pool.clone();
        let config = config.clone();
        let rx = rx.clone();
        let shared = shared.clone();
        consumers.push(tokio::spawn(async move {
            run_consumer(id, batch_id, pool, config, rx, shared).await
        }));
    }

    drop(tx);

    let producer_result = producer.await.map_err(|e| {
        IngestError::WriteFatal(format!("producer task panicked: {e}"))
    })?;

    for consumer in consumers {
        if let Err(e) = consumer.await {
            warn!(error = %e, "consumer task panicked");
        }
    }

    let cancelled = shared.cancel_requested.load(Ordering::SeqCst);
    let summary = PipelineSummary {
        processed_count: shared.processed_count.load(Ordering::SeqCst),
        error_count: shared.error_count.load(Ordering::SeqCst),
        skipped_count: shared.skipped_count.load(Ordering::SeqCst),
        diagnostics: shared.diagnostics.lock().unwrap().clone(),
        cancelled,
    };

    producer_result?;
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
async fn run_producer(
    xml_path: std::path::PathBuf,
    owner_id: Uuid,
    batch_id: Uuid,
    config: Arc<PipelineConfig>,
    registry: Arc<SourceRegistry>,
    shared: Arc<PipelineShared>,
    tx: mpsc::Sender<Message>,
    consumer_count: usize,
) -> IngestResult<()> {
    let mut stream = ElementStream::open(&xml_path)?;
    let mut payload = BatchPayload::default();
    let mut elements_since_yield = 0u32;

    loop {
        if shared.cancel_requested.load(Ordering::SeqCst) {
            break;
        }

        match stream.next() {
            Err(e) => {
                let _ = flush(&tx, &mut payload).await;
                send_sentinels(&tx, consumer_count).await;
                return Err(e);
            }
            Ok(StreamItem::Eof) => break,
            Ok(StreamItem::Continue) => {}
            Ok(StreamItem::Skipped { tag, reason }) => {
                shared.skipped_count.fetch_add(1, Ordering::SeqCst);
                shared.record_diagnostic(reason.diagnostic(tag));
            }
            Ok(StreamItem::Classified(element)) => {
                if let Err(diag) =
                    accumulate(element, owner_id, batch_id, &registry, &mut payload).await
                {
                    shared.skipped_count.fetch_add(1, Ordering::SeqCst);
                    shared.record_diagnostic(diag);
                }

                if payload.len() >= config.batch_size {
                    if flush(&tx, &mut payload).await.is_err() {
                        break;
                    }
                }
            }
        }

        elements_since_yield += 1;
        if elements_since_yield >= 256 {
            elements_since_yield = 0;
            tokio::task::yield_now().await;
        }
    }

    let _ = flush(&tx, &mut payload).await;
    send_sentinels(&tx, consumer_count).await;
    Ok(())
}

async fn accumulate(
    element: ClassifiedElement,
    owner_id: Uuid,
    batch_id: Uuid,
    registry: &SourceRegistry,
    payload: &mut BatchPayload,
) -> Result<(), String> {
    match element {
        ClassifiedElement::Quantitative(raw) => {
            let source_id = registry
                .resolve(raw.source_name.as_deref(), raw.source_version.as_deref())
                .await
                .map_err(|e| format!("source lookup failed: {e}"))?;
            payload.samples.push(QuantitativeSample {
                owner_id,
                metric_type: raw.metric_type,
                time: raw.time,
                end_time: raw.end_time,
                value: raw.value,
                unit: raw.unit,
                source_id,
                batch_id,
            });
        }
        ClassifiedElement::Categorical(raw) => {
            let source_id = registry
                .resolve(raw.source_name.as_deref(), raw.source_version.as_deref())
                .await
                .map_err(|e| format!("source lookup failed: {e}"))?;
            payload.categoricals.push(CategoricalSample {
                owner_id,
                category_type: raw.category_type,
                time: raw.time,
                end_time: raw.end_time,
                raw_value: raw.raw_value,
                label: raw.label,
                source_id,
                batch_id,
            });
        }
        ClassifiedElement::Workout(raw) => {
            let source_id = registry
                .resolve(raw.source_name.as_deref(), raw.source_version.as_deref())
                .await
                .map_err(|e| format!("source lookup failed: {e}"))?;
            let workout_id = crate::services::classifier::deterministic_workout_id(
                owner_id,
                raw.start_time,
                &raw.activity_type,
            );
            for point in &raw.route_points {
                payload.route_points.push(RoutePoint {
                    workout_id,
                    time: point.time,
                    latitude: point.latitude,
                    longitude: point.longitude,
                    altitude_meters: point.altitude_meters,
                });
            }
            payload.workouts.push(Workout {
                id: workout_id,
                owner_id,
                activity_type: raw.activity_type,
                start_time: raw.start_time,
                end_time: raw.end_time,
                duration_seconds: raw.duration_seconds,
                distance_meters: raw.distance_meters,
                energy_kj: raw.energy_kj,
                source_id,
                batch_id,
                metadata: raw.metadata,
            });
        }
        ClassifiedElement::ActivitySummary(raw) => {
            payload.activity_summaries.push(ActivitySummary {
                owner_id,
                date: raw.date,
                active_energy_burned_kj: raw.active_energy_burned_kj,
                active_energy_burned_goal_kj: raw.active_energy_burned_goal_kj,
                exercise_minutes: raw.exercise_minutes,
                exercise_minutes_goal: raw.exercise_minutes_goal,
                stand_hours: raw.stand_hours,
                stand_hours_goal: raw.stand_hours_goal,
                batch_id,
            });
        }
    }
    Ok(())
}

async fn flush(tx: &mpsc::Sender<Message>, payload: &mut BatchPayload) -> Result<(), ()> {
    if payload.is_empty() {
        return Ok(());
    }
    let taken = std::mem::take(payload);
    tx.send(Message::Payload(taken)).await.map_err(|_| ())
}

async fn send_sentinels(tx: &mpsc::Sender<Message>, consumer_count: usize) {
    for _ in 0..consumer_count {
        let _ = tx.send(Message::Sentinel).await;
    }
}

async fn run_consumer(
    id: usize,
    batch_id: Uuid,
    pool: PgPool,
    config: Arc<PipelineConfig>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>,
    shared: Arc<PipelineShared>,
) {
    let log_context = LogContext::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), "pipeline")
        .with_batch_id(batch_id.to_string())
        .with_consumer_id(id);

    loop {
        let message = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        match message {
            None | Some(Message::Sentinel) => break,
            Some(Message::Payload(payload)) => {
                let record_count = payload.len() as u64;
                let outcome = write_payload(&pool, &config, payload).await;
                let written = outcome.samples_written
                    + outcome.categoricals_written
                    + outcome.activity_summaries_written
                    + outcome.workouts_written
                    + outcome.route_points_written;
                shared.processed_count.fetch_add(record_count, Ordering::SeqCst);

                if !outcome.failures.is_empty() {
                    shared
                        .error_count
                        .fetch_add(outcome.failures.len() as u64, Ordering::SeqCst);
                    for failure in outcome.failures {
                        shared.record_diagnostic(failure);
                    }
                }

                log_with_context!(
                    info,
                    log_context,
                    "consumer_wrote_payload",
                    record_count = record_count,
                    written = written
                );
            }
        }
    }
}
