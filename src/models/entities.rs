use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::enums::BatchStatus;

/// One ingestion attempt. Created `processing` before the pipeline starts;
/// mutated only by the progress monitor and the batch record manager during
/// a run. Terminal states are `cancelled|completed|failed`; only an explicit
/// reprocess may move a terminal batch back to `processing`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImportBatch {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    pub status: BatchStatus,
    pub record_count: i64,
    pub error_count: i64,
    pub skipped_count: i64,
    pub error_messages: Vec<String>,
}

impl ImportBatch {
    pub fn new(owner_id: Uuid, original_filename: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            original_filename,
            created_at: Utc::now(),
            status: BatchStatus::Processing,
            record_count: 0,
            error_count: 0,
            skipped_count: 0,
            error_messages: Vec::new(),
        }
    }
}

/// `(name, bundle_id)` unique. Insert-only within a run; never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataSource {
    pub id: i64,
    pub name: String,
    pub bundle_id: String,
}

/// A single numeric measurement at an instant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuantitativeSample {
    pub owner_id: Uuid,
    pub metric_type: String,
    pub time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub value: f64,
    pub unit: Option<String>,
    pub source_id: Option<i64>,
    pub batch_id: Uuid,
}

/// A discrete-state observation at an instant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CategoricalSample {
    pub owner_id: Uuid,
    pub category_type: String,
    pub time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub raw_value: String,
    pub label: String,
    pub source_id: Option<i64>,
    pub batch_id: Uuid,
}

/// A structured workout, optionally carrying a GPS track and a free-form
/// metadata map. `id` is a deterministic namespace-uuid over
/// `(owner_id, start_time, activity_type)` so reruns dedupe via the primary
/// key rather than via a separate unique index.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Workout {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub activity_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub distance_meters: Option<f64>,
    pub energy_kj: Option<f64>,
    pub source_id: Option<i64>,
    pub batch_id: Uuid,
    pub metadata: serde_json::Value,
}

/// One GPS fix belonging to a workout's route.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoutePoint {
    pub workout_id: Uuid,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_meters: Option<f64>,
}

/// A per-calendar-day roll-up of energy, exercise minutes, and stand hours.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivitySummary {
    pub owner_id: Uuid,
    pub date: NaiveDate,
    pub active_energy_burned_kj: Option<f64>,
    pub active_energy_burned_goal_kj: Option<f64>,
    pub exercise_minutes: Option<f64>,
    pub exercise_minutes_goal: Option<f64>,
    pub stand_hours: Option<f64>,
    pub stand_hours_goal: Option<f64>,
    pub batch_id: Uuid,
}
