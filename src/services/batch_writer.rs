//! Persists one `BatchPayload` into storage (component C6).
//!
//! Samples, categoricals, and activity summaries are independent tables and
//! are written in parallel, each on its own pooled connection, each as its
//! own transaction. Workouts are written afterwards (route points carry an
//! FK to them), then route points. Every insert is chunked to stay within
//! the parameter ceiling and ignores conflicts on its natural dedup key, so
//! a rerun over the same export is a no-op rather than a duplicate.

use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::config::PipelineConfig;
use crate::models::{ActivitySummary, CategoricalSample, QuantitativeSample, RoutePoint, Workout};
use crate::services::retry::retry_with_backoff;

/// Records accumulated for one payload, grouped by entity kind.
#[derive(Debug, Default)]
pub struct BatchPayload {
    pub samples: Vec<QuantitativeSample>,
    pub categoricals: Vec<CategoricalSample>,
    pub activity_summaries: Vec<ActivitySummary>,
    pub workouts: Vec<Workout>,
    pub route_points: Vec<RoutePoint>,
}

impl BatchPayload {
    pub fn len(&self) -> usize {
        self.samples.len()
            + self.categoricals.len()
            + self.activity_summaries.len()
            + self.workouts.len()
            + self.route_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of writing one payload: how many rows of each kind actually
/// landed (conflicts are not counted as written) and how many sub-writes
/// failed outright.
#[derive(Debug, Default, Clone)]
pub struct WriteOutcome {
    pub samples_written: u64,
    pub categoricals_written: u64,
    pub activity_summaries_written: u64,
    pub workouts_written: u64,
    pub route_points_written: u64,
    pub failures: Vec<String>,
}

pub async fn write_payload(
    pool: &PgPool,
    config: &PipelineConfig,
    payload: BatchPayload,
) -> WriteOutcome {
    let (samples_result, categoricals_result, summaries_result) = tokio::join!(
        write_samples(pool, config, &payload.samples),
        write_categoricals(pool, config, &payload.categoricals),
        write_activity_summaries(pool, config, &payload.activity_summaries),
    );

    let mut outcome = WriteOutcome::default();
    match samples_result {
        Ok(n) => outcome.samples_written = n,
        Err(e) => outcome.failures.push(format!("samples: {e}")),
    }
    match categoricals_result {
        Ok(n) => outcome.categoricals_written = n,
        Err(e) => outcome.failures.push(format!("categoricals: {e}")),
    }
    match summaries_result {
        Ok(n) => outcome.activity_summaries_written = n,
        Err(e) => outcome.failures.push(format!("activity_summaries: {e}")),
    }

    // Workouts must land before their route points within this batch.
    match write_workouts(pool, config, &payload.workouts).await {
        Ok(n) => {
            outcome.workouts_written = n;
            match write_route_points(pool, config, &payload.route_points).await {
                Ok(n) => outcome.route_points_written = n,
                Err(e) => outcome.failures.push(format!("route_points: {e}")),
            }
        }
        Err(e) => {
            outcome.failures.push(format!("workouts: {e}"));
            // Route points for a failed workout batch cannot be attached;
            // the workout failure is reported and the batch moves on.
        }
    }

    outcome
}

async fn write_samples(
    pool: &PgPool,
    config: &PipelineConfig,
    rows: &[QuantitativeSample],
) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }
    let chunk_size = config.chunk_size_for(crate::config::QUANTITATIVE_SAMPLE_PARAMS_PER_ROW);
    let mut total = 0u64;
    for chunk in rows.chunks(chunk_size) {
        let written = retry_with_backoff("samples", config, || async {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO quantitative_samples (owner_id, metric_type, time, end_time, value, unit, source_id, batch_id) ",
            );
            qb.push_values(chunk.iter(), |mut b, s| {
                b.push_bind(s.owner_id)
                    .push_bind(&s.metric_type)
                    .push_bind(s.time)
                    .push_bind(s.end_time)
                    .push_bind(s.value)
                    .push_bind(&s.unit)
                    .push_bind(s.source_id)
                    .push_bind(s.batch_id);
            });
            qb.push(
                " ON CONFLICT (owner_id, metric_type, time, value, source_id) DO NOTHING",
            );
            qb.build().execute(pool).await.map(|r| r.rows_affected())
        })
        .await?;
        total += written;
    }
    Ok(total)
}

async fn write_categoricals(
    pool: &PgPool,
    config: &PipelineConfig,
    rows: &[CategoricalSample],
) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }
    let chunk_size = config.chunk_size_for(crate::config::CATEGORICAL_SAMPLE_PARAMS_PER_ROW);
    let mut total = 0u64;
    for chunk in rows.chunks(chunk_size) {
        let written = retry_with_backoff("categoricals", config, || async {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO categorical_samples (owner_id, category_type, time, end_time, raw_value, label, source_id, batch_id) ",
            );
            qb.push_values(chunk.iter(), |mut b, s| {
                b.push_bind(s.owner_id)
                    .push_bind(&s.category_type)
                    .push_bind(s.time)
                    .push_bind(s.end_time)
                    .push_bind(&s.raw_value)
                    .push_bind(&s.label)
                    .push_bind(s.source_id)
                    .push_bind(s.batch_id);
            });
            qb.push(" ON CONFLICT (time, owner_id, category_type) DO NOTHING");
            qb.build().execute(pool).await.map(|r| r.rows_affected())
        })
        .await?;
        total += written;
    }
    Ok(total)
}

async fn write_activity_summaries(
    pool: &PgPool,
    config: &PipelineConfig,
    rows: &[ActivitySummary],
) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }
    let chunk_size = config.chunk_size_for(crate::config::ACTIVITY_SUMMARY_PARAMS_PER_ROW);
    let mut total = 0u64;
    for chunk in rows.chunks(chunk_size) {
        let written = retry_with_backoff("activity_summaries", config, || async {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO activity_summaries (owner_id, date, active_energy_burned_kj, active_energy_burned_goal_kj, exercise_minutes, exercise_minutes_goal, stand_hours, stand_hours_goal, batch_id) ",
            );
            qb.push_values(chunk.iter(), |mut b, s| {
                b.push_bind(s.owner_id)
                    .push_bind(s.date)
                    .push_bind(s.active_energy_burned_kj)
                    .push_bind(s.active_energy_burned_goal_kj)
                    .push_bind(s.exercise_minutes)
                    .push_bind(s.exercise_minutes_goal)
                    .push_bind(s.stand_hours)
                    .push_bind(s.stand_hours_goal)
                    .push_bind(s.batch_id);
            });
            qb.push(" ON CONFLICT (date, owner_id) DO NOTHING");
            qb.build().execute(pool).await.map(|r| r.rows_affected())
        })
        .await?;
        total += written;
    }
    Ok(total)
}

async fn write_workouts(
    pool: &PgPool,
    config: &PipelineConfig,
    rows: &[Workout],
) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }
    let chunk_size = config.chunk_size_for(crate::config::WORKOUT_PARAMS_PER_ROW);
    let mut total = 0u64;
    for chunk in rows.chunks(chunk_size) {
        let written = retry_with_backoff("workouts", config, || async {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO workouts (id, owner_id, activity_type, start_time, end_time, duration_seconds, distance_meters, energy_kj, source_id, batch_id, metadata) ",
            );
            qb.push_values(chunk.iter(), |mut b, w| {
                b.push_bind(w.id)
                    .push_bind(w.owner_id)
                    .push_bind(&w.activity_type)
                    .push_bind(w.start_time)
                    .push_bind(w.end_time)
                    .push_bind(w.duration_seconds)
                    .push_bind(w.distance_meters)
                    .push_bind(w.energy_kj)
                    .push_bind(w.source_id)
                    .push_bind(w.batch_id)
                    .push_bind(&w.metadata);
            });
            qb.push(" ON CONFLICT (owner_id, start_time, activity_type) DO NOTHING");
            qb.build().execute(pool).await.map(|r| r.rows_affected())
        })
        .await?;
        total += written;
    }
    Ok(total)
}

async fn write_route_points(
    pool: &PgPool,
    config: &PipelineConfig,
    rows: &[RoutePoint],
) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }
    let chunk_size = config.chunk_size_for(crate::config::ROUTE_POINT_PARAMS_PER_ROW);
    let mut total = 0u64;
    for chunk in rows.chunks(chunk_size) {
        let written = retry_with_backoff("route_points", config, || async {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO route_points (workout_id, time, latitude, longitude, altitude_meters) ",
            );
            qb.push_values(chunk.iter(), |mut b, p| {
                b.push_bind(p.workout_id)
                    .push_bind(p.time)
                    .push_bind(p.latitude)
                    .push_bind(p.longitude)
                    .push_bind(p.altitude_meters);
            });
            qb.push(" ON CONFLICT (time, workout_id) DO NOTHING");
            qb.build().execute(pool).await.map(|r| r.rows_affected())
        })
        .await?;
        total += written;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_reports_zero_length() {
        let payload = BatchPayload::default();
        assert!(payload.is_empty());
        assert_eq!(payload.len(), 0);
    }
}
