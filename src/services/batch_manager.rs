//! Creates, finalises, and resets the `ImportBatch` state row that
//! represents one ingestion attempt (component C8).
//!
//! Finalisation is best-effort by design: a failure to write the terminal
//! state must never itself raise, since it runs on the error path of an
//! already-failing or already-finished pipeline run.

use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::models::{BatchStatus, ImportBatch};
use crate::services::pipeline::PipelineSummary;

pub async fn create_batch(
    pool: &PgPool,
    owner_id: Uuid,
    original_filename: String,
) -> IngestResult<ImportBatch> {
    let batch = ImportBatch::new(owner_id, original_filename);
    sqlx::query(
        "INSERT INTO import_batches
            (id, owner_id, original_filename, created_at, status, record_count, error_count, skipped_count, error_messages)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(batch.id)
    .bind(batch.owner_id)
    .bind(&batch.original_filename)
    .bind(batch.created_at)
    .bind(batch.status)
    .bind(batch.record_count)
    .bind(batch.error_count)
    .bind(batch.skipped_count)
    .bind(&batch.error_messages)
    .execute(pool)
    .await?;
    Ok(batch)
}

/// Writes the terminal state implied by a pipeline run's outcome. Never
/// propagates a write failure: it logs and returns, because by the time
/// this runs the pipeline has already completed, been cancelled, or failed,
/// and that outcome must not be lost behind a secondary write error.
pub async fn finalize(pool: &PgPool, batch_id: Uuid, result: &IngestResult<PipelineSummary>) {
    let (status, summary) = match result {
        Ok(summary) if summary.cancelled => (BatchStatus::Cancelled, Some(summary)),
        Ok(summary) => (BatchStatus::Completed, Some(summary)),
        Err(_) => (BatchStatus::Failed, None),
    };

    let query = match summary {
        Some(summary) => sqlx::query(
            "UPDATE import_batches
             SET status = $1, record_count = $2, error_count = $3, skipped_count = $4, error_messages = $5
             WHERE id = $6",
        )
        .bind(status)
        .bind(summary.processed_count as i64)
        .bind(summary.error_count as i64)
        .bind(summary.skipped_count as i64)
        .bind(&summary.diagnostics)
        .bind(batch_id),
        None => {
            let message = match result {
                Err(e) => e.to_string(),
                Ok(_) => unreachable!(),
            };
            sqlx::query(
                "UPDATE import_batches
                 SET status = $1, error_messages = array_append(error_messages, $2)
                 WHERE id = $3",
            )
            .bind(status)
            .bind(message)
            .bind(batch_id)
        }
    };

    if let Err(e) = query.execute(pool).await {
        error!(batch_id = %batch_id, error = %e, "failed to write terminal batch state");
    }
}

/// Flips a `processing` batch to `cancelling`; a no-op if the batch is not
/// currently running.
pub async fn request_cancel(pool: &PgPool, batch_id: Uuid) -> IngestResult<()> {
    let result = sqlx::query(
        "UPDATE import_batches SET status = $1 WHERE id = $2 AND status = $3",
    )
    .bind(BatchStatus::Cancelling)
    .bind(batch_id)
    .bind(BatchStatus::Processing)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(IngestError::InvalidBatchState);
    }
    Ok(())
}

pub async fn fetch(pool: &PgPool, batch_id: Uuid) -> IngestResult<ImportBatch> {
    sqlx::query_as::<_, ImportBatch>("SELECT * FROM import_batches WHERE id = $1")
        .bind(batch_id)
        .fetch_optional(pool)
        .await?
        .ok_or(IngestError::BatchNotFound)
}

/// Deletes everything landed under `batch_id` in FK-safe order and resets
/// the row to `processing` so the pipeline can be scheduled again against
/// the same stored file.
pub async fn reprocess(pool: &PgPool, batch_id: Uuid) -> IngestResult<()> {
    let batch = fetch(pool, batch_id).await?;
    if !batch.status.is_terminal() {
        return Err(IngestError::InvalidBatchState);
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM route_points WHERE workout_id IN (SELECT id FROM workouts WHERE batch_id = $1)",
    )
    .bind(batch_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM workouts WHERE batch_id = $1")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM quantitative_samples WHERE batch_id = $1")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM categorical_samples WHERE batch_id = $1")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM activity_summaries WHERE batch_id = $1")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE import_batches
         SET status = $1, record_count = 0, error_count = 0, skipped_count = 0, error_messages = '{}'
         WHERE id = $2",
    )
    .bind(BatchStatus::Processing)
    .bind(batch_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
