//! Periodically persists progress and watches for an external cancellation
//! request (component C7).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::models::BatchStatus;
use crate::services::pipeline::PipelineShared;

/// Runs until `cancel_token` fires. Intended to be spawned alongside the
/// pipeline and aborted once the run finishes; an abort is treated the same
/// as clean cancellation since this task owns no unflushed state.
pub async fn run_monitor(
    pool: PgPool,
    batch_id: Uuid,
    poll_interval: Duration,
    shared: Arc<PipelineShared>,
) {
    let mut last_written = 0u64;

    loop {
        tokio::time::sleep(poll_interval).await;

        let current = shared.processed_count.load(Ordering::SeqCst);
        if current != last_written {
            match sqlx::query("UPDATE import_batches SET record_count = $1 WHERE id = $2")
                .bind(current as i64)
                .bind(batch_id)
                .execute(&pool)
                .await
            {
                Ok(_) => last_written = current,
                Err(e) => warn!(batch_id = %batch_id, error = %e, "progress write failed, will retry next tick"),
            }
        }

        match sqlx::query_as::<_, (BatchStatus,)>(
            "SELECT status FROM import_batches WHERE id = $1",
        )
        .bind(batch_id)
        .fetch_optional(&pool)
        .await
        {
            Ok(Some((BatchStatus::Cancelling,))) => {
                shared.cancel_requested.store(true, Ordering::SeqCst);
            }
            Ok(_) => {}
            Err(e) => warn!(batch_id = %batch_id, error = %e, "status poll failed, will retry next tick"),
        }
    }
}
