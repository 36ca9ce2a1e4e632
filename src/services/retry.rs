//! Exponential backoff around transient database failures, shared by the
//! batch writer and the source registry.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::config::PipelineConfig;

/// PostgreSQL error codes considered transient and worth retrying.
fn is_retryable_db_error(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("40001") => true, // serialization_failure
            Some("40P01") => true, // deadlock_detected
            Some("53000") => true, // insufficient_resources
            Some("53100") => true, // disk_full
            Some("53200") => true, // out_of_memory
            Some("53300") => true, // too_many_connections
            Some("08000") => true, // connection_exception
            Some("08003") => true, // connection_does_not_exist
            Some("08006") => true, // connection_failure
            _ => false,
        },
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => true,
        _ => false,
    }
}

/// Run `operation` until it succeeds, a non-retryable error is returned, or
/// `max_retries` is exhausted, doubling the backoff delay after each
/// failure up to `max_backoff_ms`.
pub async fn retry_with_backoff<F, Fut, T>(
    label: &str,
    config: &PipelineConfig,
    operation: F,
) -> Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0u32;
    let mut backoff_ms = config.initial_backoff_ms;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(label, attempt, "write succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    error!(label, attempt, error = %e, "write failed after max retries");
                    return Err(e);
                }

                if !is_retryable_db_error(&e) {
                    error!(label, error = %e, "non-retryable write error");
                    return Err(e);
                }

                warn!(label, attempt, backoff_ms, error = %e, "write failed, retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(config.max_backoff_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_immediately_without_retry() {
        let config = PipelineConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            max_retries: 3,
            ..Default::default()
        };
        let result: Result<u32, sqlx::Error> =
            retry_with_backoff("test", &config, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries_on_pool_timeout() {
        let config = PipelineConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            max_retries: 2,
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let result: Result<u32, sqlx::Error> = retry_with_backoff("test", &config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::PoolTimedOut) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
