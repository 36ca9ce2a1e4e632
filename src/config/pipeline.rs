use std::env;

/// PostgreSQL-driver-imposed ceiling on `rows * columns` for a single
/// parameterised insert. Kept well under the wire protocol's hard limit so a
/// wide row (e.g. a workout with many columns) still leaves headroom.
pub const MAX_INSERT_PARAMS: usize = 32_000;

pub const QUANTITATIVE_SAMPLE_PARAMS_PER_ROW: usize = 7;
pub const CATEGORICAL_SAMPLE_PARAMS_PER_ROW: usize = 7;
pub const ACTIVITY_SUMMARY_PARAMS_PER_ROW: usize = 8;
pub const WORKOUT_PARAMS_PER_ROW: usize = 10;
pub const ROUTE_POINT_PARAMS_PER_ROW: usize = 5;

/// Tunables for the producer/consumer pipeline (C5) and the batch writer
/// (C6). Mirrors the existing per-concern, environment-driven config style:
/// every field has a sane default and an optional `*_` environment override,
/// validated once at boot rather than per-call.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum combined record count carried by a single `BatchPayload`.
    pub batch_size: usize,
    /// Capacity of the bounded channel between the producer and consumers.
    pub queue_depth: usize,
    /// Number of consumer tasks draining the queue.
    pub consumer_count: usize,
    /// How often the progress/cancellation monitor polls, in seconds.
    pub progress_poll_interval_secs: u64,
    /// Maximum accepted upload size, in bytes.
    pub max_upload_bytes: u64,
    /// Maximum number of diagnostic strings retained on a batch row.
    pub max_diagnostic_messages: usize,
    /// Root directory under which uploaded archives/extracted XML are kept,
    /// named by batch id, so reprocess does not require re-upload.
    pub storage_root: String,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 25_000,
            queue_depth: 8,
            consumer_count: 3,
            progress_poll_interval_secs: 2,
            max_upload_bytes: 4 * 1024 * 1024 * 1024,
            max_diagnostic_messages: 50,
            storage_root: "./storage/imports".to_string(),
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_usize("PIPELINE_BATCH_SIZE", defaults.batch_size),
            queue_depth: env_usize("PIPELINE_QUEUE_DEPTH", defaults.queue_depth),
            consumer_count: env_usize("PIPELINE_CONSUMER_COUNT", defaults.consumer_count),
            progress_poll_interval_secs: env::var("PIPELINE_PROGRESS_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.progress_poll_interval_secs),
            max_upload_bytes: env::var("PIPELINE_MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_upload_bytes),
            max_diagnostic_messages: env_usize(
                "PIPELINE_MAX_DIAGNOSTIC_MESSAGES",
                defaults.max_diagnostic_messages,
            ),
            storage_root: env::var("PIPELINE_STORAGE_ROOT")
                .unwrap_or(defaults.storage_root),
            max_retries: env::var("PIPELINE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            initial_backoff_ms: env::var("PIPELINE_INITIAL_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: env::var("PIPELINE_MAX_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_backoff_ms),
        }
    }

    /// Validate chunk sizes implied by `batch_size` against the parameter
    /// ceiling for the widest row shape (workouts).
    pub fn validate(&self) -> Result<(), String> {
        if self.consumer_count == 0 {
            return Err("PIPELINE_CONSUMER_COUNT must be at least 1".to_string());
        }
        if self.queue_depth == 0 {
            return Err("PIPELINE_QUEUE_DEPTH must be at least 1".to_string());
        }
        let widest = self.batch_size * WORKOUT_PARAMS_PER_ROW;
        if widest > MAX_INSERT_PARAMS * 50 {
            // Not fatal on its own: the writer chunks sub-inserts internally.
            // Flag an implausibly large batch size so misconfiguration is caught early.
            return Err(format!(
                "PIPELINE_BATCH_SIZE {} is implausibly large for the configured parameter ceiling",
                self.batch_size
            ));
        }
        Ok(())
    }

    /// Largest number of rows that fit in one parameterised insert for a row
    /// shape with `params_per_row` columns.
    pub fn chunk_size_for(&self, params_per_row: usize) -> usize {
        (MAX_INSERT_PARAMS / params_per_row).max(1)
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_respects_param_ceiling() {
        let config = PipelineConfig::default();
        let chunk = config.chunk_size_for(WORKOUT_PARAMS_PER_ROW);
        assert!(chunk * WORKOUT_PARAMS_PER_ROW <= MAX_INSERT_PARAMS);
        assert!(chunk > 0);
    }

    #[test]
    fn default_config_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_consumers_is_rejected() {
        let mut config = PipelineConfig::default();
        config.consumer_count = 0;
        assert!(config.validate().is_err());
    }
}
