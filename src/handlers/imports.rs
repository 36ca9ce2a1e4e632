//! Thin HTTP surface over the ingestion pipeline (component C0). Owner
//! identity arrives already resolved by an external authentication layer
//! this crate does not implement; it is taken here as a path value.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpResponse, Result};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::error;
use uuid::Uuid;

use crate::config::{LogContext, PipelineConfig};
use crate::error::IngestError;
use crate::log_with_context;
use crate::models::ApiResponse;
use crate::services::archive;
use crate::services::batch_manager;
use crate::services::monitor::run_monitor;
use crate::services::pipeline::{run_pipeline, PipelineShared};
use crate::services::source_registry::SourceRegistry;

pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: Arc<PipelineConfig>,
    pub registry: Arc<SourceRegistry>,
}

fn batch_storage_dir(config: &PipelineConfig, batch_id: Uuid) -> PathBuf {
    PathBuf::from(&config.storage_root).join(batch_id.to_string())
}

/// `POST /v1/imports/{owner_id}` — accepts a streamed upload, persists it to
/// disk without buffering it in memory, and schedules the pipeline as a
/// background task.
pub async fn create_import(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: actix_web::HttpRequest,
    mut body: web::Payload,
) -> Result<HttpResponse> {
    let owner_id = path.into_inner();
    let extension = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| if ct.contains("zip") { "zip" } else { "xml" })
        .unwrap_or("xml");

    let original_filename = req
        .headers()
        .get("X-Filename")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            web::Query::<HashMap<String, String>>::from_query(req.query_string())
                .ok()
                .and_then(|q| q.get("filename").cloned())
        })
        .unwrap_or_else(|| format!("upload.{extension}"));

    let batch = batch_manager::create_batch(&state.pool, owner_id, original_filename)
        .await
        .map_err(actix_error)?;

    let storage_dir = batch_storage_dir(&state.config, batch.id);
    tokio::fs::create_dir_all(&storage_dir)
        .await
        .map_err(|e| actix_error(IngestError::Io(e)))?;
    let upload_path = storage_dir.join(format!("upload.{extension}"));

    let mut file = tokio::fs::File::create(&upload_path)
        .await
        .map_err(|e| actix_error(IngestError::Io(e)))?;
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            actix_error(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                e,
            )))
        })?;
        written += chunk.len() as u64;
        if written > state.config.max_upload_bytes {
            return Err(actix_error(IngestError::InputTooLarge));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| actix_error(IngestError::Io(e)))?;
    }
    file.flush().await.map_err(|e| actix_error(IngestError::Io(e)))?;

    let xml_path = archive::validate_and_resolve(
        &upload_path,
        &storage_dir,
        state.config.max_upload_bytes,
    )
    .map_err(actix_error)?;

    spawn_ingestion(
        state.pool.clone(),
        state.config.clone(),
        state.registry.clone(),
        owner_id,
        batch.id,
        xml_path,
    );

    Ok(HttpResponse::Accepted().json(ApiResponse::success(batch)))
}

/// `GET /v1/imports/{id}` — current batch state.
pub async fn get_import(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse> {
    let batch = batch_manager::fetch(&state.pool, path.into_inner())
        .await
        .map_err(actix_error)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(batch)))
}

/// `POST /v1/imports/{id}/cancel` — flips `processing` to `cancelling`.
pub async fn cancel_import(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    batch_manager::request_cancel(&state.pool, path.into_inner())
        .await
        .map_err(actix_error)?;
    Ok(HttpResponse::Accepted().json(ApiResponse::<()>::success(())))
}

/// `POST /v1/imports/{id}/reprocess` — deletes prior landed rows and
/// reschedules the pipeline against the same stored upload.
pub async fn reprocess_import(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let batch_id = path.into_inner();
    let batch = batch_manager::fetch(&state.pool, batch_id)
        .await
        .map_err(actix_error)?;
    batch_manager::reprocess(&state.pool, batch_id)
        .await
        .map_err(actix_error)?;

    let storage_dir = batch_storage_dir(&state.config, batch_id);
    let upload_candidates = ["upload.xml", "upload.zip"];
    let upload_path = upload_candidates
        .iter()
        .map(|name| storage_dir.join(name))
        .find(|p| p.exists())
        .ok_or_else(|| actix_error(IngestError::BatchNotFound))?;

    let xml_path = archive::validate_and_resolve(
        &upload_path,
        &storage_dir,
        state.config.max_upload_bytes,
    )
    .map_err(actix_error)?;

    spawn_ingestion(
        state.pool.clone(),
        state.config.clone(),
        state.registry.clone(),
        batch.owner_id,
        batch_id,
        xml_path,
    );

    Ok(HttpResponse::Accepted().json(ApiResponse::<()>::success(())))
}

fn spawn_ingestion(
    pool: sqlx::PgPool,
    config: Arc<PipelineConfig>,
    registry: Arc<SourceRegistry>,
    owner_id: Uuid,
    batch_id: Uuid,
    xml_path: PathBuf,
) {
    tokio::spawn(async move {
        let shared = Arc::new(PipelineShared::new(config.max_diagnostic_messages));
        let log_context = LogContext::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), "pipeline")
            .with_batch_id(batch_id.to_string())
            .with_owner_id(owner_id.to_string());

        let monitor_pool = pool.clone();
        let monitor_shared = shared.clone();
        let poll_interval = Duration::from_secs(config.progress_poll_interval_secs);
        let monitor_handle = tokio::spawn(async move {
            run_monitor(monitor_pool, batch_id, poll_interval, monitor_shared).await;
        });

        log_with_context!(info, log_context, "ingestion_started",);
        let result = run_pipeline(
            pool.clone(),
            config,
            registry,
            owner_id,
            batch_id,
            &xml_path,
            shared,
        )
        .await;

        monitor_handle.abort();

        if let Err(e) = &result {
            log_with_context!(warn, log_context, "ingestion_run_failed", error = e.to_string());
        }
        batch_manager::finalize(&pool, batch_id, &result).await;
    });
}

fn actix_error(err: IngestError) -> actix_web::Error {
    match err {
        IngestError::BatchNotFound => actix_web::error::ErrorNotFound(err.to_string()),
        IngestError::InvalidBatchState => actix_web::error::ErrorConflict(err.to_string()),
        IngestError::InputTooLarge => actix_web::error::ErrorPayloadTooLarge(err.to_string()),
        IngestError::UnsupportedInput | IngestError::ArchiveMalformed(_) | IngestError::InputTruncated => {
            actix_web::error::ErrorBadRequest(err.to_string())
        }
        other => {
            error!(error = %other, "unhandled ingestion error");
            actix_web::error::ErrorInternalServerError(other.to_string())
        }
    }
}
