use actix_web::{middleware::Compress, web, App, HttpServer};
use dotenvy::dotenv;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;

use config::{LoggingConfig, PipelineConfig};
use db::database::{create_connection_pool, update_db_pool_metrics};
use handlers::imports::AppState;
use middleware::{metrics_handler, CompressionAndCaching, RequestLogger, StructuredLogger};
use services::source_registry::SourceRegistry;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    let logging_config = LoggingConfig::from_env();
    logging_config
        .init()
        .expect("failed to initialize structured logging");

    let database_url =
        env::var("DATABASE_URL").expect("DATABASE_URL must be set in environment or .env file");
    let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let server_port = env::var("SERVER_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .expect("SERVER_PORT must be a valid port number");
    let workers = env::var("WORKERS")
        .unwrap_or_else(|_| "4".to_string())
        .parse::<usize>()
        .expect("WORKERS must be a valid number");

    info!("starting health export ingestion service");
    info!(host = %server_host, port = server_port, "server binding");

    let pool = create_connection_pool(&database_url)
        .await
        .expect("failed to create database connection pool");

    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            warn!("database connection test failed: {e}");
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string())
        })?;
    info!("database connection verified");

    let pipeline_config = Arc::new(PipelineConfig::from_env());
    pipeline_config
        .validate()
        .expect("invalid pipeline configuration");

    let registry = Arc::new(
        SourceRegistry::warm(pool.clone())
            .await
            .expect("failed to warm source registry"),
    );
    info!("source registry warmed");

    let pool_for_metrics = pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            interval.tick().await;
            update_db_pool_metrics(&pool_for_metrics);
        }
    });

    std::fs::create_dir_all(&pipeline_config.storage_root)
        .expect("failed to create storage root directory");

    HttpServer::new(move || {
        let app_state = AppState {
            pool: pool.clone(),
            config: pipeline_config.clone(),
            registry: registry.clone(),
        };

        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(app_state))
            .app_data(web::PayloadConfig::new(pipeline_config.max_upload_bytes as usize))
            .wrap(Compress::default())
            .wrap(CompressionAndCaching)
            .wrap(StructuredLogger)
            .wrap(RequestLogger)
            .route("/health", web::get().to(handlers::health::health))
            .route("/ready", web::get().to(handlers::health::ready))
            .route("/live", web::get().to(handlers::health::live))
            .route("/metrics", web::get().to(metrics_handler))
            .service(
                web::scope("/v1/imports")
                    .route("/{owner_id}", web::post().to(handlers::imports::create_import))
                    .route("/{id}", web::get().to(handlers::imports::get_import))
                    .route(
                        "/{id}/cancel",
                        web::post().to(handlers::imports::cancel_import),
                    )
                    .route(
                        "/{id}/reprocess",
                        web::post().to(handlers::imports::reprocess_import),
                    ),
            )
    })
    .bind((server_host.as_str(), server_port))?
    .workers(workers)
    .run()
    .await
}
