use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use sqlx::PgPool;

/// Liveness probe: process is up. Never touches the database.
pub async fn live() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({ "status": "alive" })))
}

/// Readiness probe: the database is reachable.
pub async fn ready(pool: web::Data<PgPool>) -> Result<HttpResponse> {
    match sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await {
        Ok(_) => Ok(HttpResponse::Ok().json(json!({ "status": "ready" }))),
        Err(e) => Ok(HttpResponse::ServiceUnavailable().json(json!({
            "status": "not_ready",
            "error": e.to_string(),
        }))),
    }
}

/// Generic health summary, mirroring the live/ready checks in one payload.
pub async fn health(pool: web::Data<PgPool>) -> Result<HttpResponse> {
    let database_ok = sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await.is_ok();
    Ok(HttpResponse::Ok().json(json!({
        "status": if database_ok { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": database_ok,
    })))
}
