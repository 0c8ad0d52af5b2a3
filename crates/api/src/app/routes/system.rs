use std::sync::Arc;

use axum::{Extension, Json, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use crate::app::AppState;
use crate::app::dto::HealthResponse;
use crate::app::errors::ApiResult;
use crate::context::TenantContext;

const SERVICE: &str = "Oryxa API";

/// Liveness plus queue depth; `503` when the job store is unreachable.
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let (status, code, queue) = match state.queue.stats().await {
        Ok(stats) => (StatusCode::OK, "ok", Some(stats)),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read queue stats");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", None)
        }
    };

    (
        status,
        Json(HealthResponse {
            status: code,
            service: SERVICE,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
            queue,
        }),
    )
}

pub async fn queue_stats(Extension(state): Extension<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.queue.stats().await?))
}

pub async fn whoami(Extension(tenant): Extension<TenantContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "tenantId": tenant.tenant_id().to_string(),
    }))
}
