use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use oryxa_infra::jobs::{JobId, NewJob};

use crate::app::AppState;
use crate::app::dto::{self, EnqueueJobRequest, JobAccepted};
use crate::app::errors::{ApiError, ApiResult};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(enqueue_job))
        .route("/:id", get(get_job))
}

/// Unknown job types are accepted here and fail permanently at dispatch.
pub async fn enqueue_job(
    Extension(state): Extension<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    payload: Result<Json<EnqueueJobRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = dto::body(payload)?;
    if req.job_type.trim().is_empty() {
        return Err(ApiError::Validation("type is required".into()));
    }
    if !req.payload.is_object() {
        return Err(ApiError::Validation("payload must be an object".into()));
    }

    let mut job = NewJob::new(tenant.tenant_id(), req.job_type.trim(), req.payload)
        .with_priority(req.priority.unwrap_or_default());
    if let Some(max_retries) = req.max_retries {
        job = job.with_max_retries(max_retries);
    }

    let job_id = state.queue.enqueue(job).await?;
    Ok((StatusCode::CREATED, Json(JobAccepted::new(job_id))))
}

pub async fn get_job(
    Extension(state): Extension<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job_id: JobId = id
        .parse()
        .map_err(|_| ApiError::Validation("invalid job id".into()))?;

    let job = state
        .queue
        .get_for_tenant(tenant.tenant_id(), job_id)
        .await?
        .ok_or(ApiError::NotFound("job"))?;
    Ok(Json(job))
}
