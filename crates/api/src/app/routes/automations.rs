use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::rejection::JsonRejection,
    response::IntoResponse,
    routing::post,
};

use crate::app::AppState;
use crate::app::dto::{self, SimulateResponse, TriggerRequest};
use crate::app::errors::{ApiError, ApiResult};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/trigger", post(trigger))
        .route("/simulate", post(simulate))
}

fn validated(payload: Result<Json<TriggerRequest>, JsonRejection>) -> ApiResult<TriggerRequest> {
    let req = dto::body(payload)?;
    if req.trigger.trim().is_empty() {
        return Err(ApiError::Validation("Trigger type is required".into()));
    }
    Ok(req)
}

/// Run matching automations for real: jobs are enqueued, runs are recorded.
pub async fn trigger(
    Extension(state): Extension<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    payload: Result<Json<TriggerRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = validated(payload)?;
    let outcome = state
        .engine
        .trigger(tenant.tenant_id(), req.trigger.trim(), &req.data, false)
        .await?;
    Ok(Json(outcome))
}

/// Dry run: previews what each matching action would do.
pub async fn simulate(
    Extension(state): Extension<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    payload: Result<Json<TriggerRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = validated(payload)?;
    let trigger = req.trigger.trim().to_string();
    let outcome = state
        .engine
        .trigger(tenant.tenant_id(), &trigger, &req.data, true)
        .await?;

    Ok(Json(SimulateResponse {
        success: true,
        trigger,
        actions_triggered: outcome.actions,
        execution_time: outcome.duration_ms,
        message: outcome
            .message
            .unwrap_or_else(|| "Automation simulated successfully".to_string()),
    }))
}
