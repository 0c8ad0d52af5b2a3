use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use oryxa_core::TenantId;

use crate::app::errors::json_error;
use crate::context::TenantContext;

/// Header carrying the tenant id, validated upstream by the gateway.
pub const TENANT_HEADER: &str = "x-tenant-id";

pub async fn tenant_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let tenant_id = match extract_tenant(req.headers()) {
        Ok(id) => id,
        Err(message) => {
            return json_error(StatusCode::UNAUTHORIZED, "unauthorized", message);
        }
    };

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    next.run(req).await
}

fn extract_tenant(headers: &HeaderMap) -> Result<TenantId, &'static str> {
    let value = headers
        .get(TENANT_HEADER)
        .ok_or("missing x-tenant-id header")?
        .to_str()
        .map_err(|_| "invalid x-tenant-id header")?
        .trim();

    value.parse().map_err(|_| "invalid x-tenant-id header")
}
