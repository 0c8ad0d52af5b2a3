use axum::{Router, routing::get};

pub mod automations;
pub mod invoices;
pub mod jobs;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/queue/stats", get(system::queue_stats))
        .nest("/jobs", jobs::router())
        .nest("/automations", automations::router())
        .nest("/invoices", invoices::router())
        .route("/whoami", get(system::whoami))
}
