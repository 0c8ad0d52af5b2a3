//! HTTP application wiring (Axum router + shared state).
//!
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use oryxa_infra::automations::{AutomationEngine, AutomationEventSender};
use oryxa_infra::jobs::JobQueue;
use oryxa_infra::records::InvoiceStore;
use oryxa_infra::runtime::Services;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Collaborators shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub engine: Arc<AutomationEngine>,
    pub invoices: Arc<dyn InvoiceStore>,
    /// Business events raised by requests (e.g. `invoice_sent`).
    pub events: Option<AutomationEventSender>,
}

impl AppState {
    pub fn new(services: &Services) -> Self {
        Self {
            queue: services.queue.clone(),
            engine: services.engine.clone(),
            invoices: services.invoices.clone(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: AutomationEventSender) -> Self {
        self.events = Some(events);
        self
    }
}

/// Build the full HTTP router (used by `main.rs` and the black-box tests).
pub fn build_app(state: AppState) -> Router {
    let state = Arc::new(state);

    // Tenant-scoped routes: require the tenant header.
    let protected = routes::router().layer(axum::middleware::from_fn(
        middleware::tenant_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(state)))
}
