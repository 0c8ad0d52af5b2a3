//! HTTP API: routing, tenant context and request/response mapping.

pub mod app;
pub mod context;
pub mod middleware;
