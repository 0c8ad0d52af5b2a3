//! Infrastructure layer: job queue and worker, durable stores, delivery
//! adapters, the automation runtime, configuration and process wiring.

pub mod adapters;
pub mod automations;
pub mod config;
pub mod db;
pub mod jobs;
pub mod records;
pub mod runtime;
