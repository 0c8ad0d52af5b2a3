//! Automation runtime: rule storage, the trigger/simulate engine, the event
//! channel feeding it, and the overdue-invoice scan.

mod engine;
mod events;
mod overdue;
mod postgres;
mod store;

pub use engine::{AutomationEngine, EngineError, PREVIEW_CHARS, TriggerOutcome};
pub use events::{AutomationEvent, AutomationEventSender, event_channel, spawn_listener};
pub use overdue::{OVERDUE_TRIGGER, scan_overdue, spawn_overdue_scan};
pub use postgres::PostgresAutomationStore;
pub use store::{AutomationStore, AutomationStoreError, InMemoryAutomationStore};
