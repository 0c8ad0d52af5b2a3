//! Automation domain module.
//!
//! Tenant-defined rules of the form *trigger + conditions → actions*, and the
//! pure pieces of evaluating them: condition matching, `{{placeholder}}`
//! substitution, typed action configuration and execution records.
//! Running actions (enqueueing jobs, touching stores) lives in `oryxa-infra`.

pub mod action;
pub mod automation;
pub mod condition;
pub mod execution;
pub mod template;

pub use action::{
    Action, ActionError, ActionSpec, EmailAction, UpdateFieldAction, WebhookAction,
    WhatsAppAction,
};
pub use automation::{Automation, Trigger};
pub use condition::{Condition, ConditionError, Operator, evaluate_conditions};
pub use execution::{ActionOutcome, ActionResult, ExecutionRecord, ExecutionStatus};
pub use template::{preview, render_template};

/// Event data an automation is evaluated against (a JSON object).
pub type EventData = serde_json::Map<String, serde_json::Value>;
