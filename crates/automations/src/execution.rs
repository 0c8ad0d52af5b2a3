//! Per-action results and the append-only execution log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use oryxa_core::{AutomationId, TenantId};

use crate::EventData;

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// A job was enqueued (or, for `update_field`, the change applied).
    Queued {
        #[serde(rename = "jobId", default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        #[serde(flatten)]
        detail: Map<String, JsonValue>,
    },
    /// Dry run: what would have happened.
    Simulated {
        #[serde(flatten)]
        preview: Map<String, JsonValue>,
    },
    Failed { error: String },
}

impl ActionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ActionOutcome::Failed { .. })
    }
}

/// Result of one action of one matched automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub automation_id: AutomationId,
    pub automation_name: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failed,
}

impl ExecutionStatus {
    /// `success` when nothing failed, `failed` when everything failed,
    /// `partial` otherwise.
    pub fn from_results(results: &[ActionResult]) -> Self {
        let failed = results.iter().filter(|r| r.outcome.is_failed()).count();
        if failed == 0 {
            ExecutionStatus::Success
        } else if failed == results.len() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Failed => "failed",
        }
    }
}

/// Audit row for one live run of one automation. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub automation_id: AutomationId,
    pub trigger: String,
    pub status: ExecutionStatus,
    pub event_data: EventData,
    pub results: Vec<ActionResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionRecord {
    pub fn new(
        tenant_id: TenantId,
        automation_id: AutomationId,
        trigger: impl Into<String>,
        event_data: EventData,
        results: Vec<ActionResult>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            automation_id,
            trigger: trigger.into(),
            status: ExecutionStatus::from_results(&results),
            event_data,
            results,
            started_at,
            completed_at,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(outcome: ActionOutcome) -> ActionResult {
        ActionResult {
            automation_id: AutomationId::new(),
            automation_name: "Reminder".into(),
            action_type: "send_email".into(),
            outcome,
        }
    }

    fn queued() -> ActionOutcome {
        ActionOutcome::Queued {
            job_id: Some("job_1".into()),
            detail: Map::new(),
        }
    }

    fn failed() -> ActionOutcome {
        ActionOutcome::Failed {
            error: "boom".into(),
        }
    }

    #[test]
    fn status_reflects_share_of_failures() {
        assert_eq!(ExecutionStatus::from_results(&[]), ExecutionStatus::Success);
        assert_eq!(
            ExecutionStatus::from_results(&[result(queued()), result(queued())]),
            ExecutionStatus::Success
        );
        assert_eq!(
            ExecutionStatus::from_results(&[result(queued()), result(failed())]),
            ExecutionStatus::Partial
        );
        assert_eq!(
            ExecutionStatus::from_results(&[result(failed())]),
            ExecutionStatus::Failed
        );
    }

    #[test]
    fn action_result_serializes_flat() {
        let mut detail = Map::new();
        detail.insert("recipient".into(), json!("a@b.test"));
        let r = result(ActionOutcome::Queued {
            job_id: Some("job_42".into()),
            detail,
        });

        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["type"], json!("send_email"));
        assert_eq!(value["status"], json!("queued"));
        assert_eq!(value["jobId"], json!("job_42"));
        assert_eq!(value["recipient"], json!("a@b.test"));
        assert_eq!(value["automationName"], json!("Reminder"));

        let back: ActionResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn duration_is_derived_from_timestamps() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(250);
        let record = ExecutionRecord::new(
            TenantId::new(),
            AutomationId::new(),
            "invoice_overdue",
            EventData::new(),
            vec![result(failed())],
            start,
            end,
        );
        assert_eq!(record.duration_ms, 250);
        assert_eq!(record.status, ExecutionStatus::Failed);
    }
}
