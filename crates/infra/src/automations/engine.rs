//! Trigger evaluation and action execution.
//!
//! Live mode enqueues jobs, applies field updates, logs one execution per
//! matched automation and bumps its run statistics. Simulate mode walks the
//! same path but only renders previews.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use tracing::{debug, info, warn};

use oryxa_automations::{
    Action, ActionOutcome, ActionResult, ActionSpec, Automation, EmailAction, EventData,
    ExecutionRecord, UpdateFieldAction, WebhookAction, WhatsAppAction, preview, render_template,
};
use oryxa_core::{InvoiceId, TenantId};
use oryxa_invoicing::InvoiceStatus;

use crate::jobs::{JobQueue, JobType, NewJob, Priority};
use crate::records::InvoiceStore;

use super::store::{AutomationStore, AutomationStoreError};

/// Characters of rendered content shown in a simulated action.
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] AutomationStoreError),
}

/// Result of one trigger evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerOutcome {
    pub success: bool,
    pub actions: Vec<ActionResult>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct AutomationEngine {
    automations: Arc<dyn AutomationStore>,
    queue: Arc<JobQueue>,
    invoices: Arc<dyn InvoiceStore>,
}

impl AutomationEngine {
    pub fn new(
        automations: Arc<dyn AutomationStore>,
        queue: Arc<JobQueue>,
        invoices: Arc<dyn InvoiceStore>,
    ) -> Self {
        Self {
            automations,
            queue,
            invoices,
        }
    }

    /// Evaluate every enabled automation of `tenant_id` listening to
    /// `trigger` against `data`.
    pub async fn trigger(
        &self,
        tenant_id: TenantId,
        trigger: &str,
        data: &EventData,
        simulate: bool,
    ) -> Result<TriggerOutcome, EngineError> {
        let clock = Instant::now();
        let candidates: Vec<Automation> = self
            .automations
            .list_enabled(tenant_id)
            .await?
            .into_iter()
            .filter(|a| a.listens_to(trigger))
            .collect();

        if candidates.is_empty() {
            debug!(tenant_id = %tenant_id, trigger, "no automations for trigger");
            return Ok(TriggerOutcome {
                success: true,
                actions: Vec::new(),
                duration_ms: clock.elapsed().as_millis() as u64,
                message: Some("No matching automations found".to_string()),
            });
        }

        let mut actions = Vec::new();
        for automation in &candidates {
            match automation.matches(data) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(
                        automation_id = %automation.id,
                        trigger,
                        error = %e,
                        "condition evaluation failed, skipping automation"
                    );
                    continue;
                }
            }

            let started_at = Utc::now();
            let mut results = Vec::with_capacity(automation.actions.len());
            for spec in &automation.actions {
                let outcome = self.run_action(tenant_id, spec, data, simulate).await;
                results.push(ActionResult {
                    automation_id: automation.id,
                    automation_name: automation.name.clone(),
                    action_type: spec.kind.clone(),
                    outcome,
                });
            }

            if !simulate {
                self.log_execution(automation, trigger, data, &results, started_at)
                    .await;
            }
            actions.extend(results);
        }

        let outcome = TriggerOutcome {
            success: true,
            actions,
            duration_ms: clock.elapsed().as_millis() as u64,
            message: None,
        };
        info!(
            tenant_id = %tenant_id,
            trigger,
            simulate,
            actions = outcome.actions.len(),
            "automation trigger evaluated"
        );
        Ok(outcome)
    }

    async fn log_execution(
        &self,
        automation: &Automation,
        trigger: &str,
        data: &EventData,
        results: &[ActionResult],
        started_at: chrono::DateTime<Utc>,
    ) {
        let completed_at = Utc::now();
        let record = ExecutionRecord::new(
            automation.tenant_id,
            automation.id,
            trigger,
            data.clone(),
            results.to_vec(),
            started_at,
            completed_at,
        );
        let status = record.status;

        if let Err(e) = self.automations.append_execution(record).await {
            warn!(automation_id = %automation.id, error = %e, "failed to log automation execution");
        }
        if let Err(e) = self
            .automations
            .record_run(automation.tenant_id, automation.id, completed_at)
            .await
        {
            warn!(automation_id = %automation.id, error = %e, "failed to record automation run");
        }
        debug!(automation_id = %automation.id, status = status.as_str(), "automation executed");
    }

    /// Failures become a `failed` result; they never stop the next action.
    async fn run_action(
        &self,
        tenant_id: TenantId,
        spec: &ActionSpec,
        data: &EventData,
        simulate: bool,
    ) -> ActionOutcome {
        let result = match spec.parse() {
            Ok(Action::SendEmail(action)) => self.send_email(tenant_id, &action, data, simulate).await,
            Ok(Action::SendWhatsapp(action)) => {
                self.send_whatsapp(tenant_id, &action, data, simulate).await
            }
            Ok(Action::SendWebhook(action)) => {
                self.send_webhook(tenant_id, &action, data, simulate).await
            }
            Ok(Action::UpdateField(action)) => {
                self.update_field(tenant_id, &action, data, simulate).await
            }
            Err(e) => Err(e.to_string()),
        };
        result.unwrap_or_else(|error| ActionOutcome::Failed { error })
    }

    async fn send_email(
        &self,
        tenant_id: TenantId,
        action: &EmailAction,
        data: &EventData,
        simulate: bool,
    ) -> Result<ActionOutcome, String> {
        let recipient = recipient(action.to.as_deref(), data, "clientEmail");
        let subject = render_template(action.subject.as_deref().unwrap_or_default(), data);
        let body = render_template(action.template.as_deref().unwrap_or_default(), data);

        if simulate {
            return Ok(simulated(json!({
                "recipient": recipient,
                "subject": subject,
                "preview": preview(&body, PREVIEW_CHARS),
            })));
        }

        let job_id = self
            .enqueue(
                tenant_id,
                JobType::SendEmail,
                Priority::Normal,
                addressed(json!({ "subject": subject, "html": body }), recipient.as_deref()),
            )
            .await?;
        Ok(queued(job_id, json!({ "recipient": recipient })))
    }

    async fn send_whatsapp(
        &self,
        tenant_id: TenantId,
        action: &WhatsAppAction,
        data: &EventData,
        simulate: bool,
    ) -> Result<ActionOutcome, String> {
        let recipient = recipient(action.to.as_deref(), data, "clientPhone");
        let message = render_template(action.message.as_deref().unwrap_or_default(), data);

        if simulate {
            return Ok(simulated(json!({
                "recipient": recipient,
                "preview": preview(&message, PREVIEW_CHARS),
            })));
        }

        let job_id = self
            .enqueue(
                tenant_id,
                JobType::SendWhatsapp,
                Priority::Normal,
                addressed(json!({ "message": message }), recipient.as_deref()),
            )
            .await?;
        Ok(queued(job_id, json!({ "recipient": recipient })))
    }

    async fn send_webhook(
        &self,
        tenant_id: TenantId,
        action: &WebhookAction,
        data: &EventData,
        simulate: bool,
    ) -> Result<ActionOutcome, String> {
        if simulate {
            return Ok(simulated(json!({
                "url": action.url,
                "method": action.method,
                "payload": data,
            })));
        }

        let job_id = self
            .enqueue(
                tenant_id,
                JobType::SendWebhook,
                Priority::Low,
                json!({
                    "url": action.url,
                    "method": action.method,
                    "headers": action.headers,
                    "body": data,
                }),
            )
            .await?;
        Ok(queued(job_id, json!({ "url": action.url })))
    }

    async fn update_field(
        &self,
        tenant_id: TenantId,
        action: &UpdateFieldAction,
        data: &EventData,
        simulate: bool,
    ) -> Result<ActionOutcome, String> {
        let entity_id = action
            .entity_id
            .clone()
            .or_else(|| data.get("invoiceId").and_then(JsonValue::as_str).map(str::to_string))
            .ok_or("no entity id for update_field")?;

        if simulate {
            return Ok(simulated(json!({
                "entityType": action.entity_type,
                "entityId": entity_id,
                "field": action.field,
                "value": action.value,
            })));
        }

        if action.entity_type != "invoice" || action.field != "status" {
            return Err(format!(
                "cannot update {}.{}",
                action.entity_type, action.field
            ));
        }
        let invoice_id: InvoiceId = entity_id
            .parse()
            .map_err(|e| format!("invalid invoice id: {e}"))?;
        let status: InvoiceStatus = action
            .value
            .as_str()
            .ok_or("status value must be a string")?
            .parse()
            .map_err(|e: oryxa_core::DomainError| e.to_string())?;

        self.invoices
            .set_status(tenant_id, invoice_id, status, Utc::now())
            .await
            .map_err(|e| e.to_string())?;

        Ok(ActionOutcome::Queued {
            job_id: None,
            detail: object(json!({
                "entityType": action.entity_type,
                "entityId": entity_id,
                "updated": true,
            })),
        })
    }

    async fn enqueue(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        priority: Priority,
        payload: JsonValue,
    ) -> Result<String, String> {
        let request = NewJob::new(tenant_id, job_type, payload).with_priority(priority);
        self.queue
            .enqueue(request)
            .await
            .map(|id| id.to_string())
            .map_err(|e| e.to_string())
    }
}

/// Configured recipient (templated), falling back to an event field.
fn recipient(configured: Option<&str>, data: &EventData, fallback: &str) -> Option<String> {
    configured
        .map(|to| render_template(to, data))
        .filter(|to| !to.trim().is_empty())
        .or_else(|| {
            data.get(fallback)
                .and_then(JsonValue::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        })
}

/// An unresolved recipient leaves `to` out; the delivery handler rejects it.
fn addressed(mut payload: JsonValue, recipient: Option<&str>) -> JsonValue {
    if let (Some(to), JsonValue::Object(map)) = (recipient, &mut payload) {
        map.insert("to".into(), json!(to));
    }
    payload
}

fn object(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

fn simulated(preview: JsonValue) -> ActionOutcome {
    ActionOutcome::Simulated {
        preview: object(preview),
    }
}

fn queued(job_id: String, detail: JsonValue) -> ActionOutcome {
    ActionOutcome::Queued {
        job_id: Some(job_id),
        detail: object(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oryxa_automations::{Condition, ExecutionStatus, Operator};

    use crate::automations::store::InMemoryAutomationStore;
    use crate::jobs::{InMemoryJobStore, JobStatus, RetryPolicy};
    use crate::records::{InMemoryInvoiceStore, invoice_for};

    struct Fixture {
        engine: AutomationEngine,
        automations: Arc<InMemoryAutomationStore>,
        queue: Arc<JobQueue>,
        invoices: Arc<InMemoryInvoiceStore>,
        tenant: TenantId,
    }

    fn fixture() -> Fixture {
        let automations = Arc::new(InMemoryAutomationStore::new());
        let queue = Arc::new(JobQueue::local(
            Arc::new(InMemoryJobStore::new()),
            RetryPolicy::default(),
        ));
        let invoices = Arc::new(InMemoryInvoiceStore::new());
        Fixture {
            engine: AutomationEngine::new(automations.clone(), queue.clone(), invoices.clone()),
            automations,
            queue,
            invoices,
            tenant: TenantId::new(),
        }
    }

    fn overdue_data(days: i64) -> EventData {
        object(json!({
            "invoiceId": InvoiceId::new().to_string(),
            "invoiceNumber": "INV-7",
            "clientName": "Jane",
            "clientEmail": "jane@client.test",
            "clientPhone": "+15550100",
            "status": "overdue",
            "daysOverdue": days,
        }))
    }

    fn reminder(tenant: TenantId) -> Automation {
        Automation::new(tenant, "Overdue reminder", "invoice_overdue")
            .with_condition(Condition::new("daysOverdue", Operator::GreaterThan, json!(7)))
            .with_action(ActionSpec::new(
                "send_email",
                json!({
                    "subject": "Invoice {{invoiceNumber}} is overdue",
                    "template": "Hi {{clientName}}, invoice {{invoiceNumber}} is {{daysOverdue}} days late."
                }),
            ))
    }

    #[tokio::test]
    async fn live_trigger_queues_jobs_and_logs_execution() {
        let f = fixture();
        let automation = reminder(f.tenant);
        let id = automation.id;
        f.automations.save(automation).await.unwrap();

        let outcome = f
            .engine
            .trigger(f.tenant, "invoice_overdue", &overdue_data(10), false)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.actions.len(), 1);
        let ActionOutcome::Queued { job_id: Some(job_id), detail } = &outcome.actions[0].outcome
        else {
            panic!("expected queued outcome, got {:?}", outcome.actions[0].outcome);
        };
        assert_eq!(detail["recipient"], "jane@client.test");

        let job = f.queue.get_job_status(job_id.parse().unwrap()).await.unwrap().unwrap();
        assert_eq!(job.job_type, JobType::SendEmail);
        assert_eq!(job.priority, Priority::Normal);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.payload["subject"], "Invoice INV-7 is overdue");
        assert_eq!(job.payload["html"], "Hi Jane, invoice INV-7 is 10 days late.");

        let executions = f.automations.executions(f.tenant, Some(id)).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Success);
        assert_eq!(f.automations.get(id).unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn unresolved_recipient_still_queues_the_email() {
        let f = fixture();
        f.automations
            .save(
                Automation::new(f.tenant, "bare reminder", "invoice_overdue")
                    .with_condition(Condition::new("daysOverdue", Operator::GreaterThan, json!(7)))
                    .with_action(ActionSpec::new(
                        "send_email",
                        json!({ "subject": "Reminder {{invoiceNumber}}" }),
                    )),
            )
            .await
            .unwrap();

        let data = object(json!({ "daysOverdue": 10, "invoiceNumber": "INV-1" }));
        let outcome = f
            .engine
            .trigger(f.tenant, "invoice_overdue", &data, false)
            .await
            .unwrap();

        let ActionOutcome::Queued { job_id: Some(job_id), .. } = &outcome.actions[0].outcome else {
            panic!("expected queued outcome, got {:?}", outcome.actions[0].outcome);
        };
        let job = f.queue.get_job_status(job_id.parse().unwrap()).await.unwrap().unwrap();
        assert_eq!(job.job_type, JobType::SendEmail);
        assert_eq!(job.payload["subject"], "Reminder INV-1");
        assert!(job.payload.get("to").is_none());
        assert_eq!(f.queue.stats().await.unwrap().pending_count, 1);
    }

    #[tokio::test]
    async fn simulate_has_no_side_effects() {
        let f = fixture();
        let automation = reminder(f.tenant);
        let id = automation.id;
        f.automations.save(automation).await.unwrap();

        let outcome = f
            .engine
            .trigger(f.tenant, "invoice_overdue", &overdue_data(10), true)
            .await
            .unwrap();

        let ActionOutcome::Simulated { preview } = &outcome.actions[0].outcome else {
            panic!("expected simulated outcome");
        };
        assert_eq!(preview["subject"], "Invoice INV-7 is overdue");
        assert_eq!(preview["preview"], "Hi Jane, invoice INV-7 is 10 days late.");

        assert_eq!(f.queue.stats().await.unwrap().pending_count, 0);
        assert!(f.automations.executions(f.tenant, None).await.unwrap().is_empty());
        assert_eq!(f.automations.get(id).unwrap().run_count, 0);
    }

    #[tokio::test]
    async fn failed_conditions_skip_the_automation() {
        let f = fixture();
        f.automations.save(reminder(f.tenant)).await.unwrap();

        let outcome = f
            .engine
            .trigger(f.tenant, "invoice_overdue", &overdue_data(3), false)
            .await
            .unwrap();

        assert!(outcome.actions.is_empty());
        assert_eq!(outcome.message, None);
        assert!(f.automations.executions(f.tenant, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_listener_reports_message() {
        let f = fixture();
        f.automations.save(reminder(f.tenant)).await.unwrap();

        let outcome = f
            .engine
            .trigger(f.tenant, "invoice_paid", &EventData::new(), false)
            .await
            .unwrap();

        assert_eq!(outcome.message.as_deref(), Some("No matching automations found"));
        assert!(outcome.actions.is_empty());
    }

    #[tokio::test]
    async fn condition_error_skips_only_that_automation() {
        let f = fixture();
        let broken = Automation::new(f.tenant, "broken", "invoice_overdue")
            .with_condition(Condition::new("daysOverdue", Operator::Contains, json!("1")))
            .with_action(ActionSpec::new("send_whatsapp", json!({ "message": "x" })));
        f.automations.save(broken).await.unwrap();
        f.automations.save(reminder(f.tenant)).await.unwrap();

        let outcome = f
            .engine
            .trigger(f.tenant, "invoice_overdue", &overdue_data(10), false)
            .await
            .unwrap();

        assert_eq!(outcome.actions.len(), 1);
        assert_eq!(outcome.actions[0].automation_name, "Overdue reminder");
    }

    #[tokio::test]
    async fn one_failing_action_does_not_block_the_next() {
        let f = fixture();
        let automation = Automation::new(f.tenant, "mixed", "invoice_overdue")
            .with_action(ActionSpec::new("create_task", json!({ "title": "call" })))
            .with_action(ActionSpec::new(
                "send_webhook",
                json!({ "url": "https://hooks.test/overdue" }),
            ));
        let id = automation.id;
        f.automations.save(automation).await.unwrap();

        let data = overdue_data(10);
        let outcome = f
            .engine
            .trigger(f.tenant, "invoice_overdue", &data, false)
            .await
            .unwrap();

        assert_eq!(
            outcome.actions[0].outcome,
            ActionOutcome::Failed {
                error: "Unknown action type: create_task".into()
            }
        );
        let ActionOutcome::Queued { job_id: Some(job_id), .. } = &outcome.actions[1].outcome else {
            panic!("expected webhook to be queued");
        };
        let job = f.queue.get_job_status(job_id.parse().unwrap()).await.unwrap().unwrap();
        assert_eq!(job.priority, Priority::Low);
        assert_eq!(job.payload["method"], "POST");
        assert_eq!(job.payload["body"], JsonValue::Object(data));

        let executions = f.automations.executions(f.tenant, Some(id)).await.unwrap();
        assert_eq!(executions[0].status, ExecutionStatus::Partial);
    }

    #[tokio::test]
    async fn update_field_sets_invoice_status() {
        let f = fixture();
        let invoice = invoice_for(f.tenant);
        let invoice_id = invoice.id;
        f.invoices.insert(invoice).await.unwrap();
        f.automations
            .save(
                Automation::new(f.tenant, "mark overdue", "invoice_overdue").with_action(
                    ActionSpec::new("update_field", json!({ "field": "status", "value": "overdue" })),
                ),
            )
            .await
            .unwrap();

        let mut data = overdue_data(10);
        data.insert("invoiceId".into(), json!(invoice_id.to_string()));

        let simulated = f
            .engine
            .trigger(f.tenant, "invoice_overdue", &data, true)
            .await
            .unwrap();
        assert!(matches!(simulated.actions[0].outcome, ActionOutcome::Simulated { .. }));
        assert_eq!(
            f.invoices.get(f.tenant, invoice_id).await.unwrap().status,
            InvoiceStatus::Draft
        );

        f.engine
            .trigger(f.tenant, "invoice_overdue", &data, false)
            .await
            .unwrap();
        assert_eq!(
            f.invoices.get(f.tenant, invoice_id).await.unwrap().status,
            InvoiceStatus::Overdue
        );
    }

    #[tokio::test]
    async fn simulated_preview_is_truncated() {
        let f = fixture();
        f.automations
            .save(Automation::new(f.tenant, "long", "invoice_sent").with_action(ActionSpec::new(
                "send_whatsapp",
                json!({ "to": "{{clientPhone}}", "message": "x".repeat(150) }),
            )))
            .await
            .unwrap();

        let outcome = f
            .engine
            .trigger(f.tenant, "invoice_sent", &overdue_data(0), true)
            .await
            .unwrap();

        let ActionOutcome::Simulated { preview } = &outcome.actions[0].outcome else {
            panic!("expected simulated outcome");
        };
        assert_eq!(preview["recipient"], "+15550100");
        assert_eq!(preview["preview"], format!("{}...", "x".repeat(100)));
    }
}
