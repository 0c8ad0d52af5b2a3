//! Postgres-backed automation rules (`automations`) and execution log
//! (`automation_executions`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use oryxa_automations::{Automation, ExecutionRecord, ExecutionStatus, Trigger};
use oryxa_core::{AutomationId, TenantId};

use super::store::{AutomationStore, AutomationStoreError};

#[derive(Debug, Clone)]
pub struct PostgresAutomationStore {
    pool: Arc<PgPool>,
}

impl PostgresAutomationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl AutomationStore for PostgresAutomationStore {
    #[instrument(skip(self, automation), fields(automation_id = %automation.id), err)]
    async fn save(&self, automation: Automation) -> Result<(), AutomationStoreError> {
        sqlx::query(
            r#"
            INSERT INTO automations (
                id, tenant_id, name, enabled, trigger, actions, run_count, last_run_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                enabled = EXCLUDED.enabled,
                trigger = EXCLUDED.trigger,
                actions = EXCLUDED.actions,
                run_count = EXCLUDED.run_count,
                last_run_at = EXCLUDED.last_run_at,
                updated_at = NOW()
            "#,
        )
        .bind(automation.id.as_uuid())
        .bind(automation.tenant_id.as_uuid())
        .bind(&automation.name)
        .bind(automation.enabled)
        .bind(to_json(&automation.trigger)?)
        .bind(to_json(&automation.actions)?)
        .bind(automation.run_count as i64)
        .bind(automation.last_run_at)
        .execute(&*self.pool)
        .await
        .map_err(storage("save_automation"))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_enabled(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<Automation>, AutomationStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, name, enabled, trigger, actions, run_count, last_run_at
            FROM automations
            WHERE tenant_id = $1 AND enabled = TRUE
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(storage("list_enabled"))?;

        rows.iter().map(automation_from_row).collect()
    }

    #[instrument(skip(self), fields(automation_id = %id), err)]
    async fn record_run(
        &self,
        tenant_id: TenantId,
        id: AutomationId,
        at: DateTime<Utc>,
    ) -> Result<(), AutomationStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE automations
            SET run_count = run_count + 1, last_run_at = $3, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(storage("record_run"))?;

        if result.rows_affected() == 0 {
            return Err(AutomationStoreError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self, record), fields(automation_id = %record.automation_id, status = record.status.as_str()), err)]
    async fn append_execution(&self, record: ExecutionRecord) -> Result<(), AutomationStoreError> {
        sqlx::query(
            r#"
            INSERT INTO automation_executions (
                id, tenant_id, automation_id, trigger, status, event_data, results,
                started_at, completed_at, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.tenant_id.as_uuid())
        .bind(record.automation_id.as_uuid())
        .bind(&record.trigger)
        .bind(record.status.as_str())
        .bind(JsonValue::Object(record.event_data))
        .bind(to_json(&record.results)?)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.duration_ms as i64)
        .execute(&*self.pool)
        .await
        .map_err(storage("append_execution"))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn executions(
        &self,
        tenant_id: TenantId,
        automation_id: Option<AutomationId>,
    ) -> Result<Vec<ExecutionRecord>, AutomationStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, automation_id, trigger, status, event_data, results,
                   started_at, completed_at, duration_ms
            FROM automation_executions
            WHERE tenant_id = $1 AND ($2::uuid IS NULL OR automation_id = $2)
            ORDER BY started_at ASC, id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(automation_id.map(Uuid::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(storage("list_executions"))?;

        rows.iter().map(execution_from_row).collect()
    }
}

fn automation_from_row(row: &PgRow) -> Result<Automation, AutomationStoreError> {
    let decode = storage("decode_automation");
    let trigger: JsonValue = row.try_get("trigger").map_err(&decode)?;
    let actions: JsonValue = row.try_get("actions").map_err(&decode)?;
    let run_count: i64 = row.try_get("run_count").map_err(&decode)?;

    Ok(Automation {
        id: AutomationId::from_uuid(row.try_get("id").map_err(&decode)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(&decode)?),
        name: row.try_get("name").map_err(&decode)?,
        enabled: row.try_get("enabled").map_err(&decode)?,
        trigger: from_json::<Trigger>(trigger)?,
        actions: from_json(actions)?,
        run_count: run_count.max(0) as u64,
        last_run_at: row.try_get("last_run_at").map_err(&decode)?,
    })
}

fn execution_from_row(row: &PgRow) -> Result<ExecutionRecord, AutomationStoreError> {
    let decode = storage("decode_execution");
    let status: String = row.try_get("status").map_err(&decode)?;
    let status = match status.as_str() {
        "success" => ExecutionStatus::Success,
        "partial" => ExecutionStatus::Partial,
        "failed" => ExecutionStatus::Failed,
        other => {
            return Err(AutomationStoreError::Storage(format!(
                "unknown execution status: {other}"
            )));
        }
    };
    let event_data: JsonValue = row.try_get("event_data").map_err(&decode)?;
    let results: JsonValue = row.try_get("results").map_err(&decode)?;
    let duration_ms: i64 = row.try_get("duration_ms").map_err(&decode)?;

    Ok(ExecutionRecord {
        id: row.try_get("id").map_err(&decode)?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(&decode)?),
        automation_id: AutomationId::from_uuid(row.try_get("automation_id").map_err(&decode)?),
        trigger: row.try_get("trigger").map_err(&decode)?,
        status,
        event_data: from_json(event_data)?,
        results: from_json(results)?,
        started_at: row.try_get("started_at").map_err(&decode)?,
        completed_at: row.try_get("completed_at").map_err(&decode)?,
        duration_ms: duration_ms.max(0) as u64,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<JsonValue, AutomationStoreError> {
    serde_json::to_value(value).map_err(|e| AutomationStoreError::Storage(format!("serialize: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(value: JsonValue) -> Result<T, AutomationStoreError> {
    serde_json::from_value(value)
        .map_err(|e| AutomationStoreError::Storage(format!("invalid stored json: {e}")))
}

fn storage(operation: &'static str) -> impl Fn(sqlx::Error) -> AutomationStoreError {
    move |e| AutomationStoreError::Storage(format!("sqlx error in {operation}: {e}"))
}
