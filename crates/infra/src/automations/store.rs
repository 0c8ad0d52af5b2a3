use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use oryxa_automations::{Automation, ExecutionRecord};
use oryxa_core::{AutomationId, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomationStoreError {
    #[error("automation not found: {0}")]
    NotFound(AutomationId),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Tenant automation rules and their append-only execution log.
#[async_trait]
pub trait AutomationStore: Send + Sync {
    /// Insert or replace a rule.
    async fn save(&self, automation: Automation) -> Result<(), AutomationStoreError>;

    async fn list_enabled(&self, tenant_id: TenantId)
    -> Result<Vec<Automation>, AutomationStoreError>;

    /// Bump run count and last-run time after a live execution.
    async fn record_run(
        &self,
        tenant_id: TenantId,
        id: AutomationId,
        at: DateTime<Utc>,
    ) -> Result<(), AutomationStoreError>;

    async fn append_execution(&self, record: ExecutionRecord) -> Result<(), AutomationStoreError>;

    /// Executions for a tenant, oldest first, optionally for one automation.
    async fn executions(
        &self,
        tenant_id: TenantId,
        automation_id: Option<AutomationId>,
    ) -> Result<Vec<ExecutionRecord>, AutomationStoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    automations: Vec<Automation>,
    executions: Vec<ExecutionRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryAutomationStore {
    inner: RwLock<Inner>,
}

impl InMemoryAutomationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored copy of a rule, enabled or not.
    pub fn get(&self, id: AutomationId) -> Option<Automation> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .automations
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }
}

#[async_trait]
impl AutomationStore for InMemoryAutomationStore {
    async fn save(&self, automation: Automation) -> Result<(), AutomationStoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.automations.iter_mut().find(|a| a.id == automation.id) {
            Some(existing) => *existing = automation,
            None => inner.automations.push(automation),
        }
        Ok(())
    }

    async fn list_enabled(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<Automation>, AutomationStoreError> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .automations
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.enabled)
            .cloned()
            .collect())
    }

    async fn record_run(
        &self,
        tenant_id: TenantId,
        id: AutomationId,
        at: DateTime<Utc>,
    ) -> Result<(), AutomationStoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let automation = inner
            .automations
            .iter_mut()
            .find(|a| a.id == id && a.tenant_id == tenant_id)
            .ok_or(AutomationStoreError::NotFound(id))?;
        automation.record_run(at);
        Ok(())
    }

    async fn append_execution(&self, record: ExecutionRecord) -> Result<(), AutomationStoreError> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .executions
            .push(record);
        Ok(())
    }

    async fn executions(
        &self,
        tenant_id: TenantId,
        automation_id: Option<AutomationId>,
    ) -> Result<Vec<ExecutionRecord>, AutomationStoreError> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .executions
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| automation_id.is_none_or(|id| r.automation_id == id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_only_enabled_rules_of_the_tenant() {
        let store = InMemoryAutomationStore::new();
        let tenant = TenantId::new();
        let active = Automation::new(tenant, "active", "invoice_overdue");
        let active_id = active.id;
        store.save(active).await.unwrap();
        store
            .save(Automation::new(tenant, "off", "invoice_overdue").disabled())
            .await
            .unwrap();
        store
            .save(Automation::new(TenantId::new(), "other", "invoice_overdue"))
            .await
            .unwrap();

        let listed = store.list_enabled(tenant).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active_id);
    }

    #[tokio::test]
    async fn save_replaces_existing_rule() {
        let store = InMemoryAutomationStore::new();
        let automation = Automation::new(TenantId::new(), "v1", "invoice_paid");
        let id = automation.id;
        store.save(automation.clone()).await.unwrap();

        let mut renamed = automation;
        renamed.name = "v2".into();
        store.save(renamed).await.unwrap();

        assert_eq!(store.get(id).unwrap().name, "v2");
    }

    #[tokio::test]
    async fn record_run_is_tenant_scoped() {
        let store = InMemoryAutomationStore::new();
        let tenant = TenantId::new();
        let automation = Automation::new(tenant, "r", "invoice_paid");
        let id = automation.id;
        store.save(automation).await.unwrap();

        assert_eq!(
            store.record_run(TenantId::new(), id, Utc::now()).await,
            Err(AutomationStoreError::NotFound(id))
        );
        store.record_run(tenant, id, Utc::now()).await.unwrap();
        assert_eq!(store.get(id).unwrap().run_count, 1);
    }
}
