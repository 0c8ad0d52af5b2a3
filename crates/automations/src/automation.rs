use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use oryxa_core::{AutomationId, TenantId};

use crate::EventData;
use crate::action::ActionSpec;
use crate::condition::{Condition, ConditionError, evaluate_conditions};

/// What an automation listens for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: String,
    /// Absent or `null` means no conditions.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub conditions: Vec<Condition>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Condition>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Condition>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A tenant-defined rule: trigger + conditions → ordered actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub id: AutomationId,
    pub tenant_id: TenantId,
    pub name: String,
    pub enabled: bool,
    pub trigger: Trigger,
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Automation {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, trigger_type: impl Into<String>) -> Self {
        Self {
            id: AutomationId::new(),
            tenant_id,
            name: name.into(),
            enabled: true,
            trigger: Trigger {
                trigger_type: trigger_type.into(),
                conditions: Vec::new(),
            },
            actions: Vec::new(),
            run_count: 0,
            last_run_at: None,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.trigger.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Enabled and listening for `trigger`.
    pub fn listens_to(&self, trigger: &str) -> bool {
        self.enabled && self.trigger.trigger_type == trigger
    }

    pub fn matches(&self, data: &EventData) -> Result<bool, ConditionError> {
        evaluate_conditions(&self.trigger.conditions, data)
    }

    pub fn record_run(&mut self, at: DateTime<Utc>) {
        self.run_count += 1;
        self.last_run_at = Some(at);
    }
}
