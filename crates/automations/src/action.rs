//! Automation actions.
//!
//! Actions are stored as loose `{type, config}` pairs so that rules written for
//! action kinds this build doesn't know still load. [`ActionSpec::parse`] turns
//! one into a typed [`Action`], or an [`ActionError`] the engine reports as a
//! failed action result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Stored action: a type key plus free-form configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: JsonValue,
}

impl ActionSpec {
    pub fn new(kind: impl Into<String>, config: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }

    pub fn parse(&self) -> Result<Action, ActionError> {
        let config = match &self.config {
            JsonValue::Null => JsonValue::Object(Map::new()),
            other => other.clone(),
        };
        let invalid = |source: serde_json::Error| ActionError::InvalidConfig {
            kind: self.kind.clone(),
            message: source.to_string(),
        };

        match self.kind.as_str() {
            "send_email" => Ok(Action::SendEmail(serde_json::from_value(config).map_err(invalid)?)),
            "send_whatsapp" => Ok(Action::SendWhatsapp(
                serde_json::from_value(config).map_err(invalid)?,
            )),
            "send_webhook" => Ok(Action::SendWebhook(
                serde_json::from_value(config).map_err(invalid)?,
            )),
            "update_field" => Ok(Action::UpdateField(
                serde_json::from_value(config).map_err(invalid)?,
            )),
            other => Err(ActionError::UnknownType(other.to_string())),
        }
    }
}

/// Typed automation action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendEmail(EmailAction),
    SendWhatsapp(WhatsAppAction),
    SendWebhook(WebhookAction),
    UpdateField(UpdateFieldAction),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::SendEmail(_) => "send_email",
            Action::SendWhatsapp(_) => "send_whatsapp",
            Action::SendWebhook(_) => "send_webhook",
            Action::UpdateField(_) => "update_field",
        }
    }
}

/// `send_email`: recipient defaults to the event's `clientEmail`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailAction {
    pub to: Option<String>,
    pub subject: Option<String>,
    pub template: Option<String>,
}

/// `send_whatsapp`: recipient defaults to the event's `clientPhone`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppAction {
    pub to: Option<String>,
    pub message: Option<String>,
}

/// `send_webhook`: the event data is sent as the request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAction {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Map<String, JsonValue>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// `update_field`: only invoice `status` is writable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFieldAction {
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    /// Defaults to the event's `invoiceId`.
    #[serde(default)]
    pub entity_id: Option<String>,
    pub field: String,
    pub value: JsonValue,
}

fn default_entity_type() -> String {
    "invoice".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("Unknown action type: {0}")]
    UnknownType(String),

    #[error("invalid `{kind}` config: {message}")]
    InvalidConfig { kind: String, message: String },
}
