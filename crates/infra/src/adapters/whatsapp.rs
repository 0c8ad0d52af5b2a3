//! WhatsApp delivery through the Meta Cloud API or Twilio.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use super::{AdapterError, DeliveryReceipt, ensure_success, http_client};

const META_GRAPH_URL: &str = "https://graph.facebook.com/v18.0";
const TWILIO_API_URL: &str = "https://api.twilio.com/2010-04-01";

/// Outbound WhatsApp message; `media_url` is sent as a document attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhatsAppMessage {
    pub to: String,
    pub body: String,
    pub media_url: Option<String>,
}

#[async_trait]
pub trait WhatsAppSender: Send + Sync {
    async fn send(&self, message: &WhatsAppMessage) -> Result<DeliveryReceipt, AdapterError>;
}

/// Meta WhatsApp Business Cloud API.
pub struct MetaWhatsAppSender {
    client: reqwest::Client,
    phone_id: String,
    access_token: String,
    base_url: String,
}

impl MetaWhatsAppSender {
    pub fn new(
        phone_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http_client()?,
            phone_id: phone_id.into(),
            access_token: access_token.into(),
            base_url: META_GRAPH_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn payload(message: &WhatsAppMessage) -> JsonValue {
        let to: String = message.to.chars().filter(char::is_ascii_digit).collect();
        match &message.media_url {
            Some(link) => json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "document",
                "document": { "link": link, "caption": message.body },
            }),
            None => json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "text",
                "text": { "body": message.body },
            }),
        }
    }
}

#[async_trait]
impl WhatsAppSender for MetaWhatsAppSender {
    async fn send(&self, message: &WhatsAppMessage) -> Result<DeliveryReceipt, AdapterError> {
        let url = format!("{}/{}/messages", self.base_url, self.phone_id);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&Self::payload(message))
            .send()
            .await?;
        let body: JsonValue = ensure_success(response).await?.json().await?;

        let message_id = body["messages"][0]["id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        tracing::info!(to = %message.to, %message_id, provider = "meta", "whatsapp sent");
        Ok(DeliveryReceipt { message_id })
    }
}

/// Twilio Programmable Messaging with a WhatsApp-enabled sender.
pub struct TwilioWhatsAppSender {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    /// Sender number, without the `whatsapp:` prefix.
    from: String,
    base_url: String,
}

impl TwilioWhatsAppSender {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from: impl Into<String>,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http_client()?,
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from: from.into(),
            base_url: TWILIO_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl WhatsAppSender for TwilioWhatsAppSender {
    async fn send(&self, message: &WhatsAppMessage) -> Result<DeliveryReceipt, AdapterError> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );
        let mut form = vec![
            ("From", format!("whatsapp:{}", self.from)),
            ("To", format!("whatsapp:{}", message.to)),
            ("Body", message.body.clone()),
        ];
        if let Some(media) = &message.media_url {
            form.push(("MediaUrl", media.clone()));
        }

        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;
        let body: JsonValue = ensure_success(response).await?.json().await?;

        let message_id = body["sid"].as_str().unwrap_or_default().to_string();
        tracing::info!(to = %message.to, %message_id, provider = "twilio", "whatsapp sent");
        Ok(DeliveryReceipt { message_id })
    }
}

/// In-memory WhatsApp sender for `log` delivery mode and tests.
#[derive(Default)]
pub struct RecordingWhatsAppSender {
    sent: Mutex<Vec<WhatsAppMessage>>,
    failure: Mutex<Option<String>>,
}

impl RecordingWhatsAppSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = message.map(str::to_string);
    }

    pub fn sent(&self) -> Vec<WhatsAppMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl WhatsAppSender for RecordingWhatsAppSender {
    async fn send(&self, message: &WhatsAppMessage) -> Result<DeliveryReceipt, AdapterError> {
        if let Some(reason) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(AdapterError::Simulated(reason));
        }
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.push(message.clone());
        let message_id = format!("log_whatsapp_{}", sent.len());
        tracing::info!(to = %message.to, %message_id, "whatsapp recorded");
        Ok(DeliveryReceipt { message_id })
    }
}
