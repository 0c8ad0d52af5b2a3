//! Business events delivered to the automation engine over a bounded channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use oryxa_automations::EventData;
use oryxa_core::TenantId;

use super::engine::AutomationEngine;

/// Something happened to a tenant's data, e.g. `invoice_overdue`.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationEvent {
    pub tenant_id: TenantId,
    pub trigger: String,
    pub data: EventData,
}

impl AutomationEvent {
    pub fn new(tenant_id: TenantId, trigger: impl Into<String>, data: EventData) -> Self {
        Self {
            tenant_id,
            trigger: trigger.into(),
            data,
        }
    }
}

/// Publishing side of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AutomationEventSender {
    tx: mpsc::Sender<AutomationEvent>,
}

impl AutomationEventSender {
    /// Waits while the channel is full. Returns `false` once the listener is gone.
    pub async fn publish(&self, event: AutomationEvent) -> bool {
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                warn!(trigger = %event.trigger, tenant_id = %event.tenant_id, "automation listener gone, event dropped");
                false
            }
        }
    }
}

pub fn event_channel(capacity: usize) -> (AutomationEventSender, mpsc::Receiver<AutomationEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AutomationEventSender { tx }, rx)
}

/// Run the engine (live mode) for every received event until cancelled or
/// every sender is dropped.
pub fn spawn_listener(
    engine: Arc<AutomationEngine>,
    mut rx: mpsc::Receiver<AutomationEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("automation listener started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match engine
                .trigger(event.tenant_id, &event.trigger, &event.data, false)
                .await
            {
                Ok(outcome) => debug!(
                    trigger = %event.trigger,
                    tenant_id = %event.tenant_id,
                    actions = outcome.actions.len(),
                    "automation event handled"
                ),
                Err(e) => error!(
                    trigger = %event.trigger,
                    tenant_id = %event.tenant_id,
                    error = %e,
                    "automation event failed"
                ),
            }
        }
        info!("automation listener stopped");
    })
}
