//! Process wiring shared by the API and worker binaries: stores, adapters,
//! queue, handlers and the automation engine built from [`AppConfig`], plus
//! the background tasks that keep them running.

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::{
    DocumentRenderer, EmailSender, FsObjectStorage, HttpWebhookClient, InMemoryWebhookLogSink,
    MetaWhatsAppSender, PdfRenderer, PostgresWebhookLogSink, RecordingEmailSender,
    RecordingWhatsAppSender, SendGridSender, TwilioWhatsAppSender, WebhookLogSink, WhatsAppSender,
};
use crate::automations::{
    AutomationEngine, AutomationEventSender, AutomationStore, InMemoryAutomationStore,
    PostgresAutomationStore, event_channel, spawn_listener, spawn_overdue_scan,
};
use crate::config::{AppConfig, DeliveryMode, QueueMode, WhatsAppConfig};
use crate::db::{self, DbPool};
use crate::jobs::{
    HandlerDeps, HandlerRegistry, InMemoryJobStore, JobQueue, JobStore, PostgresJobStore, Worker,
    WorkerHandle, WorkerStats, spawn_reconciler,
};
use crate::records::{InMemoryInvoiceStore, InvoiceStore, PostgresInvoiceStore};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything a process needs to serve requests and run jobs.
#[derive(Clone)]
pub struct Services {
    pub queue: Arc<JobQueue>,
    pub invoices: Arc<dyn InvoiceStore>,
    pub automations: Arc<dyn AutomationStore>,
    pub engine: Arc<AutomationEngine>,
    pub handlers: HandlerRegistry,
}

impl Services {
    /// Connect to Postgres when `DATABASE_URL` is set, otherwise use
    /// in-memory stores.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let pool = match &config.database_url {
            Some(url) => {
                let pool = db::connect(url)
                    .await
                    .context("failed to connect to database")?;
                db::ensure_schema(&pool)
                    .await
                    .context("failed to ensure database schema")?;
                info!("using postgres stores");
                Some(pool)
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory stores");
                None
            }
        };
        Self::build(config, pool)
    }

    fn build(config: &AppConfig, pool: Option<DbPool>) -> anyhow::Result<Self> {
        let (jobs, invoices, automations, webhook_logs): (
            Arc<dyn JobStore>,
            Arc<dyn InvoiceStore>,
            Arc<dyn AutomationStore>,
            Arc<dyn WebhookLogSink>,
        ) = match pool {
            Some(pool) => (
                Arc::new(PostgresJobStore::new(pool.clone())),
                Arc::new(PostgresInvoiceStore::new(pool.clone())),
                Arc::new(PostgresAutomationStore::new(pool.clone())),
                Arc::new(PostgresWebhookLogSink::new(pool)),
            ),
            None => (
                Arc::new(InMemoryJobStore::new()),
                Arc::new(InMemoryInvoiceStore::new()),
                Arc::new(InMemoryAutomationStore::new()),
                Arc::new(InMemoryWebhookLogSink::new()),
            ),
        };

        let queue = Arc::new(match config.queue_mode {
            QueueMode::Local => JobQueue::local(jobs, config.retry.clone()),
            QueueMode::Shared => JobQueue::shared(jobs, config.retry.clone()),
        });

        let (email, whatsapp) = delivery_adapters(config)?;
        let renderer: Arc<dyn DocumentRenderer> = Arc::new(PdfRenderer::new());
        let handlers = HandlerRegistry::standard(HandlerDeps {
            invoices: invoices.clone(),
            renderer,
            storage: Arc::new(FsObjectStorage::new(
                config.storage.dir.clone(),
                config.storage.public_base_url.clone(),
            )),
            email,
            whatsapp,
            webhooks: Arc::new(HttpWebhookClient::new().context("failed to build webhook client")?),
            webhook_logs,
        });

        let engine = Arc::new(AutomationEngine::new(
            automations.clone(),
            queue.clone(),
            invoices.clone(),
        ));

        Ok(Self {
            queue,
            invoices,
            automations,
            engine,
            handlers,
        })
    }

    /// Recover the queue, then start the worker (when `with_worker`) and the
    /// periodic tasks enabled in `config`.
    pub async fn start_background(
        &self,
        config: &AppConfig,
        with_worker: bool,
    ) -> anyhow::Result<Background> {
        self.queue
            .recover(config.recovery_stale_after)
            .await
            .context("queue recovery failed")?;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let (events, rx) = event_channel(EVENT_CHANNEL_CAPACITY);
        tasks.push(spawn_listener(self.engine.clone(), rx, cancel.clone()));

        if let Some(interval) = config.reconcile_interval {
            tasks.push(spawn_reconciler(
                self.queue.clone(),
                interval,
                config.recovery_stale_after,
                cancel.clone(),
            ));
        }
        if let Some(interval) = config.overdue_scan_interval {
            tasks.push(spawn_overdue_scan(
                self.invoices.clone(),
                events.clone(),
                interval,
                cancel.clone(),
            ));
        }

        let worker = with_worker.then(|| {
            Worker::new(self.queue.clone(), self.handlers.clone(), config.worker.clone())
                .spawn(cancel.child_token())
        });

        Ok(Background {
            cancel,
            worker,
            tasks,
            events,
        })
    }
}

fn delivery_adapters(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn EmailSender>, Arc<dyn WhatsAppSender>)> {
    if config.delivery.mode == DeliveryMode::Log {
        info!("delivery mode is log, notifications are recorded only");
        return Ok((
            Arc::new(RecordingEmailSender::new()),
            Arc::new(RecordingWhatsAppSender::new()),
        ));
    }

    let email: Arc<dyn EmailSender> = match &config.delivery.sendgrid {
        Some(sendgrid) => Arc::new(
            SendGridSender::new(sendgrid.clone()).context("failed to build email sender")?,
        ),
        None => {
            warn!("SENDGRID_API_KEY not set, email delivery is recorded only");
            Arc::new(RecordingEmailSender::new())
        }
    };

    let whatsapp: Arc<dyn WhatsAppSender> = match &config.delivery.whatsapp {
        Some(WhatsAppConfig::Meta {
            phone_id,
            access_token,
        }) => Arc::new(
            MetaWhatsAppSender::new(phone_id.as_str(), access_token.as_str())
                .context("failed to build whatsapp sender")?,
        ),
        Some(WhatsAppConfig::Twilio {
            account_sid,
            auth_token,
            from,
        }) => Arc::new(
            TwilioWhatsAppSender::new(account_sid.as_str(), auth_token.as_str(), from.as_str())
                .context("failed to build whatsapp sender")?,
        ),
        None => {
            warn!("whatsapp credentials not set, whatsapp delivery is recorded only");
            Arc::new(RecordingWhatsAppSender::new())
        }
    };

    Ok((email, whatsapp))
}

/// Running background tasks; dropping it does not stop them, call
/// [`shutdown`](Self::shutdown).
pub struct Background {
    cancel: CancellationToken,
    worker: Option<WorkerHandle>,
    tasks: Vec<JoinHandle<()>>,
    events: AutomationEventSender,
}

impl Background {
    /// Sender feeding the automation listener.
    pub fn events(&self) -> AutomationEventSender {
        self.events.clone()
    }

    pub fn worker_stats(&self) -> Option<WorkerStats> {
        self.worker.as_ref().map(WorkerHandle::stats)
    }

    /// Stop every task; the worker finishes its in-flight job first.
    pub async fn shutdown(self) {
        info!("stopping background tasks");
        if let Some(worker) = self.worker {
            worker.shutdown().await;
        }
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "background task panicked");
            }
        }
    }
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
