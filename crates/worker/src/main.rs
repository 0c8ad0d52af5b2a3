//! Standalone job worker. Runs the processing loop plus queue reconciliation,
//! the overdue-invoice scan and the automation listener until SIGINT/SIGTERM.
//!
//! Several instances can share one Postgres database with `QUEUE_MODE=shared`.

use oryxa_infra::config::AppConfig;
use oryxa_infra::runtime::{Services, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    oryxa_observability::init();

    let config = AppConfig::from_env()?;
    if config.database_url.is_none() {
        tracing::warn!("no DATABASE_URL: this worker only sees jobs enqueued in its own process");
    }

    let services = Services::from_config(&config).await?;
    let background = services.start_background(&config, true).await?;
    tracing::info!(
        queue_mode = ?config.queue_mode,
        poll_interval_ms = config.worker.poll_interval.as_millis() as u64,
        "worker started"
    );

    shutdown_signal().await;

    if let Some(stats) = background.worker_stats() {
        tracing::info!(
            processed = stats.jobs_processed,
            succeeded = stats.jobs_succeeded,
            failed = stats.jobs_failed,
            retried = stats.jobs_retried,
            uptime_secs = stats.uptime_secs,
            "worker stopping"
        );
    }
    background.shutdown().await;
    Ok(())
}
