use oryxa_api::app::{AppState, build_app};
use oryxa_infra::config::AppConfig;
use oryxa_infra::runtime::{Services, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    oryxa_observability::init();

    let config = AppConfig::from_env()?;
    let services = Services::from_config(&config).await?;
    let background = services
        .start_background(&config, config.embedded_worker)
        .await?;
    if !config.embedded_worker {
        tracing::info!("embedded worker disabled; run oryxa-worker to process jobs");
    }

    let app = build_app(AppState::new(&services).with_events(background.events()));

    let listener = tokio::net::TcpListener::bind(&config.api_bind_addr)
        .await
        .expect("failed to bind API listener");

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    background.shutdown().await;
    tracing::info!("api stopped");
    Ok(())
}
