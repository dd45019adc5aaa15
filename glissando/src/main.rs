use glissando::config::AppConfig;
use glissando::logging;
use glissando::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guard = logging::init_logging(config.log_dir.as_deref())?;

    let container = ServiceContainer::new(config).await?;
    container.start();
    tracing::info!(host = process_utils::hostname(), "glissando started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C");

    container.shutdown().await?;
    Ok(())
}
