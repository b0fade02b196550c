mod services;

use circlegraph_infra::config::Config;
use circlegraph_infra::workers::Projector;

/// Only one projector may apply events at a time.
const PROJECTOR_LOCK_KEY: &str = "projector";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    circlegraph_observability::init();

    let config = Config::from_env()?;
    let services = services::build_services(&config).await?;

    tracing::info!(lock_key = PROJECTOR_LOCK_KEY, "waiting for projector lock");
    let lock = services.lock.acquire(PROJECTOR_LOCK_KEY).await?;

    let projector = Projector::new(services.store, services.source, services.notifier)
        .with_page_size(config.page_size)
        .with_poll_interval(config.poll_interval);
    projector.run(shutdown_signal()).await;

    lock.release().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c; shutting down");
    }
}
