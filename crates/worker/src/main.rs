use cardrecon_infra::{SettlementConfig, ShutdownSignal};
use cardrecon_worker::app::SettlementApp;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cardrecon_observability::init();

    let config = SettlementConfig::from_env()?;
    let app = SettlementApp::build(&config, ShutdownSignal::new())?;
    app.schedule_partners(&config)?;
    let handle = app.start(&config);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    let stats = handle.stats();
    handle.shutdown().await;
    tracing::info!(
        jobs_processed = stats.jobs_processed,
        jobs_succeeded = stats.jobs_succeeded,
        jobs_retried = stats.jobs_retried,
        jobs_held = stats.jobs_held,
        "settlement worker stopped"
    );
    Ok(())
}
