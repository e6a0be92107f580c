use anyhow::{Context, Result};
use crypto_portfolio_core::models::settings::Settings;
use crypto_portfolio_core::PortfolioServer;
use env_logger::Env;
use log::{error, info};

const DEFAULT_CONFIG: &str = "config/portfolio";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config_path = std::env::var("PORTFOLIO_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let settings = Settings::load(&config_path).with_context(|| format!("loading settings from {config_path}"))?;
    info!(
        "starting portfolio daemon (store: {}, credentials {})",
        settings.data_path.display(),
        if settings.credential_passphrase.is_some() { "sealed" } else { "in plaintext" }
    );

    let server = PortfolioServer::open(settings).context("opening record store")?;
    let jobs = server.start_background_jobs();

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown requested");

    for job in &jobs {
        job.stop();
    }
    drop(jobs);

    if let Err(e) = server.close().await {
        error!("failed to flush record store: {e}");
        return Err(e.into());
    }
    info!("bye");
    Ok(())
}
