//! Football Data Ingestion v1.0
//!
//! Pulls competitions, standings and squads from the football data API,
//! caches the raw documents and loads them into a local SQLite store.

use anyhow::{Context, Result};
use football_ingestion::{run, Config};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("football_ingestion=info")),
        )
        .init();

    info!("Football Data Ingestion v1.0");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        store = %config.store_location,
        competitions = ?config.competitions,
        requests_per_minute = config.requests_per_minute.get(),
        skip_fetch = config.skip_fetch,
        "Configuration loaded"
    );

    let report = match run(&config).await {
        Ok(report) => report,
        Err(e) => {
            error!("Ingestion run aborted: {:#}", e);
            return Err(e);
        }
    };

    for failure in &report.failures {
        warn!(stage = ?failure.stage, unit = %failure.unit, "{}", failure.reason);
    }
    let totals = report.load.totals();
    info!(
        run_id = %report.run_id,
        requests = report.requests_issued,
        inserted = totals.inserted,
        skipped = totals.skipped,
        failed = totals.failed,
        "Done"
    );

    Ok(())
}
