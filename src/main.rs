use inspection_harvester::harvest::{HarvestPipeline, NoveltyStore, StoreError};
use inspection_harvester::{telemetry, ConfigError, ExecutorError, HarvestExecutor, HarvesterConfig, HttpTransport};
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Runs one harvest pass and prints each new inspection as a JSON line.
#[tokio::main]
async fn main() -> Result<(), HarvestError> {
    let config = HarvesterConfig::load()?;
    telemetry::init(&config.logging).map_err(|e| HarvestError::Telemetry(e.to_string()))?;

    let store = NoveltyStore::open(&config.database).await?;
    let transport = Arc::new(HttpTransport::new(&config.provider));
    let pipeline = HarvestPipeline::from_config(transport, store, &config);

    let result = HarvestExecutor::new().execute(&pipeline).await?;
    if result.new_inspections.is_empty() {
        info!("No new inspections found");
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for inspection in &result.new_inspections {
        serde_json::to_writer(&mut out, inspection)?;
        writeln!(out)?;
    }
    out.flush()?;

    pipeline.store().close().await;
    Ok(())
}
