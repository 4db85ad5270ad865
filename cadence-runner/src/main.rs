//! cadence - runs the workload catalog through the reference engine
//!
//! Prints the identifier of every completed request on stdout, one per line,
//! in completion order. Logs go to stderr.

mod config;

use anyhow::{Context, Result};
use cadence_core::{Catalog, Driver, SimEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::RunnerConfig;

const DEFAULT_LOG_FILTER: &str = "cadence_core=info,cadence=info";

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RunnerConfig::from_env().context("reading configuration")?;

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::from_json_file(path)
            .with_context(|| format!("loading catalog from {}", path.display()))?,
        None => Catalog::standard(),
    };
    info!("Catalog loaded with {} entries", catalog.len());

    let engine = SimEngine::new(config.engine.clone());
    let mut driver = Driver::new(engine, catalog, config.driver_config());

    let summary = driver
        .run(|output| println!("{}", output.request_id))
        .context("admission-drain run aborted")?;

    let stats = driver.engine().stats();
    info!("Run complete!");
    info!("  Ticks: {}", summary.ticks);
    info!("  Admitted: {}", summary.admitted);
    info!("  Completed: {}", summary.completed);
    info!("  Tokens generated: {}", stats.total_tokens_generated);
    info!("  KV pages in use: {}/{}", stats.cache.used_pages, stats.cache.total_pages);

    Ok(())
}
