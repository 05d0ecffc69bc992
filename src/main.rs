mod client;
mod config;
mod coordinator;
mod error;
mod event;
mod metrics;
mod report;
mod scheduler;
mod target;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::config::Config;
use crate::coordinator::Coordinator;

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let settings = config.settings().context("Invalid benchmark configuration")?;

    // Print banner
    info!("════════════════════════════════════════════════════════════");
    info!("           AGGREGATOR PUBLISH BENCHMARK (Rust)");
    info!("════════════════════════════════════════════════════════════");
    info!("Target: {}", settings.base_url);
    info!("Virtual Clients: {}", settings.vus);
    info!("Duration: {}s", settings.duration.as_secs());
    info!("Pacing: {}ms", settings.pacing.as_millis());
    info!("Settle Window: {}s", settings.settle.as_secs());
    info!(
        "Thresholds: p95 < {}ms, failure rate < {:.2}%",
        settings.thresholds.p95_latency.as_millis(),
        settings.thresholds.max_failure_rate * 100.0
    );
    info!("════════════════════════════════════════════════════════════");

    let mut coordinator = Coordinator::new(settings).context("Failed to set up benchmark")?;
    let report = coordinator
        .run()
        .await
        .context("Benchmark run failed")?;

    if let Some(path) = &config.report_json {
        report
            .write_json(path)
            .await
            .context("Failed to write JSON report")?;
    }

    info!("════════════════════════════════════════════════════════════");
    info!("                 BENCHMARK COMPLETE");
    info!("════════════════════════════════════════════════════════════");

    Ok(())
}
