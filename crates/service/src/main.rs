//! Vitals Monitor - Main Entry Point

use anyhow::Context;
use service::{init_logging, init_metrics, run_until, shutdown_signal, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VITALS_CONFIG").ok());
    let settings = Settings::load(config_path.as_deref()).context("failed to load settings")?;

    init_logging(&settings.logging)?;
    init_metrics(&settings.metrics)?;

    info!("=== Vitals Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    run_until(settings, shutdown_signal()).await
}
