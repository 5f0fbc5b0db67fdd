//! PriceKeeper - minute-aligned price recorder and ledger anchor

use anyhow::{Context, Result};
use tracing::info;

use pricekeeper::config::AppConfig;
use pricekeeper::logging::init_logging;
use pricekeeper::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(config.log_format())?;

    info!("📈 PriceKeeper v{}", env!("CARGO_PKG_VERSION"));
    info!(config = %config.digest(), "Configuration loaded");

    // Identity load failure is the one fatal startup error
    let pipeline = Pipeline::from_config(&config)?;

    tokio::select! {
        _ = pipeline.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("🛑 Shutdown requested, abandoning in-flight cycle");
        }
    }

    Ok(())
}
