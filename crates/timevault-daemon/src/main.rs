//! timevault-daemon: runs an in-process TimeVault cohort.
//!
//! Starts N engines connected by a local network, seals the configured
//! message at one node, waits for it to expire and opens it at another.

mod cohort;
mod config;

use tracing::{error, info};

use crate::cohort::Cohort;
use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // 2. Initialize tracing; RUST_LOG overrides the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        cohort = config.cohort.size,
        "TimeVault daemon starting"
    );

    // 3. Start the cohort
    let cohort = Cohort::start(
        config.cohort.size,
        config.cohort.channel_capacity,
        &config.vault,
    )?;

    // 4. Run the demo until done or interrupted
    let outcome = tokio::select! {
        result = cohort::run_demo(&cohort, &config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            Ok(())
        }
    };

    // Graceful shutdown
    cohort.shutdown().await;

    if let Err(e) = &outcome {
        error!("demo failed: {e:#}");
    }
    info!("Daemon stopped");
    outcome
}
