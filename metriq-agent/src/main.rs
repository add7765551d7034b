//! metriq agent binary.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use metriq_agent::{AgentConfig, Cli, Collector};
use metriq_common::{LogConfig, cancel_on_signal, init_logging};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let config = AgentConfig::load(&cli).context("invalid agent configuration")?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting metriq agent");
    config.log_summary();

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    metriq_agent::run(config, Collector::new(), cancel).await?;
    info!("metriq agent stopped");
    Ok(())
}
