//! metriq agent.
//!
//! Polls host and process metrics into a local in-memory repository and
//! periodically delivers the snapshot to the collector through a bounded
//! worker pool.

// deny rather than forbid: config tests mutate env vars
#![deny(unsafe_code)]

pub mod collect;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod transport;

pub use collect::{Collector, run_poll_loop};
pub use config::{AgentConfig, Cli};
pub use error::DeliveryError;
pub use pipeline::{Job, JobResult, Pipeline, WorkerPool, send_metrics_batch};
pub use retry::{RetryPolicy, RetryableError, run_with_retry};
pub use transport::Transport;

use anyhow::{Context, Result};
use metriq_storage::{MemRepository, Repository};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run the poll loop and the report pipeline until `cancel` fires.
pub async fn run(config: AgentConfig, collector: Collector, cancel: CancellationToken) -> Result<()> {
    let encoder = config.encoder().context("failed to load encryption key")?;
    let transport = Transport::new(
        &config.address.value,
        config.client_timeout,
        encoder,
        config.retry.clone(),
    )
    .context("failed to build HTTP client")?;

    let repo: Arc<dyn Repository> = Arc::new(MemRepository::new());
    let poller = tokio::spawn(run_poll_loop(
        Arc::clone(&repo),
        collector,
        config.poll_interval.value,
        cancel.clone(),
    ));

    let workers = usize::try_from(config.rate_limit.value).unwrap_or(usize::MAX);
    Pipeline::new(repo, Arc::new(transport), config.report_interval.value, workers)
        .run(cancel)
        .await;

    poller.await.context("poll loop panicked")?;
    Ok(())
}
