//! Host and process metrics collection.
//!
//! Sources are read from the Linux /proc filesystem. A source that cannot be
//! read or parsed is logged and skipped; the rest of the poll still lands.

pub mod cpu;
pub mod loadavg;
pub mod meminfo;
pub mod process;

pub use cpu::CpuSampler;
pub use loadavg::LoadAvg;
pub use meminfo::MemInfo;
pub use process::ProcessStatus;

use metriq_common::Metric;
use metriq_storage::Repository;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that can occur while reading a /proc source.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse /proc/{file}: {reason}")]
    Parse { file: &'static str, reason: String },
}

impl CollectError {
    pub(crate) fn parse(file: &'static str, reason: impl Into<String>) -> Self {
        Self::Parse {
            file,
            reason: reason.into(),
        }
    }
}

/// Reads every source once per poll.
#[derive(Debug)]
pub struct Collector {
    root: PathBuf,
    cpu: CpuSampler,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Read sources under `root` instead of `/proc`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cpu: CpuSampler::new(),
        }
    }

    fn read(&self, relative: &str) -> Result<String, CollectError> {
        let path = self.root.join(relative);
        std::fs::read_to_string(&path).map_err(|source| CollectError::Read { path, source })
    }

    /// One poll: every available source plus `RandomValue`.
    pub fn collect(&mut self) -> Vec<Metric> {
        let mut batch = Vec::new();

        extend_or_skip(&mut batch, "meminfo", self.read("meminfo").and_then(|s| {
            MemInfo::parse(&s).map(|m| m.metrics())
        }));
        extend_or_skip(&mut batch, "self/status", self.read("self/status").and_then(|s| {
            ProcessStatus::parse(&s).map(|p| p.metrics())
        }));
        extend_or_skip(&mut batch, "loadavg", self.read("loadavg").and_then(|s| {
            LoadAvg::parse(&s).map(|l| l.metrics())
        }));
        let stat = self.read("stat");
        extend_or_skip(&mut batch, "stat", stat.and_then(|s| self.cpu.sample(&s)));

        batch.push(Metric::gauge("RandomValue", fastrand::f64()));
        batch
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn extend_or_skip(batch: &mut Vec<Metric>, source: &str, result: Result<Vec<Metric>, CollectError>) {
    match result {
        Ok(metrics) => batch.extend(metrics),
        Err(e) => debug!(source, error = %e, "Skipping unavailable metric source"),
    }
}

/// Poll `collector` every `interval` into `repo`, one batch per poll.
pub async fn run_poll_loop(
    repo: Arc<dyn Repository>,
    mut collector: Collector,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        root = %collector.root().display(),
        interval_ms = interval.as_millis() as u64,
        "Poll loop started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let batch = collector.collect();
                let count = batch.len();
                match repo.set_metrics(batch) {
                    Ok(()) => debug!(count, "Poll stored"),
                    Err(e) => warn!(error = %e, "Failed to store poll"),
                }
            }
        }
    }
    info!("Poll loop stopped");
}
