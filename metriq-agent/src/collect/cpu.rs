//! Per-core CPU utilization from /proc/stat.
//!
//! Utilization is the busy share of jiffies between two samples. The first
//! sample is measured against boot, so it reports the average since boot.

use super::CollectError;
use metriq_common::Metric;

/// Cumulative jiffies for one core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Parse the per-core `cpuN` lines, ignoring the aggregate `cpu` line.
    ///
    /// Format: `cpu0 user nice system idle iowait irq softirq steal guest guest_nice`.
    /// Guest time is already counted in user/nice and is excluded from the total.
    pub fn parse(content: &str) -> Result<Vec<Self>, CollectError> {
        let mut cores = Vec::new();
        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let Some(label) = fields.next() else {
                continue;
            };
            let Some(index) = label.strip_prefix("cpu") else {
                continue;
            };
            if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }

            let values: Vec<u64> = fields
                .take(8)
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|_| CollectError::parse("stat", format!("bad counters for {label}")))?;
            if values.len() < 4 {
                return Err(CollectError::parse("stat", format!("too few counters for {label}")));
            }

            // idle + iowait
            let idle = values[3].saturating_add(values.get(4).copied().unwrap_or(0));
            cores.push(Self {
                idle,
                total: values.iter().copied().fold(0u64, u64::saturating_add),
            });
        }
        if cores.is_empty() {
            return Err(CollectError::parse("stat", "no per-core cpu lines"));
        }
        Ok(cores)
    }

    /// Busy percentage between `prev` and `self`.
    pub fn utilization_since(&self, prev: &Self) -> f64 {
        let total = self.total.saturating_sub(prev.total);
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle.saturating_sub(prev.idle).min(total);
        100.0 * (total - idle) as f64 / total as f64
    }
}

/// Remembers the previous sample so each poll reports a delta.
#[derive(Debug, Default)]
pub struct CpuSampler {
    prev: Vec<CpuTimes>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// `CPUutilization1..N` for one /proc/stat sample.
    pub fn sample(&mut self, content: &str) -> Result<Vec<Metric>, CollectError> {
        let current = CpuTimes::parse(content)?;
        let zero = CpuTimes::default();
        let metrics = current
            .iter()
            .enumerate()
            .map(|(i, now)| {
                // a core that came online since the last sample starts from boot
                let prev = self.prev.get(i).unwrap_or(&zero);
                Metric::gauge(format!("CPUutilization{}", i + 1), now.utilization_since(prev))
            })
            .collect();
        self.prev = current;
        Ok(metrics)
    }
}
