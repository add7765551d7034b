//! Host memory from /proc/meminfo.

use super::CollectError;
use metriq_common::Metric;

/// Host memory, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
    /// Absent on kernels older than 3.14.
    pub available: Option<u64>,
}

impl MemInfo {
    /// Parse /proc/meminfo content.
    ///
    /// Lines look like `MemTotal:       16314052 kB`.
    pub fn parse(content: &str) -> Result<Self, CollectError> {
        let mut total = None;
        let mut free = None;
        let mut available = None;

        for line in content.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let slot = match key {
                "MemTotal" => &mut total,
                "MemFree" => &mut free,
                "MemAvailable" => &mut available,
                _ => continue,
            };
            *slot = Some(parse_kib(rest).ok_or_else(|| {
                CollectError::parse("meminfo", format!("bad value for {key}: '{}'", rest.trim()))
            })?);
        }

        match (total, free) {
            (Some(total), Some(free)) => Ok(Self {
                total,
                free,
                available,
            }),
            _ => Err(CollectError::parse("meminfo", "missing MemTotal or MemFree")),
        }
    }

    pub fn metrics(&self) -> Vec<Metric> {
        let mut out = vec![
            Metric::gauge("TotalMemory", self.total as f64),
            Metric::gauge("FreeMemory", self.free as f64),
        ];
        if let Some(available) = self.available {
            out.push(Metric::gauge("AvailableMemory", available as f64));
        }
        out
    }
}

/// `"  16314052 kB"` → bytes. A missing unit means bytes.
pub(crate) fn parse_kib(raw: &str) -> Option<u64> {
    let mut parts = raw.split_whitespace();
    let value: u64 = parts.next()?.parse().ok()?;
    match parts.next() {
        Some("kB") => value.checked_mul(1024),
        None => Some(value),
        Some(_) => None,
    }
}
