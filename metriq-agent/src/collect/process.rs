//! Agent process statistics from /proc/self/status.

use super::CollectError;
use super::meminfo::parse_kib;
use metriq_common::Metric;

/// Memory and thread counts of the agent itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Resident set size, bytes.
    pub resident: u64,
    /// Virtual memory size, bytes.
    pub virtual_size: u64,
    /// Peak virtual memory size, bytes.
    pub peak_virtual: u64,
    pub threads: u64,
}

impl ProcessStatus {
    pub fn parse(content: &str) -> Result<Self, CollectError> {
        let mut status = Self::default();
        let mut seen_rss = false;

        for line in content.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let field = match key {
                "VmRSS" => {
                    seen_rss = true;
                    &mut status.resident
                }
                "VmSize" => &mut status.virtual_size,
                "VmPeak" => &mut status.peak_virtual,
                "Threads" => &mut status.threads,
                _ => continue,
            };
            *field = parse_kib(rest).ok_or_else(|| {
                CollectError::parse("self/status", format!("bad value for {key}: '{}'", rest.trim()))
            })?;
        }

        if !seen_rss {
            return Err(CollectError::parse("self/status", "missing VmRSS"));
        }
        Ok(status)
    }

    pub fn metrics(&self) -> Vec<Metric> {
        vec![
            Metric::gauge("ProcessResident", self.resident as f64),
            Metric::gauge("ProcessVirtual", self.virtual_size as f64),
            Metric::gauge("ProcessPeakVirtual", self.peak_virtual as f64),
            Metric::gauge("ProcessThreads", self.threads as f64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Name:\tmetriq-agent
State:\tS (sleeping)
VmPeak:\t  120000 kB
VmSize:\t  110000 kB
VmRSS:\t   20480 kB
Threads:\t7
";

    #[test]
    fn test_parse_status() {
        let status = ProcessStatus::parse(SAMPLE).unwrap();
        assert_eq!(
            status,
            ProcessStatus {
                resident: 20480 * 1024,
                virtual_size: 110_000 * 1024,
                peak_virtual: 120_000 * 1024,
                threads: 7,
            }
        );
        let metrics = status.metrics();
        assert_eq!(metrics[3], Metric::gauge("ProcessThreads", 7.0));
    }

    #[test]
    fn test_kernel_thread_has_no_rss() {
        // kernel threads have no Vm* lines
        assert!(ProcessStatus::parse("Name:\tkthreadd\nThreads:\t1\n").is_err());
    }
}
