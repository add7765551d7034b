use super::CollectError;
use metriq_common::Metric;

/// System load averages from /proc/loadavg.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

impl LoadAvg {
    /// Parse `0.52 0.58 0.59 1/467 12345`.
    pub fn parse(content: &str) -> Result<Self, CollectError> {
        let mut fields = content.split_whitespace().map(str::parse::<f64>);
        match (fields.next(), fields.next(), fields.next()) {
            (Some(Ok(one)), Some(Ok(five)), Some(Ok(fifteen))) => Ok(Self { one, five, fifteen }),
            _ => Err(CollectError::parse("loadavg", format!("unexpected content '{}'", content.trim()))),
        }
    }

    pub fn metrics(&self) -> Vec<Metric> {
        vec![
            Metric::gauge("LoadAverage1", self.one),
            Metric::gauge("LoadAverage5", self.five),
            Metric::gauge("LoadAverage15", self.fifteen),
        ]
    }
}
