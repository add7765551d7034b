//! Metric model: kinds, typed values and merge rules.
//!
//! A metric is either a gauge (last write wins) or a counter (writes
//! accumulate). The kind of a name never changes once it has been written.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the counter that storage bumps on every successful gauge write.
pub const POLL_COUNT: &str = "PollCount";

/// The two metric kinds understood on the wire and in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Replaced by every write.
    Gauge,
    /// Accumulated by every write.
    Counter,
}

impl MetricKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }

    /// Wire field that carries the value for this kind in [`crate::MetricDto`].
    pub fn value_field(&self) -> &'static str {
        match self {
            Self::Gauge => "value",
            Self::Counter => "delta",
        }
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    /// Case-insensitive: `Gauge`, `GAUGE` and `gauge` are the same kind.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            _ => Err(ValidationError::UnknownKind(value.to_string())),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed metric value. The variant *is* the kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse a textual value (as found in `/update/{kind}/{name}/{value}`).
    ///
    /// Gauges must be finite floats, counters signed 64-bit integers.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidValue {
            kind,
            value: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => {
                let value: f64 = raw.parse().map_err(|_| invalid())?;
                if !value.is_finite() {
                    return Err(invalid());
                }
                Ok(Self::Gauge(value))
            }
            MetricKind::Counter => raw.parse().map(Self::Counter).map_err(|_| invalid()),
        }
    }

    /// Apply `incoming` on top of `self` (the stored value).
    ///
    /// Gauges are replaced, counters are added. Mixing kinds and counter
    /// overflow are rejected.
    pub fn merge(self, incoming: MetricValue, name: &str) -> Result<MetricValue, ValidationError> {
        match (self, incoming) {
            (Self::Gauge(_), Self::Gauge(new)) => Ok(Self::Gauge(new)),
            (Self::Counter(old), Self::Counter(delta)) => old
                .checked_add(delta)
                .map(Self::Counter)
                .ok_or_else(|| ValidationError::CounterOverflow {
                    name: name.to_string(),
                    stored: old,
                    delta,
                }),
            (stored, incoming) => Err(ValidationError::KindMismatch {
                name: name.to_string(),
                stored: stored.kind(),
                incoming: incoming.kind(),
            }),
        }
    }

    pub fn as_gauge(&self) -> Option<f64> {
        match self {
            Self::Gauge(v) => Some(*v),
            Self::Counter(_) => None,
        }
    }

    pub fn as_counter(&self) -> Option<i64> {
        match self {
            Self::Counter(v) => Some(*v),
            Self::Gauge(_) => None,
        }
    }
}

impl fmt::Display for MetricValue {
    /// Shortest round-trip representation, never in exponent notation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gauge(v) => write!(f, "{}", v),
            Self::Counter(v) => write!(f, "{}", v),
        }
    }
}

/// A named metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricValue::Gauge(value))
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self::new(name, MetricValue::Counter(delta))
    }

    /// The single increment applied to [`POLL_COUNT`] per gauge write.
    pub fn poll_tick() -> Self {
        Self::counter(POLL_COUNT, 1)
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Checks that apply to every write regardless of backend.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.name == POLL_COUNT && self.kind() == MetricKind::Gauge {
            return Err(ValidationError::ReservedName(self.name.clone()));
        }
        if let MetricValue::Gauge(v) = self.value {
            if !v.is_finite() {
                return Err(ValidationError::InvalidValue {
                    kind: MetricKind::Gauge,
                    value: v.to_string(),
                });
            }
        }
        Ok(())
    }
}
