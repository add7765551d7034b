//! Validation errors for metric names, kinds and values.
//!
//! These are always client-caused. The collector maps them to 400, except
//! [`ValidationError::EmptyName`] which maps to 404.

use crate::metric::MetricKind;
use thiserror::Error;

/// A metric failed validation before or while being applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("the name of the metric is empty")]
    EmptyName,

    #[error("the type of the metric is not defined: '{0}'")]
    UnknownKind(String),

    #[error("invalid {kind} value: '{value}'")]
    InvalidValue { kind: MetricKind, value: String },

    #[error("{kind} metric '{name}' has no {field}")]
    MissingValue {
        name: String,
        kind: MetricKind,
        field: &'static str,
    },

    #[error("metric '{name}' is stored as {stored}, cannot write it as {incoming}")]
    KindMismatch {
        name: String,
        stored: MetricKind,
        incoming: MetricKind,
    },

    #[error("'{0}' is reserved for the poll counter")]
    ReservedName(String),

    #[error("counter '{name}' would overflow: {stored} + {delta}")]
    CounterOverflow { name: String, stored: i64, delta: i64 },
}

impl ValidationError {
    /// Whether this error means "no such metric" rather than "bad request".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EmptyName)
    }
}
