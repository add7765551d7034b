//! Wire format shared by the agent, the collector and the backup file.
//!
//! A metric travels as `{"id", "type", "value", "delta"}`: `value` carries a
//! gauge, `delta` a counter. The same record is used one-per-line in the
//! backup file.

use crate::error::ValidationError;
use crate::metric::{Metric, MetricKind, MetricValue};
use serde::{Deserialize, Serialize};

/// Header carrying base64(HMAC-SHA256(key, body)).
pub const HASH_HEADER: &str = "HashSHA256";

/// `Content-Encoding` value the agent sends for compressed bodies.
pub const CONTENT_ENCODING_GZIP: &str = "application/gzip";

/// One metric on the wire.
///
/// `kind` stays a string here so that an unknown type surfaces as a
/// [`ValidationError::UnknownKind`] rather than a JSON syntax error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricDto {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl MetricDto {
    /// Query form used by `POST /value`: only `id` and `type` are set.
    pub fn query(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind: kind.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Validate the kind and name without requiring a value.
    ///
    /// Kind is checked first so that an unknown type wins over an empty name.
    pub fn key(&self) -> Result<(MetricKind, &str), ValidationError> {
        let kind: MetricKind = self.kind.parse()?;
        if self.id.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        Ok((kind, self.id.as_str()))
    }
}

impl TryFrom<MetricDto> for Metric {
    type Error = ValidationError;

    fn try_from(dto: MetricDto) -> Result<Self, Self::Error> {
        let (kind, _) = dto.key()?;
        let missing = || ValidationError::MissingValue {
            name: dto.id.clone(),
            kind,
            field: kind.value_field(),
        };
        let value = match kind {
            MetricKind::Gauge => MetricValue::Gauge(dto.value.ok_or_else(missing)?),
            MetricKind::Counter => MetricValue::Counter(dto.delta.ok_or_else(missing)?),
        };
        Ok(Metric::new(dto.id, value))
    }
}

impl From<&Metric> for MetricDto {
    fn from(metric: &Metric) -> Self {
        let (value, delta) = match metric.value {
            MetricValue::Gauge(v) => (Some(v), None),
            MetricValue::Counter(d) => (None, Some(d)),
        };
        Self {
            id: metric.name.clone(),
            kind: metric.kind().as_str().to_string(),
            value,
            delta,
        }
    }
}

/// Convert a snapshot to DTOs.
pub fn to_dtos<'a>(metrics: impl IntoIterator<Item = &'a Metric>) -> Vec<MetricDto> {
    metrics.into_iter().map(MetricDto::from).collect()
}

/// JSON-encode a batch of metrics.
pub fn encode_batch(metrics: &[Metric]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&to_dtos(metrics))
}

/// Decode and validate a JSON batch. Any invalid element rejects the batch.
pub fn decode_batch(body: &[u8]) -> Result<Vec<Metric>, BatchError> {
    let dtos: Vec<MetricDto> = serde_json::from_slice(body)?;
    dtos.into_iter()
        .map(|dto| Metric::try_from(dto).map_err(BatchError::from))
        .collect()
}

/// Failure decoding a batch body.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("malformed metrics JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}
