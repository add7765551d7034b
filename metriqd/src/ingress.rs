//! Ingress validation.
//!
//! A request body is unframed in the reverse order the agent framed it:
//! signature check over the raw bytes, then decryption, then gunzip. The
//! plain JSON is then validated into metrics before anything reaches the
//! repository.

use crate::error::ApiError;
use axum::http::header::CONTENT_ENCODING;
use axum::http::{HeaderMap, HeaderName};
use metriq_common::codec::gzip;
use metriq_common::{
    CodecError, Decoder, HASH_HEADER, Metric, MetricDto, MetricKind, MetricValue, ValidationError,
    decode_batch,
};

/// [`HASH_HEADER`] as a header name.
pub const HASH_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");

/// Request unframing with the collector's keys.
#[derive(Debug, Clone, Default)]
pub struct Ingress {
    decoder: Decoder,
}

impl Ingress {
    pub fn new(decoder: Decoder) -> Self {
        Self { decoder }
    }

    pub fn signs(&self) -> bool {
        self.decoder.signs()
    }

    /// Raw request body to plain bytes.
    ///
    /// An absent or empty `HashSHA256` header skips the signature check.
    pub fn unframe(&self, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>, CodecError> {
        let signature = headers
            .get(HASH_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .filter(|s| !s.is_empty());
        let gzipped = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(gzip::names_gzip);
        self.decoder.decode(body, signature.as_deref(), gzipped)
    }

    /// `HashSHA256` for a response body, when a key is configured.
    pub fn response_signature(&self, body: &[u8]) -> Result<Option<String>, CodecError> {
        self.decoder.response_signature(body)
    }
}

/// `/updates` body: every element must be valid or nothing is accepted.
pub fn parse_batch(plain: &[u8]) -> Result<Vec<Metric>, ApiError> {
    Ok(decode_batch(plain)?)
}

/// `/update` body: one metric with its value.
pub fn parse_metric(plain: &[u8]) -> Result<Metric, ApiError> {
    let dto: MetricDto = serde_json::from_slice(plain)?;
    Ok(Metric::try_from(dto)?)
}

/// `/value` body: kind and name only.
pub fn parse_query(plain: &[u8]) -> Result<(MetricKind, String), ApiError> {
    let dto: MetricDto = serde_json::from_slice(plain)?;
    let (kind, name) = dto.key()?;
    Ok((kind, name.to_string()))
}

/// `/update/{kind}/{name}/{value}`: kind, then name, then value.
pub fn parse_path(kind: &str, name: &str, value: &str) -> Result<Metric, ApiError> {
    let kind: MetricKind = kind.parse()?;
    if name.is_empty() {
        return Err(ValidationError::EmptyName.into());
    }
    let value = MetricValue::parse(kind, value)?;
    Ok(Metric::new(name, value))
}
