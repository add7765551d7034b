//! HTTP transport to the collector's `/updates` endpoint.

use crate::error::DeliveryError;
use crate::retry::{RetryPolicy, run_with_retry};
use metriq_common::{CONTENT_ENCODING_GZIP, EncodedPayload, Encoder, HASH_HEADER, Metric};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-request timeout.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts encoded batches to one collector.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    url: String,
    encoder: Encoder,
    policy: RetryPolicy,
}

impl Transport {
    /// Client for `http://{address}/updates`.
    pub fn new(
        address: &str,
        timeout: Duration,
        encoder: Encoder,
        policy: RetryPolicy,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("http://{address}/updates"),
            encoder,
            policy,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Encode and deliver `metrics`, retrying refused connections.
    ///
    /// Any HTTP response counts as delivered; a non-success status is logged
    /// and not retried.
    pub async fn send(&self, metrics: &[Metric]) -> Result<StatusCode, DeliveryError> {
        let payload = self.encoder.encode_metrics(metrics)?;
        let status = run_with_retry("send_metrics_batch", &self.policy, || self.post(&payload)).await?;

        if status.is_success() {
            debug!(url = %self.url, count = metrics.len(), %status, "Batch delivered");
        } else {
            warn!(url = %self.url, count = metrics.len(), %status, "Collector rejected batch");
        }
        Ok(status)
    }

    /// One POST attempt.
    pub async fn post(&self, payload: &EncodedPayload) -> Result<StatusCode, DeliveryError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, CONTENT_ENCODING_GZIP)
            .body(payload.body.clone());
        if let Some(signature) = &payload.signature {
            request = request.header(HASH_HEADER, signature);
        }
        let response = request.send().await?;
        Ok(response.status())
    }
}
