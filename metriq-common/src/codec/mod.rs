//! Transport codec for metric batches.
//!
//! Outbound (agent): JSON → gzip → RSA (optional) → HMAC over the final body
//! (optional). Inbound (collector) reverses it: HMAC check over the raw body
//! → RSA → gunzip. JSON decoding is left to the caller so that single-metric
//! and batch endpoints share the same framing.

pub mod crypto;
pub mod gzip;
pub mod sign;

pub use crypto::{PrivateKey, PublicKey};

use crate::metric::Metric;
use crate::protocol::{MetricDto, to_dtos};
use std::path::PathBuf;
use thiserror::Error;

/// Anything that can go wrong framing or unframing a body.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("gzip compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("gzip decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("decompressed body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("encryption failed: {0}")]
    Encrypt(#[source] rsa::Error),

    #[error("decryption failed: {0}")]
    Decrypt(#[source] rsa::Error),

    #[error("ciphertext length {len} is not a multiple of the {block}-byte key size")]
    CiphertextLength { len: usize, block: usize },

    #[error("invalid key: {0}")]
    Key(String),

    #[error("cannot read key file {}: {source}", path.display())]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HashSHA256 does not match the body")]
    SignatureMismatch,
}

/// A framed body ready to POST, plus the `HashSHA256` value if signing is on.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPayload {
    pub body: Vec<u8>,
    pub signature: Option<String>,
}

/// Agent-side framing.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    hmac_key: Option<Vec<u8>>,
    public_key: Option<PublicKey>,
}

impl Encoder {
    pub fn new(hmac_key: Option<Vec<u8>>, public_key: Option<PublicKey>) -> Self {
        Self {
            hmac_key: hmac_key.filter(|k| !k.is_empty()),
            public_key,
        }
    }

    pub fn encrypts(&self) -> bool {
        self.public_key.is_some()
    }

    pub fn encode_metrics(&self, metrics: &[Metric]) -> Result<EncodedPayload, CodecError> {
        self.encode(&to_dtos(metrics))
    }

    pub fn encode(&self, dtos: &[MetricDto]) -> Result<EncodedPayload, CodecError> {
        let json = serde_json::to_vec(dtos)?;
        let mut body = gzip::compress(&json)?;
        if let Some(key) = &self.public_key {
            body = key.encrypt(&body)?;
        }
        let signature = match &self.hmac_key {
            Some(key) => Some(sign::sign(key, &body)?),
            None => None,
        };
        Ok(EncodedPayload { body, signature })
    }
}

/// Collector-side unframing.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    hmac_key: Option<Vec<u8>>,
    private_key: Option<PrivateKey>,
}

impl Decoder {
    pub fn new(hmac_key: Option<Vec<u8>>, private_key: Option<PrivateKey>) -> Self {
        Self {
            hmac_key: hmac_key.filter(|k| !k.is_empty()),
            private_key,
        }
    }

    pub fn signs(&self) -> bool {
        self.hmac_key.is_some()
    }

    pub fn decrypts(&self) -> bool {
        self.private_key.is_some()
    }

    /// Unframe a request body.
    ///
    /// The signature is checked only when both a key is configured and the
    /// client sent one. Decryption runs whenever a private key is configured.
    pub fn decode(
        &self,
        body: &[u8],
        signature: Option<&str>,
        gzipped: bool,
    ) -> Result<Vec<u8>, CodecError> {
        if let (Some(key), Some(signature)) = (&self.hmac_key, signature) {
            sign::verify(key, body, signature)?;
        }
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let plain = match &self.private_key {
            Some(key) => key.decrypt(body)?,
            None => body.to_vec(),
        };
        if gzipped {
            gzip::decompress(&plain)
        } else {
            Ok(plain)
        }
    }

    /// `HashSHA256` for a response body, when a key is configured.
    pub fn response_signature(&self, body: &[u8]) -> Result<Option<String>, CodecError> {
        self.hmac_key
            .as_deref()
            .map(|key| sign::sign(key, body))
            .transpose()
    }
}
