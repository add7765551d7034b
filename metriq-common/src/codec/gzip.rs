//! Gzip framing for request and response bodies.

use super::CodecError;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

/// Upper bound for an inflated body. Protects the collector from gzip bombs.
pub const MAX_INFLATED_BYTES: u64 = 32 * 1024 * 1024;

/// Compress with the best compression level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

/// Inflate a gzip body, refusing anything larger than [`MAX_INFLATED_BYTES`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    decompress_limited(data, MAX_INFLATED_BYTES)
}

pub fn decompress_limited(data: &[u8], limit: u64) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit + 1)
        .read_to_end(&mut out)
        .map_err(CodecError::Decompress)?;
    if out.len() as u64 > limit {
        return Err(CodecError::TooLarge { limit });
    }
    Ok(out)
}

/// Whether a `Content-Encoding` / `Accept-Encoding` value names gzip.
///
/// The agent sends `application/gzip`; browsers and curl send `gzip`.
pub fn names_gzip(header: &str) -> bool {
    header
        .split(',')
        .map(|part| part.split(';').next().unwrap_or("").trim())
        .any(|enc| enc.eq_ignore_ascii_case("gzip") || enc.eq_ignore_ascii_case("application/gzip"))
}
