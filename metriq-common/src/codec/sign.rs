//! HMAC-SHA256 body signatures carried in the `HashSHA256` header.

use super::CodecError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &[u8], body: &[u8]) -> Result<HmacSha256, CodecError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CodecError::Key(format!("hmac key: {e}")))?;
    mac.update(body);
    Ok(mac)
}

/// base64(HMAC-SHA256(key, body)).
pub fn sign(key: &[u8], body: &[u8]) -> Result<String, CodecError> {
    Ok(STANDARD.encode(mac(key, body)?.finalize().into_bytes()))
}

/// Constant-time check of a header value against `body`.
pub fn verify(key: &[u8], body: &[u8], signature: &str) -> Result<(), CodecError> {
    let expected = STANDARD
        .decode(signature.trim())
        .map_err(|_| CodecError::SignatureMismatch)?;
    mac(key, body)?
        .verify_slice(&expected)
        .map_err(|_| CodecError::SignatureMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_deterministic_base64() {
        let a = sign(b"secret", b"payload").unwrap();
        let b = sign(b"secret", b"payload").unwrap();
        assert_eq!(a, b);
        // 32-byte digest -> 44 base64 chars with padding
        assert_eq!(a.len(), 44);
        assert!(a.ends_with('='));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let sig = sign(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(sig, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn test_verify_accepts_matching_signature() {
        let sig = sign(b"k", b"body").unwrap();
        assert!(verify(b"k", b"body", &sig).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let sig = sign(b"k", b"body").unwrap();
        assert!(matches!(
            verify(b"k", b"b0dy", &sig),
            Err(CodecError::SignatureMismatch)
        ));
        assert!(matches!(
            verify(b"other", b"body", &sig),
            Err(CodecError::SignatureMismatch)
        ));
        assert!(matches!(
            verify(b"k", b"body", "not base64!"),
            Err(CodecError::SignatureMismatch)
        ));
    }
}
