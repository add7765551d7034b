//! RSA PKCS#1 v1.5 payload encryption.
//!
//! PKCS#1 v1.5 can only seal `k - 11` bytes per operation (`k` = modulus
//! size in bytes), so payloads are split into blocks and each block is
//! sealed separately. The ciphertext is the concatenation of `k`-byte
//! blocks.

use super::CodecError;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::Path;

const PKCS1_V15_OVERHEAD: usize = 11;

/// Public half, held by the agent.
#[derive(Debug, Clone)]
pub struct PublicKey(RsaPublicKey);

/// Private half, held by the collector.
#[derive(Debug, Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PublicKey {
    /// Parse a `PUBLIC KEY` (SPKI) or `RSA PUBLIC KEY` (PKCS#1) PEM block.
    pub fn from_pem(pem: &str) -> Result<Self, CodecError> {
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map(Self)
            .map_err(|e| CodecError::Key(format!("public key: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, CodecError> {
        Self::from_pem(&read_pem(path)?)
    }

    /// Encrypt `plain`, block by block.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        let size = self.0.size();
        let chunk = block_capacity(size)?;
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(plain.len().div_ceil(chunk).max(1) * size);
        for block in plain.chunks(chunk) {
            let sealed = self
                .0
                .encrypt(&mut rng, Pkcs1v15Encrypt, block)
                .map_err(CodecError::Encrypt)?;
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }
}

/// Plaintext bytes one PKCS#1 v1.5 block can carry for a `size`-byte modulus.
fn block_capacity(size: usize) -> Result<usize, CodecError> {
    size.checked_sub(PKCS1_V15_OVERHEAD)
        .filter(|chunk| *chunk > 0)
        .ok_or_else(|| CodecError::Key(format!("{size}-byte modulus is too small for PKCS#1 v1.5")))
}

impl From<RsaPublicKey> for PublicKey {
    fn from(key: RsaPublicKey) -> Self {
        Self(key)
    }
}

impl PrivateKey {
    /// Parse an `RSA PRIVATE KEY` (PKCS#1) or `PRIVATE KEY` (PKCS#8) PEM block.
    pub fn from_pem(pem: &str) -> Result<Self, CodecError> {
        RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map(Self)
            .map_err(|e| CodecError::Key(format!("private key: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, CodecError> {
        Self::from_pem(&read_pem(path)?)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }

    /// Reverse [`PublicKey::encrypt`].
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        let size = self.0.size();
        if sealed.len() % size != 0 {
            return Err(CodecError::CiphertextLength {
                len: sealed.len(),
                block: size,
            });
        }
        let mut out = Vec::with_capacity(sealed.len());
        for block in sealed.chunks(size) {
            let plain = self
                .0
                .decrypt(Pkcs1v15Encrypt, block)
                .map_err(CodecError::Decrypt)?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }
}

impl From<RsaPrivateKey> for PrivateKey {
    fn from(key: RsaPrivateKey) -> Self {
        Self(key)
    }
}

fn read_pem(path: &Path) -> Result<String, CodecError> {
    std::fs::read_to_string(path).map_err(|source| CodecError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}
