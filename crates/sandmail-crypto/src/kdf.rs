//! Symmetric key derivation using HKDF-SHA-256

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::kem::SharedSecret;

/// Label used for email key derivation
const EMAIL_KEY_LABEL: &[u8] = b"sandmail/email/v1";

/// Size of the derived AEAD key in bytes.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// A derived 32-byte AEAD key, zeroized on drop.
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// 32-byte key for XChaCha20-Poly1305.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Derive the AEAD key for one envelope.
///
/// The salt is the SHA-256 of the encapsulated key and the info binds the
/// inbox hash, so a shared secret replayed against another inbox yields an
/// unrelated key.
///
/// # Security
///
/// - Different inbox hashes produce different keys
/// - Different encapsulated keys produce different keys
/// - Deterministic: same inputs always produce same output
pub fn derive_symmetric_key(
    shared_secret: &SharedSecret,
    inbox_hash: &str,
    encapsulated_key: &[u8],
) -> SymmetricKey {
    let salt = Sha256::digest(encapsulated_key);
    let hkdf = Hkdf::<Sha256>::new(Some(salt.as_slice()), shared_secret.as_bytes());

    // Build the info parameter: label || len(inbox_hash) || inbox_hash
    let mut info = Vec::with_capacity(EMAIL_KEY_LABEL.len() + 4 + inbox_hash.len());
    info.extend_from_slice(EMAIL_KEY_LABEL);
    info.extend_from_slice(&(inbox_hash.len() as u32).to_be_bytes());
    info.extend_from_slice(inbox_hash.as_bytes());

    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    SymmetricKey(key)
}
