//! Server signature verification (Ed25519).
//!
//! The server signs every envelope transcript with a long-lived key whose
//! public half is pinned into the inbox at creation time.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::error::CryptoError;

/// Size of the server signature public key in bytes.
pub const SERVER_SIG_PK_SIZE: usize = 32;

/// Size of a signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Check `signature` over `payload` against `server_sig_pk`.
///
/// Returns `false` for malformed keys or signatures as well as for a
/// signature that does not verify.
pub fn verify_signature(payload: &[u8], signature: &[u8], server_sig_pk: &[u8]) -> bool {
    check_signature(payload, signature, server_sig_pk).is_ok()
}

/// Like [`verify_signature`] but reports why verification failed.
///
/// # Errors
///
/// - `CryptoError::InvalidKeySize` for a malformed key or signature length
/// - `CryptoError::SignatureInvalid` when verification fails
pub fn check_signature(
    payload: &[u8],
    signature: &[u8],
    server_sig_pk: &[u8],
) -> Result<(), CryptoError> {
    let key_bytes: &[u8; SERVER_SIG_PK_SIZE] = server_sig_pk.try_into().map_err(|_| {
        CryptoError::key_size("server signature key", SERVER_SIG_PK_SIZE, server_sig_pk.len())
    })?;
    let signature_bytes: &[u8; SIGNATURE_SIZE] = signature
        .try_into()
        .map_err(|_| CryptoError::key_size("signature", SIGNATURE_SIZE, signature.len()))?;

    let key = VerifyingKey::from_bytes(key_bytes)
        .map_err(|e| CryptoError::SignatureInvalid { reason: format!("bad server key: {e}") })?;
    let signature = Signature::from_bytes(signature_bytes);

    key.verify_strict(payload, &signature)
        .map_err(|_| CryptoError::SignatureInvalid { reason: "verification failed".to_string() })
}

/// Server-side signing key.
///
/// Used by test harnesses and tooling that play the server role.
pub struct ServerSigner {
    key: SigningKey,
}

impl ServerSigner {
    /// Derive a signing key from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(&seed) }
    }

    /// Public key to pin into inboxes.
    pub fn public_key(&self) -> [u8; SERVER_SIG_PK_SIZE] {
        self.key.verifying_key().to_bytes()
    }

    /// Sign `payload`.
    pub fn sign(&self, payload: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.key.sign(payload).to_bytes()
    }
}
