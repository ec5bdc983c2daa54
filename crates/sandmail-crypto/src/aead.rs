//! Envelope encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure - nonces must be provided by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{error::CryptoError, kdf::SymmetricKey};

/// Size of the `XChaCha20` nonce (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext`, authenticating `aad` alongside it.
///
/// Returns ciphertext with the 16-byte tag appended.
pub fn seal(key: &SymmetricKey, nonce: &[u8; NONCE_SIZE], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    ciphertext
}

/// Decrypt and authenticate `ciphertext`.
///
/// Either the whole plaintext is returned or nothing is.
///
/// # Errors
///
/// - `DecryptionFailed`: nonce has the wrong length, ciphertext is shorter
///   than a tag, or the tag does not verify (tamper or wrong key)
pub fn open(
    key: &SymmetricKey,
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("nonce must be {NONCE_SIZE} bytes, got {}", nonce.len()),
        });
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("ciphertext shorter than {TAG_SIZE}-byte tag"),
        });
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(fill: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([fill; 32])
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key(1);
        let nonce = [0xAB; NONCE_SIZE];

        let ciphertext = seal(&key, &nonce, b"meta", b"Hello, World!");
        let plaintext = open(&key, &nonce, b"meta", &ciphertext).unwrap();

        assert_eq!(plaintext, b"Hello, World!");
    }

    #[test]
    fn seal_open_empty_message() {
        let key = test_key(2);
        let nonce = [0x00; NONCE_SIZE];

        let ciphertext = seal(&key, &nonce, b"", b"");
        assert_eq!(ciphertext.len(), TAG_SIZE);
        assert_eq!(open(&key, &nonce, b"", &ciphertext).unwrap(), b"");
    }

    #[test]
    fn wrong_key_fails() {
        let nonce = [0x00; NONCE_SIZE];
        let ciphertext = seal(&test_key(1), &nonce, b"", b"secret message");

        let result = open(&test_key(2), &nonce, b"", &ciphertext);
        assert!(matches!(
            result,
            Err(CryptoError::DecryptionFailed { reason }) if reason.contains("authentication")
        ));
    }

    #[test]
    fn tampered_aad_fails() {
        let key = test_key(3);
        let nonce = [0x11; NONCE_SIZE];
        let ciphertext = seal(&key, &nonce, b"original", b"body");

        assert!(open(&key, &nonce, b"modified", &ciphertext).is_err());
    }

    #[test]
    fn short_nonce_is_rejected() {
        let key = test_key(4);
        let ciphertext = seal(&key, &[0; NONCE_SIZE], b"", b"body");

        assert!(matches!(
            open(&key, &[0; 12], b"", &ciphertext),
            Err(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let key = test_key(5);
        assert!(open(&key, &[0; NONCE_SIZE], b"", &[0u8; TAG_SIZE - 1]).is_err());
    }
}
