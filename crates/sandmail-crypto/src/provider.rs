//! The key agreement boundary consumed by inboxes.
//!
//! [`KeyAgreementProvider`] is a trait so that an inbox can be bound to a
//! provider instance and tests can substitute one. [`MlKemProvider`] is the
//! only production implementation.

use crate::{
    aead,
    envelope::Envelope,
    error::CryptoError,
    kdf::{self, SymmetricKey},
    kem::{self, KeyPair, SharedSecret},
    signature,
};

/// Client-side envelope cryptography.
///
/// Implementations are stateless and thread-safe. None of the operations
/// return partial output on failure.
pub trait KeyAgreementProvider: Send + Sync {
    /// Generate a fresh keypair from caller-provided entropy.
    fn generate_keypair(&self, seed: [u8; 32]) -> KeyPair;

    /// Recover the shared secret from an encapsulated key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKeySize` if either input has the wrong length
    fn decapsulate(
        &self,
        secret_key: &[u8],
        encapsulated_key: &[u8],
    ) -> Result<SharedSecret, CryptoError>;

    /// Derive the per-email symmetric key, bound to `inbox_hash`.
    fn derive_symmetric_key(
        &self,
        shared_secret: &SharedSecret,
        inbox_hash: &str,
        encapsulated_key: &[u8],
    ) -> SymmetricKey;

    /// Authenticated decryption of the envelope body.
    ///
    /// # Errors
    ///
    /// - `CryptoError::DecryptionFailed` on tag mismatch
    fn decrypt_envelope(&self, envelope: &Envelope, key: &SymmetricKey)
    -> Result<Vec<u8>, CryptoError>;

    /// Check a server signature.
    fn verify_signature(&self, payload: &[u8], signature: &[u8], server_sig_pk: &[u8]) -> bool;

    /// Verify and decrypt an envelope addressed to `keypair`.
    ///
    /// Order: the envelope's signing key must equal `pinned_server_sig_pk`,
    /// the signature must verify over the transcript, and only then is the
    /// body decapsulated and decrypted.
    ///
    /// # Errors
    ///
    /// - `CryptoError::SignatureInvalid` for an unpinned key or bad signature
    /// - `CryptoError::InvalidKeySize` for a malformed encapsulated key
    /// - `CryptoError::DecryptionFailed` if the body fails authentication
    fn open_envelope(
        &self,
        envelope: &Envelope,
        keypair: &KeyPair,
        inbox_hash: &str,
        pinned_server_sig_pk: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if envelope.server_sig_pk != pinned_server_sig_pk {
            return Err(CryptoError::SignatureInvalid {
                reason: "envelope signed by a key other than the pinned server key".to_string(),
            });
        }
        if !self.verify_signature(&envelope.transcript(), &envelope.signature, pinned_server_sig_pk)
        {
            return Err(CryptoError::SignatureInvalid {
                reason: "server signature does not verify".to_string(),
            });
        }

        let shared = self.decapsulate(keypair.secret_key(), &envelope.encapsulated_key)?;
        let key = self.derive_symmetric_key(&shared, inbox_hash, &envelope.encapsulated_key);
        self.decrypt_envelope(envelope, &key)
    }
}

/// ML-KEM-768 / Ed25519 / XChaCha20-Poly1305 / HKDF-SHA-256.
#[derive(Debug, Default, Clone, Copy)]
pub struct MlKemProvider;

impl KeyAgreementProvider for MlKemProvider {
    fn generate_keypair(&self, seed: [u8; 32]) -> KeyPair {
        KeyPair::generate(seed)
    }

    fn decapsulate(
        &self,
        secret_key: &[u8],
        encapsulated_key: &[u8],
    ) -> Result<SharedSecret, CryptoError> {
        kem::decapsulate(secret_key, encapsulated_key)
    }

    fn derive_symmetric_key(
        &self,
        shared_secret: &SharedSecret,
        inbox_hash: &str,
        encapsulated_key: &[u8],
    ) -> SymmetricKey {
        kdf::derive_symmetric_key(shared_secret, inbox_hash, encapsulated_key)
    }

    fn decrypt_envelope(
        &self,
        envelope: &Envelope,
        key: &SymmetricKey,
    ) -> Result<Vec<u8>, CryptoError> {
        aead::open(key, &envelope.nonce, &envelope.aad, &envelope.ciphertext)
    }

    fn verify_signature(&self, payload: &[u8], signature: &[u8], server_sig_pk: &[u8]) -> bool {
        signature::verify_signature(payload, signature, server_sig_pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{envelope::seal_envelope, signature::ServerSigner};

    const INBOX: &str = "inbox-hash-1";

    fn setup() -> (KeyPair, ServerSigner, Envelope) {
        let keypair = MlKemProvider.generate_keypair([7; 32]);
        let signer = ServerSigner::from_seed([9; 32]);
        let envelope =
            seal_envelope(b"{\"subject\":\"hi\"}", b"", keypair.public_key(), INBOX, &signer, [
                3; 32
            ])
            .unwrap();
        (keypair, signer, envelope)
    }

    #[test]
    fn opens_sealed_envelope() {
        let (keypair, signer, envelope) = setup();
        let plaintext =
            MlKemProvider.open_envelope(&envelope, &keypair, INBOX, &signer.public_key()).unwrap();
        assert_eq!(plaintext, b"{\"subject\":\"hi\"}");
    }

    #[test]
    fn generate_keypair_is_fresh_per_seed() {
        let a = MlKemProvider.generate_keypair([1; 32]);
        let b = MlKemProvider.generate_keypair([2; 32]);
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn unpinned_server_key_is_rejected() {
        let (keypair, _, envelope) = setup();
        let other = ServerSigner::from_seed([10; 32]);

        let result = MlKemProvider.open_envelope(&envelope, &keypair, INBOX, &other.public_key());
        assert!(matches!(result, Err(CryptoError::SignatureInvalid { .. })));
    }

    #[test]
    fn resigned_by_impostor_is_rejected() {
        // Impostor swaps in its own key and signature; pinning catches it
        let (keypair, signer, mut envelope) = setup();
        let impostor = ServerSigner::from_seed([11; 32]);
        envelope.server_sig_pk = impostor.public_key().to_vec();
        envelope.signature = impostor.sign(&envelope.transcript()).to_vec();

        let result = MlKemProvider.open_envelope(&envelope, &keypair, INBOX, &signer.public_key());
        assert!(matches!(result, Err(CryptoError::SignatureInvalid { .. })));
    }

    #[test]
    fn wrong_inbox_hash_fails_decryption() {
        let (keypair, signer, envelope) = setup();
        let result =
            MlKemProvider.open_envelope(&envelope, &keypair, "other-inbox", &signer.public_key());
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn wrong_keypair_fails_decryption() {
        let (_, signer, envelope) = setup();
        let stranger = MlKemProvider.generate_keypair([8; 32]);
        let result =
            MlKemProvider.open_envelope(&envelope, &stranger, INBOX, &signer.public_key());
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn truncated_encapsulated_key_is_size_error() {
        let (keypair, signer, mut envelope) = setup();
        envelope.encapsulated_key.truncate(100);
        envelope.signature = signer.sign(&envelope.transcript()).to_vec();

        let result = MlKemProvider.open_envelope(&envelope, &keypair, INBOX, &signer.public_key());
        assert!(matches!(result, Err(CryptoError::InvalidKeySize { .. })));
    }
}
