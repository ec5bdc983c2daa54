//! Sandmail Cryptographic Primitives
//!
//! Envelope cryptography for disposable end-to-end encrypted inboxes. Pure
//! functions with deterministic outputs. Callers provide random seeds so
//! tests are reproducible.
//!
//! # Envelope Lifecycle
//!
//! ```text
//! client: KeyPair::generate(seed) ── public key ──► server
//!
//! server: encapsulate(pk) → (ct_kem, shared secret)
//!         HKDF(shared, salt = SHA-256(ct_kem), info = label || inbox hash)
//!         XChaCha20-Poly1305(body) → ciphertext
//!         Ed25519(transcript) → sig
//!
//! client: pinned key == envelope key?      else SignatureInvalid
//!         verify(sig, transcript)?         else SignatureInvalid
//!         decapsulate → derive → open      else DecryptionFailed
//! ```
//!
//! # Security
//!
//! Fail-closed:
//! - No function returns partial plaintext or key material on error
//! - The signature is checked before any secret-key operation
//!
//! Inbox binding:
//! - The symmetric key is derived with the inbox hash as context, so a
//!   shared secret replayed into another inbox yields a different key
//!
//! Secret hygiene:
//! - Secret keys, shared secrets and symmetric keys are zeroized on drop

pub mod aead;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod kem;
pub mod provider;
pub mod signature;

pub use envelope::{CipherSuite, ENVELOPE_VERSION, Envelope, seal_envelope};
pub use error::CryptoError;
pub use kdf::{SymmetricKey, derive_symmetric_key};
pub use kem::{
    ENCAPSULATED_KEY_SIZE, KeyPair, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SharedSecret, decapsulate,
    encapsulate,
};
pub use provider::{KeyAgreementProvider, MlKemProvider};
pub use signature::{SERVER_SIG_PK_SIZE, ServerSigner, verify_signature};
