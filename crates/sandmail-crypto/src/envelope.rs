//! Signed, versioned email envelopes.
//!
//! An envelope is what the server stores for one email: the KEM ciphertext
//! that transports the per-email key, the AEAD ciphertext of the email body,
//! and the server's signature over all of it.
//!
//! # Transcript
//!
//! The signature covers every field the client later consumes:
//!
//! ```text
//! "sandmail/envelope/v1" || u8(version) || suite_id
//!   || lp(encapsulated_key) || lp(nonce) || lp(aad)
//!   || lp(ciphertext) || lp(server_sig_pk)
//!
//! lp(x) = u32be(len(x)) || x
//! ```

use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};

use crate::{
    aead::{self, NONCE_SIZE},
    error::CryptoError,
    kdf::derive_symmetric_key,
    kem::encapsulate,
    signature::ServerSigner,
};

/// Envelope format version produced and accepted by this crate.
pub const ENVELOPE_VERSION: u8 = 1;

/// Domain separation label prefixed to the signed transcript.
const TRANSCRIPT_LABEL: &[u8] = b"sandmail/envelope/v1";

/// Algorithm suite declared by an envelope.
///
/// Only one suite exists today. Decoders map any other `algs` declaration
/// to an unsupported-suite error rather than guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    /// ML-KEM-768, Ed25519, XChaCha20-Poly1305, HKDF-SHA-256
    V1,
}

impl CipherSuite {
    /// KEM algorithm name as it appears on the wire.
    pub const fn kem(self) -> &'static str {
        match self {
            Self::V1 => "ML-KEM-768",
        }
    }

    /// Signature algorithm name.
    pub const fn sig(self) -> &'static str {
        match self {
            Self::V1 => "Ed25519",
        }
    }

    /// AEAD algorithm name.
    pub const fn aead(self) -> &'static str {
        match self {
            Self::V1 => "XChaCha20-Poly1305",
        }
    }

    /// KDF algorithm name.
    pub const fn kdf(self) -> &'static str {
        match self {
            Self::V1 => "HKDF-SHA-256",
        }
    }

    /// Resolve a suite from its four wire names.
    pub fn from_names(kem: &str, sig: &str, aead: &str, kdf: &str) -> Option<Self> {
        let v1 = Self::V1;
        (kem == v1.kem() && sig == v1.sig() && aead == v1.aead() && kdf == v1.kdf()).then_some(v1)
    }

    fn id(self) -> u8 {
        match self {
            Self::V1 => 1,
        }
    }
}

/// Decoded envelope with raw byte fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Format version
    pub version: u8,
    /// Declared algorithm suite
    pub suite: CipherSuite,
    /// KEM ciphertext carrying the per-email shared secret
    pub encapsulated_key: Vec<u8>,
    /// AEAD nonce
    pub nonce: Vec<u8>,
    /// Associated data authenticated with the body
    pub aad: Vec<u8>,
    /// AEAD ciphertext of the email body, tag appended
    pub ciphertext: Vec<u8>,
    /// Server signature over [`Envelope::transcript`]
    pub signature: Vec<u8>,
    /// Server signature public key that produced `signature`
    pub server_sig_pk: Vec<u8>,
}

impl Envelope {
    /// Bytes covered by the server signature.
    pub fn transcript(&self) -> Vec<u8> {
        let fields = [
            &self.encapsulated_key,
            &self.nonce,
            &self.aad,
            &self.ciphertext,
            &self.server_sig_pk,
        ];
        let len = TRANSCRIPT_LABEL.len() + 2 + fields.iter().map(|f| 4 + f.len()).sum::<usize>();

        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(TRANSCRIPT_LABEL);
        out.push(self.version);
        out.push(self.suite.id());
        for field in fields {
            let field_len = u32::try_from(field.len()).unwrap_or(u32::MAX);
            out.extend_from_slice(&field_len.to_be_bytes());
            out.extend_from_slice(field);
        }
        out
    }
}

/// Encrypt and sign `plaintext` for the inbox owning `client_public_key`.
///
/// This is the server's half of the protocol. The SDK never calls it
/// outside of test harnesses, but keeping it next to the decryption path
/// makes the round trip testable.
///
/// `seed` supplies all randomness (KEM encapsulation and nonce).
///
/// # Errors
///
/// - `CryptoError::InvalidKeySize` if `client_public_key` is malformed
pub fn seal_envelope(
    plaintext: &[u8],
    aad: &[u8],
    client_public_key: &[u8],
    inbox_hash: &str,
    signer: &ServerSigner,
    seed: [u8; 32],
) -> Result<Envelope, CryptoError> {
    let mut rng = ChaCha20Rng::from_seed(seed);
    let mut kem_seed = [0u8; 32];
    rng.fill_bytes(&mut kem_seed);
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);

    let (encapsulated_key, shared) = encapsulate(client_public_key, kem_seed)?;
    let key = derive_symmetric_key(&shared, inbox_hash, &encapsulated_key);
    let ciphertext = aead::seal(&key, &nonce, aad, plaintext);

    let mut envelope = Envelope {
        version: ENVELOPE_VERSION,
        suite: CipherSuite::V1,
        encapsulated_key,
        nonce: nonce.to_vec(),
        aad: aad.to_vec(),
        ciphertext,
        signature: Vec::new(),
        server_sig_pk: signer.public_key().to_vec(),
    };
    envelope.signature = signer.sign(&envelope.transcript()).to_vec();

    Ok(envelope)
}
