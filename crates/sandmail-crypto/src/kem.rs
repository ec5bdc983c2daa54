//! ML-KEM-768 key encapsulation (FIPS 203).
//!
//! Keypairs are generated from a caller-provided 32-byte seed expanded with
//! ChaCha20, so production callers pass OS entropy and tests pass fixed
//! seeds.
//!
//! The encoded secret key embeds the public key:
//!
//! ```text
//! dk_pke (1152) || ek (1184) || H(ek) (32) || z (32)  = 2400 bytes
//! ```
//!
//! which is what lets an exported inbox carry only the secret key.

use std::fmt;

use ml_kem::{
    Ciphertext, Encoded, EncodedSizeUser, KemCore, MlKem768,
    kem::{Decapsulate, Encapsulate},
};
use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Size of an ML-KEM-768 public (encapsulation) key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 1184;

/// Size of an ML-KEM-768 secret (decapsulation) key in bytes.
pub const SECRET_KEY_SIZE: usize = 2400;

/// Size of an ML-KEM-768 encapsulated key (KEM ciphertext) in bytes.
pub const ENCAPSULATED_KEY_SIZE: usize = 1088;

/// Size of the decapsulated shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Offset of the embedded public key inside the encoded secret key.
const EMBEDDED_PUBLIC_KEY_OFFSET: usize = 1152;

/// Fixed encapsulation seed for the pairwise check; only the agreement of
/// the two secrets matters, so the seed need not be random.
const CONSISTENCY_SEED: [u8; 32] = [0x5a; 32];

type DecapsulationKey = <MlKem768 as KemCore>::DecapsulationKey;
type EncapsulationKey = <MlKem768 as KemCore>::EncapsulationKey;

/// Client-side ML-KEM-768 keypair.
///
/// # Invariants
///
/// - `public_key().len() == PUBLIC_KEY_SIZE`
/// - `secret_key().len() == SECRET_KEY_SIZE`
/// - The public key equals the copy embedded in the secret key
///
/// The secret key is zeroized on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    public_key: Vec<u8>,
    secret_key: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh keypair from 32 bytes of caller-provided entropy.
    ///
    /// Every call with a distinct seed yields an unrelated keypair. Nothing
    /// is cached.
    pub fn generate(seed: [u8; 32]) -> Self {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let (dk, ek) = MlKem768::generate(&mut rng);

        Self {
            public_key: ek.as_bytes().as_slice().to_vec(),
            secret_key: dk.as_bytes().as_slice().to_vec(),
        }
    }

    /// Rebuild a keypair from an encoded secret key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKeySize` if `secret_key` is not 2400 bytes
    /// - `CryptoError::MalformedKey` if the embedded public key or its hash
    ///   does not belong to the decapsulation key
    pub fn from_secret_key(secret_key: &[u8]) -> Result<Self, CryptoError> {
        if secret_key.len() != SECRET_KEY_SIZE {
            return Err(CryptoError::key_size("secret key", SECRET_KEY_SIZE, secret_key.len()));
        }

        let public_key = secret_key
            [EMBEDDED_PUBLIC_KEY_OFFSET..EMBEDDED_PUBLIC_KEY_OFFSET + PUBLIC_KEY_SIZE]
            .to_vec();

        // A corrupted dk_pke, ek or H(ek) sends decapsulation down the
        // implicit-rejection path, so the two secrets disagree
        let (encapsulated, sent) = encapsulate(&public_key, CONSISTENCY_SEED)?;
        let received = decapsulate(secret_key, &encapsulated)?;
        if sent.as_bytes() != received.as_bytes() {
            return Err(CryptoError::MalformedKey {
                what: "secret key",
                reason: "embedded public key does not match".to_string(),
            });
        }

        Ok(Self { public_key, secret_key: secret_key.to_vec() })
    }

    /// Encoded public key, sent to the server at inbox creation.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Encoded secret key.
    ///
    /// # Security
    ///
    /// Only leaves the process inside an explicit inbox export.
    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key_len", &self.public_key.len())
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Shared secret established by encapsulation/decapsulation.
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Raw secret bytes, fed into key derivation.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Recover the shared secret from an encapsulated key.
///
/// # Errors
///
/// - `CryptoError::InvalidKeySize` if either input has the wrong length
/// - `CryptoError::DecryptionFailed` if the KEM rejects the ciphertext
pub fn decapsulate(secret_key: &[u8], encapsulated_key: &[u8]) -> Result<SharedSecret, CryptoError> {
    if secret_key.len() != SECRET_KEY_SIZE {
        return Err(CryptoError::key_size("secret key", SECRET_KEY_SIZE, secret_key.len()));
    }
    if encapsulated_key.len() != ENCAPSULATED_KEY_SIZE {
        return Err(CryptoError::key_size(
            "encapsulated key",
            ENCAPSULATED_KEY_SIZE,
            encapsulated_key.len(),
        ));
    }

    let encoded = Encoded::<DecapsulationKey>::try_from(secret_key)
        .map_err(|_| CryptoError::key_size("secret key", SECRET_KEY_SIZE, secret_key.len()))?;
    let dk = DecapsulationKey::from_bytes(&encoded);

    let ciphertext = Ciphertext::<MlKem768>::try_from(encapsulated_key).map_err(|_| {
        CryptoError::key_size("encapsulated key", ENCAPSULATED_KEY_SIZE, encapsulated_key.len())
    })?;

    let shared = dk.decapsulate(&ciphertext).map_err(|_| CryptoError::DecryptionFailed {
        reason: "decapsulation rejected".to_string(),
    })?;

    let mut secret = [0u8; SHARED_SECRET_SIZE];
    secret.copy_from_slice(shared.as_slice());
    Ok(SharedSecret(secret))
}

/// Encapsulate a fresh shared secret to `public_key` (sender side).
///
/// Returns the encapsulated key to transmit and the shared secret.
///
/// # Errors
///
/// - `CryptoError::InvalidKeySize` if `public_key` is not 1184 bytes
pub fn encapsulate(
    public_key: &[u8],
    seed: [u8; 32],
) -> Result<(Vec<u8>, SharedSecret), CryptoError> {
    if public_key.len() != PUBLIC_KEY_SIZE {
        return Err(CryptoError::key_size("public key", PUBLIC_KEY_SIZE, public_key.len()));
    }

    let encoded = Encoded::<EncapsulationKey>::try_from(public_key)
        .map_err(|_| CryptoError::key_size("public key", PUBLIC_KEY_SIZE, public_key.len()))?;
    let ek = EncapsulationKey::from_bytes(&encoded);

    let mut rng = ChaCha20Rng::from_seed(seed);
    let (ciphertext, shared) = ek.encapsulate(&mut rng).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "encapsulation rejected".to_string() }
    })?;

    let mut secret = [0u8; SHARED_SECRET_SIZE];
    secret.copy_from_slice(shared.as_slice());
    Ok((ciphertext.as_slice().to_vec(), SharedSecret(secret)))
}
