//! Wire form of the encrypted email envelope.

use sandmail_crypto::{CipherSuite, Envelope};
use serde::{Deserialize, Serialize};

use crate::{
    b64,
    errors::{ProtocolError, Result},
    version::{Versioned, check_version},
};

/// Algorithm names declared by an envelope or by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Algorithms {
    /// Key encapsulation mechanism
    pub kem: String,
    /// Signature scheme
    pub sig: String,
    /// Authenticated cipher
    pub aead: String,
    /// Key derivation function
    pub kdf: String,
}

impl Algorithms {
    /// Names of a known suite.
    pub fn from_suite(suite: CipherSuite) -> Self {
        Self {
            kem: suite.kem().to_string(),
            sig: suite.sig().to_string(),
            aead: suite.aead().to_string(),
            kdf: suite.kdf().to_string(),
        }
    }

    /// Resolve to a supported suite.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnsupportedSuite` for any unknown combination
    pub fn suite(&self) -> Result<CipherSuite> {
        CipherSuite::from_names(&self.kem, &self.sig, &self.aead, &self.kdf).ok_or_else(|| {
            ProtocolError::UnsupportedSuite {
                kem: self.kem.clone(),
                sig: self.sig.clone(),
                aead: self.aead.clone(),
                kdf: self.kdf.clone(),
            }
        })
    }
}

/// Envelope as serialized by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Format version
    pub v: u64,
    /// Declared suite
    pub algs: Algorithms,
    /// KEM ciphertext
    #[serde(with = "b64")]
    pub ct_kem: Vec<u8>,
    /// AEAD nonce
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Associated data
    #[serde(with = "b64")]
    pub aad: Vec<u8>,
    /// AEAD ciphertext
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Server signature
    #[serde(with = "b64")]
    pub sig: Vec<u8>,
    /// Server signing key
    #[serde(with = "b64")]
    pub server_sig_pk: Vec<u8>,
}

impl Versioned for WireEnvelope {
    const KIND: &'static str = "envelope";
    const VERSION_FIELD: &'static str = "v";
}

impl WireEnvelope {
    /// Validate version and suite, producing the typed envelope.
    ///
    /// Key and signature lengths are left to the crypto layer, which
    /// reports them as `CryptoError` so the item is withheld like any
    /// other cryptographic failure.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnsupportedVersion` if `v` is not 1
    /// - `ProtocolError::UnsupportedSuite` for unknown algorithms
    pub fn into_envelope(self) -> Result<Envelope> {
        check_version(Self::KIND, self.v)?;
        let suite = self.algs.suite()?;

        Ok(Envelope {
            version: self.v as u8,
            suite,
            encapsulated_key: self.ct_kem,
            nonce: self.nonce,
            aad: self.aad,
            ciphertext: self.ciphertext,
            signature: self.sig,
            server_sig_pk: self.server_sig_pk,
        })
    }
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        Self {
            v: u64::from(envelope.version),
            algs: Algorithms::from_suite(envelope.suite),
            ct_kem: envelope.encapsulated_key.clone(),
            nonce: envelope.nonce.clone(),
            aad: envelope.aad.clone(),
            ciphertext: envelope.ciphertext.clone(),
            sig: envelope.signature.clone(),
            server_sig_pk: envelope.server_sig_pk.clone(),
        }
    }
}
