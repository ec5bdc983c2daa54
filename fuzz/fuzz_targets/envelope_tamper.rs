//! Fuzz target for single-field tampering of a genuine envelope.
//!
//! A real envelope is sealed once, then the fuzzer picks a field and XORs
//! arbitrary bytes into it. Any change must be rejected: the signature
//! covers every field, so no tampered envelope may decrypt.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sandmail_crypto::{
    Envelope, KeyAgreementProvider, KeyPair, MlKemProvider, ServerSigner, seal_envelope,
};

#[derive(Debug, Arbitrary)]
enum Field {
    EncapsulatedKey,
    Nonce,
    Aad,
    Ciphertext,
    Signature,
    Version,
}

#[derive(Debug, Arbitrary)]
struct Tamper {
    field: Field,
    offset: usize,
    mask: u8,
}

fn apply(envelope: &mut Envelope, tamper: &Tamper) -> bool {
    if tamper.mask == 0 {
        return false;
    }
    let bytes = match tamper.field {
        Field::EncapsulatedKey => &mut envelope.encapsulated_key,
        Field::Nonce => &mut envelope.nonce,
        Field::Aad => &mut envelope.aad,
        Field::Ciphertext => &mut envelope.ciphertext,
        Field::Signature => &mut envelope.signature,
        Field::Version => {
            envelope.version ^= tamper.mask;
            return true;
        },
    };
    if bytes.is_empty() {
        return false;
    }
    let index = tamper.offset % bytes.len();
    bytes[index] ^= tamper.mask;
    true
}

fuzz_target!(|tamper: Tamper| {
    let keypair = KeyPair::generate([1; 32]);
    let signer = ServerSigner::from_seed([2; 32]);
    let Ok(mut envelope) =
        seal_envelope(b"{\"version\":1}", b"email-1", keypair.public_key(), "inbox", &signer, [3; 32])
    else {
        return;
    };

    if !apply(&mut envelope, &tamper) {
        return;
    }

    let opened =
        MlKemProvider.open_envelope(&envelope, &keypair, "inbox", &signer.public_key());
    assert!(opened.is_err(), "tampered envelope opened: {tamper:?}");
});
