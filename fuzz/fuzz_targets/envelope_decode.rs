//! Fuzz target for wire envelope decoding and opening.
//!
//! Arbitrary bytes are decoded as a versioned envelope, converted to the
//! crypto representation and opened with a fixed keypair. Looks for:
//! - Panics on malformed base64, lengths or suite names
//! - Envelopes that decrypt without a valid server signature
//!
//! The fuzzer should NEVER panic and NEVER produce plaintext.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sandmail_crypto::{KeyAgreementProvider, KeyPair, MlKemProvider, ServerSigner};
use sandmail_proto::{WireEnvelope, decode_json};

fuzz_target!(|data: &[u8]| {
    let Ok(wire) = decode_json::<WireEnvelope>(data) else {
        return;
    };
    let Ok(envelope) = wire.into_envelope() else {
        return;
    };

    let keypair = KeyPair::generate([7; 32]);
    let server_pk = ServerSigner::from_seed([9; 32]).public_key();
    let opened = MlKemProvider.open_envelope(&envelope, &keypair, "inbox", &server_pk);
    assert!(opened.is_err(), "forged envelope opened");
});
