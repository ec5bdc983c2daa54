//! Fuzz target for inbox export parsing.
//!
//! Any accepted export must carry a supported version, be encrypted and
//! hold a secret key that rebuilds a keypair. Anything else must be an
//! error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sandmail_proto::InboxExport;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(export) = InboxExport::from_json(json) else {
        return;
    };

    assert!(export.encrypted);
    assert_eq!(export.version, 1);
    assert!(export.keypair().is_ok(), "validated export with unusable key");
    let _ = export.to_json();
});
