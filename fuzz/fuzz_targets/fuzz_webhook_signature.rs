#![no_main]

//! Signature verification must never panic, whatever the header looks like,
//! and must accept exactly the header it would have produced itself.

use libfuzzer_sys::fuzz_target;
use wa_edge::security::signature::{sign_body, verify_signature};

fuzz_target!(|data: &[u8]| {
    // First byte picks a split point: header | body.
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(rest.len());
    let (header, body) = rest.split_at(split);
    let header = String::from_utf8_lossy(header);

    let _ = verify_signature("fuzz-secret", body, &header);

    let genuine = sign_body("fuzz-secret", body);
    assert!(verify_signature("fuzz-secret", body, &genuine));
    assert!(!verify_signature("other-secret", body, &genuine));
});
