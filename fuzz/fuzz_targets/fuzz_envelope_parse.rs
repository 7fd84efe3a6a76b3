#![no_main]

//! Envelope decoding, extraction and dedup over arbitrary bodies.

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use wa_edge::telemetry::RecordingSink;
use wa_edge::webhook::{Deduplicator, Envelope};

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = Envelope::decode(data) else {
        return;
    };
    let parsed = envelope.extract("109876543210");
    let outcome = Deduplicator::new(Arc::new(RecordingSink::new())).dedup(parsed.messages, "fuzz");

    assert!(outcome.unique.iter().all(|m| !m.id.is_empty()));
    let mut ids: Vec<&str> = outcome.unique.iter().map(|m| m.id.as_str()).collect();
    let before = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), before);
});
