// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fuzz target for change event decoding.
//!
//! Arbitrary bytes must never panic the decoder, and every decoded
//! mutation must carry a usable key.

#![no_main]

use category_replicator::envelope::{decode, Operation};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = decode(data) {
        if event.operation.is_mutation() {
            let key = event.key().unwrap_or_default();
            assert!(!key.trim().is_empty());
        }

        // Re-encoding a decoded event is stable.
        let again = decode(&event.encode()).expect("re-encoded event decodes");
        assert_eq!(again.operation, event.operation);
        // Truncate carries no key on the wire.
        if event.operation != Operation::Truncate {
            assert_eq!(again.key(), event.key());
        }
    }
});
