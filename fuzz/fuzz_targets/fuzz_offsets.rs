// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fuzz target for offset ordering and topic-to-stage resolution.

#![no_main]

use category_replicator::escalation::TopicChain;
use category_replicator::transport::compare_offsets;
use libfuzzer_sys::fuzz_target;
use std::cmp::Ordering;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    // Should never panic
    let ab = compare_offsets(a, b);
    let ba = compare_offsets(b, a);
    assert_eq!(ab.reverse(), ba);
    assert_eq!(compare_offsets(a, a), Ordering::Equal);

    // Any resolved stage must map back to the same topic.
    let chain = TopicChain::for_attempts(a, 4);
    if let Some(stage) = chain.stage_of(b) {
        assert_eq!(chain.topic_for(stage), b);
    }
});
