// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for pipeline and integration tests.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - Recording mock gateways with scripted failures
//! - Change event and wait helpers

#![allow(dead_code)]

pub mod containers;
pub mod mock_gateway;

pub use containers::*;
pub use mock_gateway::*;

use category_replicator::{ChangeEvent, Operation, OutboundRecord, Source};
use std::future::Future;
use std::time::Duration;

/// Encode a change event the way the upstream connector does.
pub fn change(op: Operation, key: &str) -> Vec<u8> {
    ChangeEvent::new(
        op,
        key,
        Source {
            name: "adm_videos_mysql".to_string(),
            database: "adm_videos".to_string(),
            table: "categories".to_string(),
        },
    )
    .encode()
}

/// Outbound record for the main topic, keyed like the upstream producer.
pub fn main_record(key: &str, payload: Vec<u8>) -> OutboundRecord {
    OutboundRecord::new(key, payload)
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
