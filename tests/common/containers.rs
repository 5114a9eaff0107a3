// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides helpers to spin up Redis containers for integration tests.

use category_replicator::transport::{partition_for, stream_key};
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// A Redis node acting as the upstream change-event producer.
pub struct TestBroker<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub redis_url: String,
}

impl<'a> TestBroker<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let redis_url = redis_url(&container);
        Self { container, redis_url }
    }

    async fn connection(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        client.get_multiplexed_async_connection().await
    }

    /// Append a bare change event the way an upstream producer does:
    /// only `key` and `payload`, routed by key.
    pub async fn produce(
        &self,
        topic: &str,
        partitions: u32,
        key: &str,
        payload: &[u8],
    ) -> redis::RedisResult<String> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let stream = stream_key(topic, partition_for(key, partitions));
        let fields: [(&str, &[u8]); 2] = [("key", key.as_bytes()), ("payload", payload)];
        conn.xadd(stream, "*", &fields).await
    }

    /// Total entries across every partition of a topic.
    pub async fn topic_len(&self, topic: &str, partitions: u32) -> redis::RedisResult<usize> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let mut total = 0;
        for partition in 0..partitions {
            let len: usize = conn.xlen(stream_key(topic, partition)).await?;
            total += len;
        }
        Ok(total)
    }
}
