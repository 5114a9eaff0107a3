// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: backoff schedules and rate limiting.
//!
//! - [`RetryConfig`]: exponential backoff, used for transport reconnects,
//!   republish retries and the delay between retry-topic hops
//! - [`RateLimiter`]: token bucket shared by all partition workers
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use category_replicator::resilience::{RateLimiter, RateLimitConfig, RetryConfig};
//!
//! // Max 1000 messages/sec across workers, burst of 100
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! limiter.acquire().await;
//!
//! // Hop delays: 1s, 2s, 4s ...
//! let hops = RetryConfig::hops(
//!     std::time::Duration::from_secs(1),
//!     2.0,
//!     std::time::Duration::from_secs(30),
//! );
//! assert_eq!(hops.delay_for_attempt(2), std::time::Duration::from_secs(2));
//! # }
//! ```

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

/// Exponential backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    /// Set to `usize::MAX` to retry until shutdown.
    pub max_attempts: usize,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual connection attempt.
    pub connection_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Fast-fail retry for the initial transport connection.
    ///
    /// ```text
    /// Attempt  Delay     Cumulative
    /// -------  -----     ----------
    /// 1        500ms     500ms
    /// 2        750ms     1.25s
    /// 3        1.12s     2.37s
    /// ...
    /// 20       30s       ~45s (total)
    /// ```
    pub fn startup() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 1.5,
            connection_timeout: Duration::from_secs(10),
        }
    }

    /// Republishing to the next topic: retry until shutdown, capped at 30s.
    ///
    /// A record is never acknowledged before its hop is published, so the
    /// worker keeps trying rather than dropping it.
    pub fn republish() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Delay schedule between retry-topic hops.
    pub fn hops(initial_delay: Duration, backoff_factor: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay,
            max_delay,
            backoff_factor,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_millis(500),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1).min(i32::MAX as usize) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Configuration for rate limiting.
///
/// Uses a token bucket algorithm: tokens refill at `refill_rate` per second,
/// up to `burst_size` tokens. Each message consumes one token.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens that can be accumulated (burst capacity).
    pub burst_size: u32,

    /// Tokens added per second (sustained rate).
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    /// Default: 1000 msgs/sec with burst of 100.
    fn default() -> Self {
        Self {
            burst_size: 100,
            refill_rate: 1000,
        }
    }
}

/// Token bucket rate limiter.
///
/// Shared between workers through an `Arc`; thread-safe and async-aware.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        let limiter = GovLimiter::direct(quota);

        Self { limiter }
    }

    /// Acquire a permit, waiting until one is available.
    ///
    /// This method is cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to acquire a permit without waiting.
    #[cfg(test)]
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
