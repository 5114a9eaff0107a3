// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry escalation state machine.
//!
//! A message that fails with a retryable error is republished, unchanged,
//! to the next topic of a fixed chain:
//!
//! ```text
//! ┌──────┐  fail  ┌─────────┐  fail  ┌─────────┐  fail  ┌─────────┐  fail  ┌─────┐
//! │ main │ ─────► │ retry-0 │ ─────► │ retry-1 │ ─────► │ retry-2 │ ─────► │ dlt │
//! └──────┘        └─────────┘        └─────────┘        └─────────┘        └─────┘
//!    │ ok              │ ok               │ ok               │ ok          terminal
//!    ▼                 ▼                  ▼                  ▼
//!   ack               ack                ack                ack
//! ```
//!
//! With `attempts` total processing attempts there are `attempts - 1` retry
//! stages. Each hop carries a delay of `initial × multiplier^hop`, capped,
//! which the consuming worker honours before processing.
//!
//! Non-retryable errors never hop; they are rejected to the alert channel.

use crate::error::ReplicatorError;
use crate::resilience::RetryConfig;
use std::time::Duration;

/// Position of a topic in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Main,
    Retry(u32),
    DeadLetter,
}

impl Stage {
    /// Whether no further processing happens in this stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::DeadLetter)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Main => write!(f, "main"),
            Stage::Retry(n) => write!(f, "retry-{}", n),
            Stage::DeadLetter => write!(f, "dlt"),
        }
    }
}

/// Maps stages to topic names and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicChain {
    main: String,
    retries: u32,
}

impl TopicChain {
    pub fn new(main: impl Into<String>, retries: u32) -> Self {
        Self {
            main: main.into(),
            retries,
        }
    }

    /// Chain for a given total number of processing attempts (>= 1).
    pub fn for_attempts(main: impl Into<String>, attempts: u32) -> Self {
        Self::new(main, attempts.saturating_sub(1))
    }

    pub fn main(&self) -> &str {
        &self.main
    }

    /// Number of retry stages between main and the dead-letter topic.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Topic name for a stage.
    pub fn topic_for(&self, stage: Stage) -> String {
        match stage {
            Stage::Main => self.main.clone(),
            Stage::Retry(n) => format!("{}-retry-{}", self.main, n),
            Stage::DeadLetter => format!("{}-dlt", self.main),
        }
    }

    /// Stage a topic belongs to, `None` if it is not part of this chain.
    pub fn stage_of(&self, topic: &str) -> Option<Stage> {
        if topic == self.main {
            return Some(Stage::Main);
        }

        let suffix = topic.strip_prefix(self.main.as_str())?;
        if suffix == "-dlt" {
            return Some(Stage::DeadLetter);
        }

        let n = suffix.strip_prefix("-retry-")?;
        // Reject "-retry-01" and "+1" so the mapping stays one-to-one.
        if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) || (n.len() > 1 && n.starts_with('0')) {
            return None;
        }
        let n: u32 = n.parse().ok()?;
        (n < self.retries).then_some(Stage::Retry(n))
    }

    /// The stage after `stage`, `None` past the dead-letter topic.
    pub fn next(&self, stage: Stage) -> Option<Stage> {
        match stage {
            Stage::Main if self.retries > 0 => Some(Stage::Retry(0)),
            Stage::Main => Some(Stage::DeadLetter),
            Stage::Retry(n) if n + 1 < self.retries => Some(Stage::Retry(n + 1)),
            Stage::Retry(_) => Some(Stage::DeadLetter),
            Stage::DeadLetter => None,
        }
    }

    /// Every stage in chain order.
    pub fn stages(&self) -> Vec<Stage> {
        std::iter::once(Stage::Main)
            .chain((0..self.retries).map(Stage::Retry))
            .chain(std::iter::once(Stage::DeadLetter))
            .collect()
    }

    /// Every topic in chain order.
    pub fn topics(&self) -> Vec<String> {
        self.stages().into_iter().map(|s| self.topic_for(s)).collect()
    }
}

/// What to do with a message whose processing failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// Give up without publishing; report on the alert channel.
    Reject,
    /// Republish to a retry topic, not to be processed before `delay` passes.
    Retry {
        stage: Stage,
        topic: String,
        attempt: u32,
        delay: Duration,
    },
    /// Republish to the dead-letter topic.
    DeadLetter { topic: String, attempt: u32 },
}

/// Decides where a failed message goes next.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    chain: TopicChain,
    backoff: RetryConfig,
    dead_letter_missing_records: bool,
}

impl EscalationPolicy {
    pub fn new(chain: TopicChain, backoff: RetryConfig) -> Self {
        Self {
            chain,
            backoff,
            dead_letter_missing_records: false,
        }
    }

    /// Send lookup misses straight to the dead-letter topic instead of
    /// walking the retry stages.
    pub fn with_dead_letter_missing_records(mut self, enabled: bool) -> Self {
        self.dead_letter_missing_records = enabled;
        self
    }

    pub fn chain(&self) -> &TopicChain {
        &self.chain
    }

    /// Delay before a message may be processed in `stage`.
    pub fn delay_for(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Retry(n) => self.backoff.delay_for_attempt(n as usize + 1),
            Stage::Main | Stage::DeadLetter => Duration::ZERO,
        }
    }

    /// Transition for a failure of the `attempt`-th processing in `stage`.
    ///
    /// The dead-letter stage never dispatches, so a failure reported from it
    /// can only be rejected.
    pub fn on_failure(&self, stage: Stage, attempt: u32, error: &ReplicatorError) -> Escalation {
        if !error.is_retryable() || stage.is_terminal() {
            return Escalation::Reject;
        }

        let attempt = attempt.saturating_add(1);
        let next = if self.dead_letter_missing_records && error.is_not_found() {
            Stage::DeadLetter
        } else {
            match self.chain.next(stage) {
                Some(next) => next,
                None => return Escalation::Reject,
            }
        };

        match next {
            Stage::DeadLetter => Escalation::DeadLetter {
                topic: self.chain.topic_for(Stage::DeadLetter),
                attempt,
            },
            stage => Escalation::Retry {
                stage,
                topic: self.chain.topic_for(stage),
                attempt,
                delay: self.delay_for(stage),
            },
        }
    }
}
