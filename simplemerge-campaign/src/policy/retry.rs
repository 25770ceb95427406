//! Bounded retry policy for durable ledger writes.
//!
//! A sent-log append that fails is retried a few times with exponential
//! backoff before the engine gives up on it and reports the failure.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry configuration for durable ledger appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of write attempts, including the first.
    ///
    /// Default: 3 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (in milliseconds).
    ///
    /// The actual delay is calculated as: `base * 2^(attempt - 1)`
    ///
    /// Default: 250 milliseconds
    #[serde(default = "defaults::base_delay_millis")]
    pub base_delay_millis: u64,

    /// Upper bound on any single backoff (in milliseconds).
    ///
    /// Default: 2000 milliseconds
    #[serde(default = "defaults::max_delay_millis")]
    pub max_delay_millis: u64,

    /// Jitter factor for randomizing retry delays.
    ///
    /// Default: 0.1 (±10%)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_millis: defaults::base_delay_millis(),
            max_delay_millis: defaults::max_delay_millis(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Check if another attempt should be made after `attempts` have failed.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff to wait after the `attempt`-th failure (1-indexed).
    ///
    /// `delay = min(base * 2^(attempt - 1), max) * (1 ± jitter)`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_delay_millis
        } else {
            self.base_delay_millis
                .saturating_mul(1u64 << exponent)
                .min(self.max_delay_millis)
        };

        if self.jitter_factor <= 0.0 || delay == 0 {
            return Duration::from_millis(delay);
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = {
            let range = (delay as f64) * self.jitter_factor;
            let jitter: f64 = rand::rng().random_range(-range..=range);
            ((delay as f64) + jitter).max(0.0) as u64
        };

        Duration::from_millis(jittered)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_delay_millis() -> u64 {
        250
    }

    pub const fn max_delay_millis() -> u64 {
        2_000
    }

    pub const fn jitter_factor() -> f64 {
        0.1 // ±10%
    }
}
