//! Pacing between sends and between rounds
//!
//! Two independent limits apply:
//! - Rounds are separated by a jittered delay so traffic looks human
//! - Consecutive sends from the same sender are at least
//!   `min_send_interval` apart, whatever the round delay
//!
//! Every wait is sliced into increments of at most [`WAIT_INCREMENT`] and the
//! stop flag is re-checked after each one, so a stop request is honoured
//! within one increment.

use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use rand::Rng;
use tokio::time::Instant;

use crate::run::StopFlag;

/// Longest uninterrupted sleep.
pub const WAIT_INCREMENT: Duration = Duration::from_secs(1);

/// Floor for any round delay.
pub const MIN_ROUND_DELAY: Duration = Duration::from_millis(100);

/// How a cancellable wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Elapsed,
    Cancelled,
}

/// `base ± uniform(jitter)`, floored at [`MIN_ROUND_DELAY`].
#[must_use]
pub fn delay_for_round(base: Duration, jitter: Duration) -> Duration {
    #[allow(clippy::cast_possible_truncation)]
    let (base_ms, jitter_ms) = (base.as_millis() as i64, jitter.as_millis() as i64);

    let offset = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(-jitter_ms..=jitter_ms)
    };

    let delay = Duration::from_millis(u64::try_from(base_ms + offset).unwrap_or_default());
    delay.max(MIN_ROUND_DELAY)
}

/// Sleep for `duration`, checking `stop` every [`WAIT_INCREMENT`].
///
/// `on_tick` is called before each increment with the time remaining, which
/// the dispatch loop uses to drive the countdown label.
pub async fn wait_cancellable<F>(duration: Duration, stop: &StopFlag, mut on_tick: F) -> Wait
where
    F: FnMut(Duration),
{
    let deadline = Instant::now() + duration;

    loop {
        if stop.is_requested() {
            return Wait::Cancelled;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Wait::Elapsed;
        }

        on_tick(remaining);
        tokio::time::sleep(remaining.min(WAIT_INCREMENT)).await;
    }
}

/// Enforces the minimum gap between sends from the same sender.
#[derive(Debug)]
pub struct RateGovernor {
    min_send_interval: Duration,
    last_send: AHashMap<Arc<str>, Instant>,
}

impl RateGovernor {
    #[must_use]
    pub fn new(min_send_interval: Duration) -> Self {
        Self {
            min_send_interval,
            last_send: AHashMap::default(),
        }
    }

    /// How long `sender` must still wait before its next send.
    #[must_use]
    pub fn time_until_ready(&self, sender: &str) -> Duration {
        self.last_send.get(sender).map_or(Duration::ZERO, |last| {
            (*last + self.min_send_interval).saturating_duration_since(Instant::now())
        })
    }

    /// Wait until `sender` may send again, or until a stop is requested.
    pub async fn pace(&self, sender: &str, stop: &StopFlag) -> Wait {
        let wait = self.time_until_ready(sender);
        if wait.is_zero() {
            return if stop.is_requested() {
                Wait::Cancelled
            } else {
                Wait::Elapsed
            };
        }

        wait_cancellable(wait, stop, |_| {}).await
    }

    /// Note that `sender` just sent a message.
    pub fn record_send(&mut self, sender: &Arc<str>) {
        self.last_send.insert(Arc::clone(sender), Instant::now());
    }
}
