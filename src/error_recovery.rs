//! Retry policies for the two places a sweep is allowed to wait and try again.
//!
//! Camera connection retries at a fixed interval while the camera reports
//! `DeviceNotFound`; the file-added poll hands each attempt a time budget that
//! grows geometrically up to a cap. Both are driven by [`RetryPolicy`], whose
//! [`RetryPolicy::delays`] iterator is unbounded unless `max_attempts` is set.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay (or per-attempt budget) of the first attempt.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound for the delay once backoff has grown it.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor applied after every attempt. `1.0` keeps the delay fixed.
    pub multiplier: f64,
    /// The maximum number of attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Unbounded policy with a constant delay.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    /// Unbounded policy doubling from `initial` up to `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    /// Cap the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay sequence, one entry per attempt.
    pub fn delays(&self) -> Backoff {
        Backoff {
            next: self.initial_delay,
            max: self.max_delay.max(self.initial_delay),
            multiplier: if self.multiplier.is_finite() && self.multiplier >= 1.0 {
                self.multiplier
            } else {
                1.0
            },
            remaining: self.max_attempts,
        }
    }
}

/// Iterator over the delays of a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    remaining: Option<u32>,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        let current = self.next;
        let grown = current.as_secs_f64() * self.multiplier;
        self.next = if grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(grown)
        };
        Some(current)
    }
}

/// Result of a bounded poll: the awaited condition was observed, or the
/// policy ran out of attempts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Condition observed on attempt number `attempts`.
    Ready { attempts: u32 },
    /// Every attempt allowed by the policy came back negative.
    Exhausted { attempts: u32 },
}

impl PollOutcome {
    /// Whether the awaited condition was observed.
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }
}
