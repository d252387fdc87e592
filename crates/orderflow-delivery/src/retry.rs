//! Bounded retry policy with exponential backoff.
//!
//! Decides, from the number of attempts an order has already failed, whether
//! it gets another retry and how long to wait before re-publishing it. The
//! attempt count itself lives in the retry ledger; this module is pure.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default retry cap.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry policy for failed order processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries allowed after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0). Zero gives exact delays.
    pub jitter_factor: f64,

    /// Strategy for growing the delay between retries.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay grows by the base amount each retry.
    Linear,
    /// Delay doubles each retry.
    Exponential,
}

/// Outcome of applying the policy to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-publish to the retry channel after `delay`.
    Retry {
        /// Retry number being scheduled (1-based)
        attempt: u32,
        /// Wait before publishing
        delay: Duration,
    },
    /// Retry budget exhausted; route to the dead-letter channel.
    DeadLetter {
        /// Retries that were made before giving up
        attempts: u32,
    },
}

impl RetryPolicy {
    /// Creates a policy with the given cap and base delay, exponential backoff.
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay, ..Self::default() }
    }

    /// Decides what to do with an order that has already failed
    /// `previous_attempts` retries.
    pub fn decide(&self, previous_attempts: u32) -> RetryDecision {
        if previous_attempts >= self.max_retries {
            return RetryDecision::DeadLetter { attempts: self.max_retries };
        }

        RetryDecision::Retry {
            attempt: previous_attempts + 1,
            delay: self.delay_for(previous_attempts),
        }
    }

    /// Delay before the retry that follows `previous_attempts` failed retries.
    ///
    /// With exponential backoff and a one second base this yields 1s, 2s,
    /// 4s, ... for 0, 1, 2, ... previous attempts.
    pub fn delay_for(&self, previous_attempts: u32) -> Duration {
        let base_delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => {
                self.base_delay.saturating_mul(previous_attempts.saturating_add(1))
            },
            BackoffStrategy::Exponential => {
                let multiplier = 2_u32.saturating_pow(previous_attempts.min(20));
                self.base_delay.saturating_mul(multiplier)
            },
        };

        let capped_delay = base_delay.min(self.max_delay);
        apply_jitter(capped_delay, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomizes a delay by ±`jitter_factor` to spread out retry bursts.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
