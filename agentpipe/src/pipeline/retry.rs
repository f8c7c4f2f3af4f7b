//! Retry decisions with fixed or exponential back-off.
//!
//! The decision functions are pure: given how many attempts a job has made
//! and its policy, they answer whether to try again and how long to wait.
//! Jitter is opt-in and applied on top of the deterministic delay.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Back-off strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// delay = base
    #[default]
    Fixed,
    /// delay = base * 2^(attempt - 1)
    Exponential,
}

/// Jitter applied to the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Per-job retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum dispatch attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Back-off strategy.
    #[serde(default)]
    pub backoff: Backoff,
    /// Base delay in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
    /// Upper bound on any single delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Jitter strategy.
    #[serde(default, skip_serializing_if = "is_no_jitter")]
    pub jitter: JitterStrategy,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_no_jitter(jitter: &JitterStrategy) -> bool {
    *jitter == JitterStrategy::None
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Creates a policy without cap or jitter.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Backoff, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff,
            delay_ms,
            max_delay_ms: None,
            jitter: JitterStrategy::None,
        }
    }

    /// The policy used when a job declares none: a single attempt.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1, Backoff::Fixed, 0)
    }

    /// Caps every delay at `max_delay_ms`.
    #[must_use]
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Returns true if a job that has made `attempts` attempts may try again.
#[must_use]
pub fn should_retry(attempts: u32, policy: Option<&RetryPolicy>) -> bool {
    let max_attempts = policy.map_or(1, |p| p.max_attempts);
    attempts < max_attempts
}

/// Deterministic delay before the attempt following attempt number `attempts`.
///
/// Fixed back-off returns `delayMs`; exponential returns
/// `delayMs * 2^(attempts - 1)`, saturating, and capped by `maxDelayMs`.
#[must_use]
pub fn delay_for(attempts: u32, policy: Option<&RetryPolicy>) -> Duration {
    let Some(policy) = policy else {
        return Duration::ZERO;
    };

    let base = policy.delay_ms;
    let delay = match policy.backoff {
        Backoff::Fixed => base,
        Backoff::Exponential => {
            let exponent = attempts.saturating_sub(1);
            base.saturating_mul(2u64.saturating_pow(exponent))
        }
    };
    let delay = policy.max_delay_ms.map_or(delay, |max| delay.min(max));

    Duration::from_millis(delay)
}

/// [`delay_for`] with the policy's jitter strategy applied.
#[must_use]
pub fn jittered_delay_for(attempts: u32, policy: Option<&RetryPolicy>) -> Duration {
    let delay = delay_for(attempts, policy);
    let jitter = policy.map_or(JitterStrategy::None, |p| p.jitter);
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

    let jittered = match jitter {
        JitterStrategy::None => millis,
        JitterStrategy::Full => {
            if millis == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..=millis)
            }
        }
        JitterStrategy::Equal => {
            let half = millis / 2;
            if half == 0 {
                millis
            } else {
                half + rand::thread_rng().gen_range(0..=half)
            }
        }
    };

    Duration::from_millis(jittered)
}
