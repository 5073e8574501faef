//! Reconnect backoff.
//!
//! The bus is treated as infrastructure that eventually comes back, so the
//! policy has no attempt cap: the driver keeps retrying with an exponentially
//! growing delay bounded by `max_delay_ms`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry (default: 250ms).
    pub initial_delay_ms: u64,
    /// Upper bound on any delay (default: 10s).
    pub max_delay_ms: u64,
    /// Multiplier applied after each failed attempt (default: 2.0).
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(initial_delay: Duration, max_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            initial_delay_ms: initial_delay.as_millis().min(u64::MAX as u128) as u64,
            max_delay_ms: max_delay.as_millis().min(u64::MAX as u128) as u64,
            backoff_factor: backoff_factor.max(1.0),
        }
    }

    /// Constant delay, mostly useful in tests.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay, 1.0)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.backoff_factor.is_finite() && self.backoff_factor >= 1.0) {
            return Err(Error::Config(format!(
                "retry backoff_factor must be at least 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::Config(
                "retry max_delay_ms must not be below initial_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-indexed).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31) as i32;
        let base_ms = (self.initial_delay_ms as f64) * self.backoff_factor.powi(exp);
        let delay_ms = base_ms.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_then_cap() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 2.0);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(0), policy.delay_for_attempt(10));
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let policy = RetryPolicy {
            backoff_factor: 0.5,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }
}
