//! Bounded retry with exponential backoff.

use std::time::Duration;

use crate::config::RetryConfig;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            multiplier: if cfg.backoff_multiplier.is_finite() && cfg.backoff_multiplier >= 1.0 {
                cfg.backoff_multiplier
            } else {
                1.0
            },
            max_backoff: MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Sleep before attempt `attempt` (1-based). Attempt 1 never waits.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi((attempt - 2).min(64) as i32);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.backoff_for(1), Duration::ZERO);
        assert_eq!(p.backoff_for(2), Duration::from_secs(2));
        assert_eq!(p.backoff_for(3), Duration::from_secs(4));
        assert_eq!(p.backoff_for(4), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_for(20), MAX_BACKOFF);
        assert_eq!(p.backoff_for(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn test_config_sanitized() {
        let p = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            initial_backoff_ms: 100,
            backoff_multiplier: f64::NAN,
        });
        assert_eq!(p.max_attempts, 1);
        assert!(!p.should_retry(1));
        assert_eq!(p.backoff_for(5), Duration::from_millis(100));
    }
}
