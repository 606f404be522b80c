//! Bounded exponential backoff used by confirmation and intent polling.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Polling budget: attempt count plus an exponentially growing delay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Maximum number of checks, including the first one
    pub max_attempts: u32,
    /// Delay before the second check, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor applied after each attempt
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            multiplier,
        }
    }

    /// Policy with no waiting between attempts (tests, dry runs)
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Delay to sleep after the given zero-based attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// Sum of every delay the policy can spend
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_after(attempt))
            .sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("multiplier must be a finite number >= 1.0".to_string());
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err("initial_delay_ms must not exceed max_delay_ms".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = BackoffPolicy::new(6, Duration::from_millis(100), Duration::from_millis(500), 2.0);
        assert_eq!(policy.delay_after(0), Duration::from_millis(100));
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
        assert_eq!(policy.delay_after(3), Duration::from_millis(500));
        assert_eq!(policy.delay_after(30), Duration::from_millis(500));
    }

    #[test]
    fn test_total_budget() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), 2.0);
        assert_eq!(policy.total_budget(), Duration::from_millis(300));
        assert_eq!(BackoffPolicy::immediate(5).total_budget(), Duration::ZERO);
    }

    #[test]
    fn test_validate() {
        assert!(BackoffPolicy::default().validate().is_ok());
        assert!(BackoffPolicy::immediate(0).validate().is_err());

        let mut shrinking = BackoffPolicy::default();
        shrinking.multiplier = 0.5;
        assert!(shrinking.validate().is_err());
    }
}
