/// Retry and circuit breaker module
///
/// A failed cycle is retried a few times with exponential backoff. Once a number
/// of cycles in a row have exhausted their retries the breaker opens and further
/// cycles are skipped until the cooldown passes.

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base, 2*base, 4*base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub failures: u32,
    pub is_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_until_ms: Option<i64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown_ms: i64,
    failures: u32,
    open_until_ms: Option<i64>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown_ms: i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX),
            failures: 0,
            open_until_ms: None,
        }
    }

    /// Remaining cooldown in ms when attempts are currently suppressed
    pub fn blocked_for(&self, now_ms: i64) -> Option<i64> {
        match self.open_until_ms {
            Some(until) if now_ms < until => Some(until - now_ms),
            _ => None,
        }
    }

    pub fn record_success(&mut self) {
        if self.failures > 0 || self.open_until_ms.is_some() {
            log::info!("Circuit breaker closed after a successful cycle");
        }
        self.failures = 0;
        self.open_until_ms = None;
    }

    /// Count a cycle that exhausted its retries. Returns true when this opened the breaker.
    pub fn record_failure(&mut self, now_ms: i64) -> bool {
        self.failures += 1;
        if self.failures >= self.threshold {
            let until = now_ms.saturating_add(self.cooldown_ms);
            self.open_until_ms = Some(until);
            log::error!(
                "Circuit breaker opened after {} failed cycles, next attempt in {} min",
                self.failures,
                self.cooldown_ms / 60_000
            );
            return true;
        }
        false
    }

    pub fn status(&self, now_ms: i64) -> BreakerStatus {
        BreakerStatus {
            failures: self.failures,
            is_open: self.blocked_for(now_ms).is_some(),
            open_until_ms: self.open_until_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
    }

    #[test]
    fn opens_after_threshold_and_reopens_after_cooldown() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(1800));
        assert!(!breaker.record_failure(0));
        assert!(!breaker.record_failure(10));
        assert!(breaker.record_failure(20));

        assert_eq!(breaker.blocked_for(21), Some(1_800_000 - 1));
        assert!(breaker.blocked_for(20 + 1_800_000).is_none());

        // half-open: one more failure keeps it open
        assert!(breaker.record_failure(2_000_000));
        assert!(breaker.blocked_for(2_000_001).is_some());
    }

    #[test]
    fn success_resets() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure(0);
        breaker.record_failure(0);
        assert!(breaker.status(1).is_open);

        breaker.record_success();
        let status = breaker.status(1);
        assert_eq!(status.failures, 0);
        assert!(!status.is_open);
    }
}
