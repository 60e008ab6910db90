//! Time source for the orchestrator, and the retry delays it waits out.

use std::time::Duration;

use crate::util::unix_millis_now;

/// Clock plus sleep, abstracted so sync loops can run on simulated time.
#[allow(async_fn_in_trait)]
pub trait Scheduler {
    /// Current wall-clock time (Unix ms).
    fn now_millis(&self) -> i64;

    async fn sleep(&self, duration: Duration);
}

/// Real clock on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn now_millis(&self) -> i64 {
        unix_millis_now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How long to wait between failed attempts, and when to give up or flag a stall.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// `1.0` keeps the delay fixed
    pub multiplier: f64,
    pub max_delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    /// Consecutive failures after which the UI is told sync is stalled
    pub stalled_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            multiplier: 1.0,
            max_delay: Duration::from_secs(300),
            max_attempts: None,
            stalled_after: 10,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between every attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            ..Self::default()
        }
    }

    /// Delay before retrying after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let cap = self.max_delay.max(self.base_delay);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if secs.is_finite() && secs < cap.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            cap
        }
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        !matches!(self.max_attempts, Some(max) if failures >= max)
    }

    pub const fn is_stalled(&self, failures: u32) -> bool {
        self.stalled_after > 0 && failures >= self.stalled_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_policy_is_a_fixed_thirty_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(50), Duration::from_secs(30));
        assert!(policy.allows_retry(u32::MAX - 1));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for(1_000), Duration::from_secs(60));
    }

    #[test]
    fn max_attempts_and_stall_threshold() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            stalled_after: 2,
            ..RetryPolicy::fixed(Duration::from_secs(1))
        };
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!policy.is_stalled(1));
        assert!(policy.is_stalled(2));

        let never = RetryPolicy {
            stalled_after: 0,
            ..RetryPolicy::default()
        };
        assert!(!never.is_stalled(100));
    }
}
