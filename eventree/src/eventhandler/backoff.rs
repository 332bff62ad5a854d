//! Retry backoff policies for failing event handlers.
//!
//! A policy produces delays between successive retries of the same event.
//! Delays carry a small random jitter so that many processors failing on the
//! same downstream outage do not retry in lockstep. A schedule answering
//! `None` means the budget is exhausted, which is fatal for the processor.

use rand::Rng;
use std::time::{Duration, Instant};

/// Fraction by which a delay may deviate from its base value.
const JITTER_FACTOR: f64 = 0.1;

/// How a processor backs off between retries of a failing handler.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// No retries: the first failure exhausts the budget.
    None,
    /// A constant delay between retries.
    Fixed {
        /// Delay between attempts.
        interval: Duration,
        /// Maximum number of handler invocations, including the first.
        max_attempts: Option<u32>,
        /// Wall-clock budget across all retries of one event.
        max_elapsed: Option<Duration>,
    },
    /// Exponentially growing delays.
    Exponential {
        /// Delay after the first failure.
        initial_interval: Duration,
        /// Growth factor per retry.
        multiplier: f64,
        /// Upper bound on any single delay.
        max_interval: Duration,
        /// Maximum number of handler invocations, including the first.
        max_attempts: Option<u32>,
        /// Wall-clock budget across all retries of one event.
        max_elapsed: Option<Duration>,
    },
}

impl BackoffPolicy {
    /// A conservative default: exponential from 1s, doubling, capped at 60s,
    /// unlimited attempts.
    pub const fn default_exponential() -> Self {
        Self::Exponential {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: None,
            max_elapsed: None,
        }
    }

    /// Starts a fresh retry schedule for one event.
    pub fn schedule(&self) -> RetrySchedule<'_> {
        RetrySchedule {
            policy: self,
            failures: 0,
            first_failure: None,
        }
    }

    /// The un-jittered delay after the given 1-based failure count, or `None`
    /// if the policy never retries.
    fn base_delay(&self, failure: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { interval, .. } => Some(*interval),
            Self::Exponential {
                initial_interval,
                multiplier,
                max_interval,
                ..
            } => {
                let exponent = i32::try_from(failure.saturating_sub(1).min(63)).unwrap_or(63);
                let delay = initial_interval.as_secs_f64() * multiplier.powi(exponent);
                let capped = delay.min(max_interval.as_secs_f64());
                Some(Duration::from_secs_f64(capped))
            }
        }
    }

    fn max_attempts(&self) -> Option<u32> {
        match self {
            Self::None => Some(1),
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                *max_attempts
            }
        }
    }

    fn max_elapsed(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_elapsed, .. } | Self::Exponential { max_elapsed, .. } => *max_elapsed,
        }
    }
}

/// Per-event retry bookkeeping over a [`BackoffPolicy`].
pub struct RetrySchedule<'a> {
    policy: &'a BackoffPolicy,
    failures: u32,
    first_failure: Option<Instant>,
}

impl RetrySchedule<'_> {
    /// Records a failure and returns the delay to wait before the next
    /// attempt, or `None` once the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        let now = Instant::now();
        let first_failure = *self.first_failure.get_or_insert(now);

        if let Some(max_attempts) = self.policy.max_attempts() {
            if self.failures >= max_attempts {
                return None;
            }
        }
        if let Some(max_elapsed) = self.policy.max_elapsed() {
            if now.duration_since(first_failure) >= max_elapsed {
                return None;
            }
        }

        self.policy.base_delay(self.failures).map(apply_jitter)
    }

    /// Number of handler invocations so far (failures recorded).
    pub const fn attempts(&self) -> u32 {
        self.failures
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let spread = rand::rng().random::<f64>().mul_add(2.0, -1.0);
    let factor = JITTER_FACTOR.mul_add(spread, 1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn within_jitter(actual: Duration, base: Duration) -> bool {
        let lower = base.as_secs_f64() * (1.0 - JITTER_FACTOR) - 1e-9;
        let upper = base.as_secs_f64() * (1.0 + JITTER_FACTOR) + 1e-9;
        (lower..=upper).contains(&actual.as_secs_f64())
    }

    #[test]
    fn none_policy_exhausts_on_first_failure() {
        let policy = BackoffPolicy::None;
        assert_eq!(policy.schedule().next_delay(), None);
    }

    #[test]
    fn fixed_policy_keeps_a_constant_delay() {
        let policy = BackoffPolicy::Fixed {
            interval: Duration::from_millis(100),
            max_attempts: None,
            max_elapsed: None,
        };
        let mut schedule = policy.schedule();
        for _ in 0..5 {
            let delay = schedule.next_delay().unwrap();
            assert!(within_jitter(delay, Duration::from_millis(100)), "got {delay:?}");
        }
    }

    #[test]
    fn fixed_policy_honors_max_attempts() {
        let policy = BackoffPolicy::Fixed {
            interval: Duration::from_millis(10),
            max_attempts: Some(3),
            max_elapsed: None,
        };
        let mut schedule = policy.schedule();
        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_some());
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.attempts(), 3);
    }

    #[test]
    fn exponential_policy_grows_and_caps() {
        let policy = BackoffPolicy::Exponential {
            initial_interval: Duration::from_millis(100),
            multiplier: 2.0,
            max_interval: Duration::from_millis(350),
            max_attempts: None,
            max_elapsed: None,
        };
        assert_eq!(policy.base_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.base_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.base_delay(3), Some(Duration::from_millis(350)));
        assert_eq!(policy.base_delay(10), Some(Duration::from_millis(350)));
    }

    #[test]
    fn elapsed_budget_exhausts_immediately_when_zero() {
        let policy = BackoffPolicy::Fixed {
            interval: Duration::from_millis(10),
            max_attempts: None,
            max_elapsed: Some(Duration::ZERO),
        };
        assert_eq!(policy.schedule().next_delay(), None);
    }

    proptest! {
        #[test]
        fn exponential_base_delays_are_nondecreasing_and_capped(
            initial_ms in 1u64..1000,
            multiplier in 1.0f64..4.0,
            max_ms in 1u64..10_000,
            failure in 1u32..40
        ) {
            let policy = BackoffPolicy::Exponential {
                initial_interval: Duration::from_millis(initial_ms),
                multiplier,
                max_interval: Duration::from_millis(max_ms),
                max_attempts: None,
                max_elapsed: None,
            };
            let here = policy.base_delay(failure).unwrap();
            let next = policy.base_delay(failure + 1).unwrap();
            prop_assert!(next >= here);
            prop_assert!(here <= Duration::from_millis(max_ms));
        }

        #[test]
        fn jitter_stays_within_bounds(base_ms in 1u64..100_000) {
            let base = Duration::from_millis(base_ms);
            prop_assert!(within_jitter(apply_jitter(base), base));
        }
    }
}
