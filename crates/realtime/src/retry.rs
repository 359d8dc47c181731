//! Reconnect schedule for a channel whose transport dropped.

use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff with random spread.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`, capped at `max_delay`,
/// then scaled by a random factor in `1 ± jitter` so channels that dropped
/// together do not reopen together. After `max_attempts` failed reopens the
/// channel is given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the nominal delay, clamped to `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// Give up as soon as the transport drops.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Same delay before every attempt, no spread.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: 0.1,
        }
    }

    /// Delay before attempt `attempt` without spread. Zero for attempt 0.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let Some(doublings) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before attempt `attempt`, spread by a fresh random draw.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.spread(self.nominal_delay(attempt), &mut rand::thread_rng())
    }

    fn spread(&self, nominal: Duration, rng: &mut impl Rng) -> Duration {
        let jitter = self.jitter_fraction();
        if jitter == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = 1.0 + rng.gen_range(-jitter..=jitter);
        Duration::try_from_secs_f64(nominal.as_secs_f64() * factor).unwrap_or(nominal)
    }

    /// `jitter` clamped to `0.0..=1.0`; NaN counts as none.
    fn jitter_fraction(&self) -> f64 {
        self.jitter.clamp(0.0, 1.0).max(0.0)
    }

    /// Whether another reopen is allowed after `attempts` failed ones.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Longest a channel can spend reconnecting before it is given up on.
    pub fn worst_case_wait(&self) -> Duration {
        let stretch = 1.0 + self.jitter_fraction();
        (1..=self.max_attempts)
            .map(|attempt| {
                let nominal = self.nominal_delay(attempt).as_secs_f64();
                Duration::try_from_secs_f64(nominal * stretch).unwrap_or(Duration::MAX)
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn doubles_until_the_cap() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.nominal_delay(0), Duration::ZERO);
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(100));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(200));
        assert_eq!(policy.nominal_delay(4), Duration::from_millis(800));
        assert_eq!(policy.nominal_delay(5), Duration::from_secs(1));
        assert_eq!(policy.nominal_delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn spread_stays_within_jitter() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=policy.max_attempts {
            let nominal = policy.nominal_delay(attempt).as_secs_f64();
            for _ in 0..50 {
                let actual = policy.spread(policy.nominal_delay(attempt), &mut rng).as_secs_f64();
                assert!((actual - nominal).abs() <= nominal * policy.jitter + 1e-9);
            }
        }
    }

    #[test]
    fn simultaneous_drops_do_not_reopen_in_lockstep() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);
        let delays: Vec<Duration> = (0..8)
            .map(|_| policy.spread(policy.nominal_delay(3), &mut rng))
            .collect();
        assert!(delays.iter().any(|d| *d != delays[0]));
    }

    #[test]
    fn fixed_policy_has_no_spread() {
        let fixed = RetryPolicy::fixed(3, Duration::from_millis(50));
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(fixed.delay_for_attempt(3), Duration::from_millis(50));
        assert_eq!(fixed.worst_case_wait(), Duration::from_millis(150));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(10));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }
}
