//! Reconnection policies for the async client.

use std::time::Duration;

use rand::Rng;

use crate::core::ReconnectPolicy;

/// Retry at a fixed interval, optionally a limited number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInterval {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl FixedInterval {
    /// Retry forever every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Give up after `attempts` attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

impl ReconnectPolicy for FixedInterval {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.interval),
        }
    }
}

/// Exponential backoff with random jitter.
///
/// Attempt `n` waits `initial × 2^(n-1)`, capped at `max`, plus up to
/// `jitter` of that delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    max_attempts: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl ExponentialBackoff {
    /// Backoff from `initial` up to `max`, with 10% jitter.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter: 0.1,
            max_attempts: None,
        }
    }

    /// Fraction of the delay added at random, clamped to `0.0..=1.0`.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Give up after `attempts` attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let base = self.base_delay(attempt);
        if self.jitter == 0.0 {
            return Some(base);
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter);
        Some(base + base.mul_f64(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_interval() {
        let mut policy = FixedInterval::new(Duration::from_secs(5)).max_attempts(2);
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut policy =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10)).jitter(0.0);
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.next_delay(attempt).unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.next_delay(100), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let mut policy =
            ExponentialBackoff::new(Duration::from_secs(4), Duration::from_secs(60)).jitter(0.5);
        for _ in 0..100 {
            let delay = policy.next_delay(1).unwrap();
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(6));
        }
    }

    #[test]
    fn test_backoff_gives_up() {
        let mut policy = ExponentialBackoff::default().max_attempts(3);
        assert!(policy.next_delay(3).is_some());
        assert!(policy.next_delay(4).is_none());
    }
}
