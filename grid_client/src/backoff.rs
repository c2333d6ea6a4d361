use std::time::Duration;

/// Reconnect schedule: after `k` consecutive failures the next attempt waits `base × 2^k`,
/// capped at `max_delay`. At most `max_attempts` retries are scheduled.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next retry, or `None` once the attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let multiplier = 2u32.saturating_pow(self.attempt.min(31));
        Some(self.base.saturating_mul(multiplier).min(self.max_delay))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 10);

        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();

        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30, 30, 30, 30, 30]);
    }

    #[test]
    fn gives_up_after_max_attempts_until_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 2);

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(20)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(40)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn first_failure_waits_twice_the_base() {
        // One failed attempt (k = 1) means the retry waits base × 2.
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(30), 10);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), u32::MAX);
        for _ in 0..64 {
            assert!(backoff.next_delay().expect("attempts left") <= Duration::from_secs(30));
        }
    }
}
