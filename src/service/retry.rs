//! Connect retry policy.

use std::time::Duration;

/// Bounded exponential backoff for session establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt budget, at least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Make one last attempt with a fresh session once the budget is spent.
    pub failover: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            failover: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt`
    /// (1-based): `base * 2^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Attempts including the optional failover attempt.
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        let budget = if self.max_attempts == 0 { 1 } else { self.max_attempts };
        if self.failover { budget.saturating_add(1) } else { budget }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(3), Duration::from_secs(5));
        assert_eq!(policy.delay_after(64), Duration::from_secs(5));
    }

    #[test]
    fn failover_adds_one_attempt() {
        let mut policy = RetryPolicy::default();
        assert_eq!(policy.total_attempts(), 3);
        policy.failover = true;
        assert_eq!(policy.total_attempts(), 4);
        policy.max_attempts = 0;
        assert_eq!(policy.total_attempts(), 2);
    }
}
