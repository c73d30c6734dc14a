//! Exponential re-eligibility delay for retried commands.

use chrono::Duration;

/// Largest exponent used when computing delays; keeps the arithmetic finite.
const MAX_EXPONENT: i32 = 30;

/// Backoff gating re-eligibility of a command: `(2^attempts - 1) * base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_secs: i64,
}

impl Backoff {
    /// Create a backoff with the given base interval in seconds.
    #[must_use]
    pub const fn from_secs(base_secs: i64) -> Self {
        Self { base_secs }
    }

    /// Base interval in seconds, as bound into the claim query.
    #[must_use]
    pub const fn base_secs(&self) -> i64 {
        self.base_secs
    }

    /// Delay that must elapse after `updated_at` before the next attempt.
    #[must_use]
    pub fn delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.clamp(0, MAX_EXPONENT);
        let factor = (1_i64 << exponent) - 1;
        Duration::seconds(factor.saturating_mul(self.base_secs))
    }
}

/// Delay before the `attempt`-th reconnect when the database is unreachable.
#[must_use]
pub fn reconnect_delay(base: std::time::Duration, attempt: u32) -> std::time::Duration {
    base.saturating_mul(1_u32 << attempt.min(16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_attempts_has_no_delay() {
        assert_eq!(Backoff::from_secs(60).delay(0), Duration::zero());
    }

    #[test]
    fn test_delay_values() {
        let backoff = Backoff::from_secs(10);
        assert_eq!(backoff.delay(1), Duration::seconds(10));
        assert_eq!(backoff.delay(2), Duration::seconds(30));
        assert_eq!(backoff.delay(3), Duration::seconds(70));
    }

    #[test]
    fn test_reconnect_delay_doubles() {
        let base = std::time::Duration::from_millis(100);
        assert_eq!(reconnect_delay(base, 0), base);
        assert_eq!(reconnect_delay(base, 3), std::time::Duration::from_millis(800));
    }

    proptest! {
        #[test]
        fn prop_delay_is_monotonic(base in 0_i64..10_000, attempts in 0_i32..64) {
            let backoff = Backoff::from_secs(base);
            prop_assert!(backoff.delay(attempts) <= backoff.delay(attempts + 1));
        }
    }
}
