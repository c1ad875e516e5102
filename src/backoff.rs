//! Back-off policy for reconnect scheduling.

use std::time::Duration;

/// Exponential back-off between reconnect attempts.
///
/// Attempt `n` (counting from 1) waits `base_delay × 1.5^(n−1)`, truncated to
/// whole milliseconds and capped at `max_delay`.
///
/// # Default Values
/// - `base_delay`: 3 seconds
/// - `max_delay`: 30 seconds
/// - `max_attempts`: 10
///
/// # Invariants
/// - `base_delay` must not exceed `max_delay`
/// - `base_delay` must be at least 1 millisecond
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Upper bound applied to every computed delay.
    pub max_delay: Duration,
    /// Attempts allowed before the connector gives up.
    pub max_attempts: u32,
}

/// Growth factor applied per attempt.
const MULTIPLIER: f64 = 1.5;

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl BackoffConfig {
    /// Clamp delays to sane bounds. A `base_delay` above `max_delay` is
    /// lowered to the cap, which is never raised.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use echo_nats::backoff::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     base_delay: Duration::from_secs(60),
    ///     max_delay: Duration::from_secs(30),
    ///     max_attempts: 3,
    /// };
    ///
    /// let normalized = cfg.normalized();
    /// assert_eq!(normalized.base_delay, Duration::from_secs(30));
    /// assert_eq!(normalized.max_delay, Duration::from_secs(30));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.base_delay = self.base_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        self.base_delay = self.base_delay.min(self.max_delay);
        self
    }

    /// Delay to wait before reconnect `attempt`, counting from 1.
    ///
    /// Attempt 0 is treated as attempt 1.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use echo_nats::backoff::BackoffConfig;
    ///
    /// let cfg = BackoffConfig::default();
    /// assert_eq!(cfg.delay_for(1), Duration::from_millis(3000));
    /// assert_eq!(cfg.delay_for(3), Duration::from_millis(6750));
    /// assert_eq!(cfg.delay_for(20), Duration::from_millis(30_000));
    /// ```
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[expect(
            clippy::cast_precision_loss,
            reason = "delays are far below 2^52 milliseconds"
        )]
        let base_ms = self.base_delay.as_millis() as f64;
        #[expect(
            clippy::cast_precision_loss,
            reason = "delays are far below 2^52 milliseconds"
        )]
        let cap_ms = self.max_delay.as_millis() as f64;
        let scaled = (base_ms * MULTIPLIER.powi(exponent)).min(cap_ms);
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "value is finite, non-negative and capped by max_delay"
        )]
        let millis = scaled.floor() as u64;
        Duration::from_millis(millis)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool { attempts < self.max_attempts }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1, 3000)]
    #[case(2, 4500)]
    #[case(3, 6750)]
    #[case(4, 10_125)]
    #[case(5, 15_187)]
    #[case(6, 22_781)]
    #[case(7, 30_000)]
    #[case(40, 30_000)]
    fn delays_grow_by_half_and_cap(#[case] attempt: u32, #[case] millis: u64) {
        let cfg = BackoffConfig::default();
        assert_eq!(cfg.delay_for(attempt), Duration::from_millis(millis));
    }

    #[test]
    fn attempt_zero_uses_base_delay() {
        let cfg = BackoffConfig::default();
        assert_eq!(cfg.delay_for(0), cfg.base_delay);
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let cfg = BackoffConfig::default();
        assert_eq!(cfg.delay_for(u32::MAX), cfg.max_delay);
    }

    #[rstest]
    #[case(0, true)]
    #[case(9, true)]
    #[case(10, false)]
    fn attempts_are_bounded(#[case] made: u32, #[case] allowed: bool) {
        assert_eq!(BackoffConfig::default().allows(made), allowed);
    }

    #[test]
    fn base_delay_above_cap_is_lowered() {
        let cfg = BackoffConfig {
            base_delay: Duration::from_secs(40),
            ..BackoffConfig::default()
        }
        .normalized();
        assert_eq!(cfg.max_delay, Duration::from_secs(30));
        assert_eq!(
            [1, 2, 3].map(|attempt| cfg.delay_for(attempt)),
            [Duration::from_secs(30); 3]
        );
    }

    proptest! {
        #[test]
        fn delays_never_exceed_thirty_seconds(
            base_ms in 0_u64..600_000,
            attempt in any::<u32>(),
        ) {
            let cfg = BackoffConfig {
                base_delay: Duration::from_millis(base_ms),
                ..BackoffConfig::default()
            }
            .normalized();
            prop_assert!(cfg.delay_for(attempt) <= Duration::from_millis(30_000));
        }
    }
}
