//! Reconnection policy: jittered exponential backoff and eligibility.

use std::time::Duration;

use codeview_core::ClientConfig;

/// Whether the current session has been ready since the last explicit teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    /// The current parameters never produced a ready session.
    #[default]
    NeverReady,
    /// Ready at least once since the last teardown.
    ReadySinceTeardown,
    /// Explicitly torn down; nothing to restore.
    TornDown,
}

/// Source of the backoff jitter factor in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    Random,
    Fixed(f64),
}

impl Jitter {
    fn sample(self) -> f64 {
        match self {
            Self::Random => fastrand::f64(),
            Self::Fixed(v) => v.clamp(0.0, 1.0 - f64::EPSILON),
        }
    }
}

/// Decides whether and when to reconnect after an unclean closure.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    base: Duration,
    max_delay: Option<Duration>,
    jitter: Jitter,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(base: Duration) -> Self {
        Self {
            base,
            max_delay: None,
            jitter: Jitter::Random,
        }
    }

    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.reconnect_base()).with_max_delay(config.max_reconnect_delay())
    }

    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Upper bound (exclusive) of the delay for `attempt`: `2^attempt * base`.
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let ceiling = self.base.saturating_mul(factor);
        self.max_delay.map_or(ceiling, |max| ceiling.min(max))
    }

    /// `floor(jitter * 2^attempt * base)`, in whole milliseconds.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.ceiling(attempt).as_millis() as f64;
        let ms = (self.jitter.sample() * ceiling_ms).floor() as u64;
        Duration::from_millis(ms)
    }

    /// Reconnect only when disconnected from a session that had been ready.
    #[must_use]
    pub const fn should_reconnect(connected: bool, readiness: Readiness) -> bool {
        !connected && matches!(readiness, Readiness::ReadySinceTeardown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_below_ceiling() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..8 {
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                assert!(delay < Duration::from_millis(1000 * 2u64.pow(attempt)));
            }
        }
    }

    #[test]
    fn test_fixed_jitter() {
        let policy = ReconnectPolicy::new(Duration::from_millis(1000)).with_jitter(Jitter::Fixed(0.5));
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(3), Duration::from_millis(4000));

        let zero = policy.with_jitter(Jitter::Fixed(0.0));
        assert_eq!(zero.delay(5), Duration::ZERO);
    }

    #[test]
    fn test_max_delay_caps_ceiling() {
        let policy = ReconnectPolicy::new(Duration::from_millis(1000))
            .with_max_delay(Some(Duration::from_secs(10)))
            .with_jitter(Jitter::Fixed(0.9));
        assert_eq!(policy.ceiling(10), Duration::from_secs(10));
        assert_eq!(policy.delay(10), Duration::from_secs(9));
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = ReconnectPolicy::default();
        assert!(policy.ceiling(64) >= policy.ceiling(31));
    }

    #[test]
    fn test_eligibility() {
        assert!(ReconnectPolicy::should_reconnect(false, Readiness::ReadySinceTeardown));
        assert!(!ReconnectPolicy::should_reconnect(true, Readiness::ReadySinceTeardown));
        assert!(!ReconnectPolicy::should_reconnect(false, Readiness::NeverReady));
        assert!(!ReconnectPolicy::should_reconnect(false, Readiness::TornDown));
    }
}
