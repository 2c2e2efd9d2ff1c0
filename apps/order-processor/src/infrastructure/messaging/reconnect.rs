//! Connection backoff: `2^attempt × base`, capped, with bounded jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::MessagingConfig;

/// Exponential backoff for (re)connecting to the broker.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max_backoff: Duration,
    max_attempts: u32,
    /// Fraction of the delay randomised in both directions.
    jitter_factor: f64,
    current_attempt: u32,
}

impl ReconnectPolicy {
    /// Policy with ±10% jitter.
    #[must_use]
    pub const fn new(base: Duration, max_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_backoff,
            max_attempts,
            jitter_factor: 0.1,
            current_attempt: 0,
        }
    }

    /// Policy from the messaging configuration.
    ///
    /// `connect_attempts` counts connection attempts, so it allows one fewer
    /// backoff.
    #[must_use]
    pub const fn from_config(config: &MessagingConfig) -> Self {
        Self::new(
            config.connect_backoff(),
            config.connect_max_backoff(),
            config.connect_attempts.saturating_sub(1),
        )
    }

    /// Replace the jitter fraction, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next attempt, `None` once attempts are exhausted.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let exponent = self.current_attempt.min(31);
        let base_ms = self.base.as_millis() as u64;
        let capped_ms = base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff.as_millis() as u64);

        let spread = capped_ms as f64 * self.jitter_factor;
        let jittered_ms = if spread > 0.0 {
            let low = (capped_ms as f64 - spread).max(0.0);
            let high = capped_ms as f64 + spread;
            (rand::rng().random_range(low..=high) as u64).min(self.max_backoff.as_millis() as u64)
        } else {
            capped_ms
        };

        self.current_attempt += 1;
        Some(Duration::from_millis(jittered_ms))
    }

    /// Start over after a successful connection.
    pub const fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Attempts consumed since the last reset.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(100), Duration::from_millis(500), 5)
                .with_jitter(0.0);

        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_backoff(), None);
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..100 {
            let mut policy =
                ReconnectPolicy::new(Duration::from_millis(1000), Duration::from_secs(60), 3);
            let delay = policy.next_backoff().unwrap();
            assert!(delay >= Duration::from_millis(900) && delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn reset_restores_attempts() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(10), Duration::from_secs(1), 1)
                .with_jitter(0.0);
        assert!(policy.next_backoff().is_some());
        assert!(policy.next_backoff().is_none());

        policy.reset();
        assert_eq!(policy.current_attempt(), 0);
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(10)));
    }
}
