//! Exponential backoff with jitter
//!
//! Used by the retry engine for inter-attempt delays and by the client
//! manager for reconnection scheduling.

use std::time::Duration;

/// Backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Exponential multiplier
    pub multiplier: f64,
    /// Add jitter to prevent thundering herd
    pub jitter: bool,
    /// Maximum jitter as a fraction of the delay (0.0 - 1.0)
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Stateful exponential backoff
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create with the given configuration
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for a given attempt number (0-indexed), capped and jittered
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base =
            self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(attempt as i32);
        let capped = Duration::from_secs_f64(base.min(self.config.max_delay.as_secs_f64()));
        self.add_jitter(capped)
    }

    /// Next delay, advancing the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if !self.config.jitter {
            return delay;
        }
        let range = delay.as_secs_f64() * self.config.jitter_ratio;
        Duration::from_secs_f64((delay.as_secs_f64() + rand_jitter(range)).max(0.0))
    }
}

/// Simple time-derived pseudo-random jitter in [0, range)
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let hash = nanos.wrapping_mul(2654435761);
    let normalized = (hash as f64) / (u32::MAX as f64);
    normalized * range
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(initial_ms: u64, max_secs: u64, multiplier: f64) -> ExponentialBackoff {
        ExponentialBackoff::new(BackoffConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_secs(max_secs),
            multiplier,
            jitter: false,
            jitter_ratio: 0.0,
        })
    }

    #[test]
    fn test_exponential_progression() {
        let backoff = plain(100, 10, 2.0);
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_cap() {
        let backoff = plain(1000, 5, 2.0);
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_next_delay_advances_and_reset_rewinds() {
        let mut backoff = plain(100, 10, 2.0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let backoff = ExponentialBackoff::new(BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
            jitter_ratio: 0.2,
        });

        for attempt in 0..5 {
            let base = Duration::from_secs_f64(1.0 * 2f64.powi(attempt));
            let jittered = backoff.delay_for_attempt(attempt as u32);
            assert!(jittered >= base);
            assert!(jittered.as_secs_f64() <= base.as_secs_f64() * 1.2 + f64::EPSILON);
        }
    }
}
