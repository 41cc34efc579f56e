//! Exponential polling backoff for catch-up subscriptions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Polling schedule between catch-up pulls.
///
/// The delay starts at `min_interval`, is multiplied by `multiplier` after
/// every empty pull, never exceeds `max_interval`, and drops back to
/// `min_interval` as soon as a pull returns events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    #[must_use]
    pub const fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    #[must_use]
    pub const fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

/// Running state of a [`BackoffConfig`] schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        let mut config = config;
        if config.max_interval < config.min_interval {
            config.max_interval = config.min_interval;
        }
        Self {
            current: config.min_interval,
            config,
        }
    }

    /// Delay to wait before the next pull.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.current
    }

    /// Lengthen the delay after an empty pull.
    pub fn grow(&mut self) {
        // Multipliers below 1 would shrink the delay; NaN falls back to 1 too.
        let multiplier = self.config.multiplier.max(1.0);
        let next = self.current.as_secs_f64() * multiplier;
        self.current = Duration::try_from_secs_f64(next)
            .unwrap_or(self.config.max_interval)
            .clamp(self.config.min_interval, self.config.max_interval);
    }

    /// Return to the minimum delay after a pull that found events.
    pub const fn reset(&mut self) {
        self.current = self.config.min_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig::default()
            .with_min_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_millis(1000))
            .with_multiplier(2.0)
    }

    #[test]
    fn grows_geometrically_up_to_the_cap() {
        let mut backoff = Backoff::new(config());
        let mut delays = vec![backoff.delay()];
        for _ in 0..5 {
            backoff.grow();
            delays.push(backoff.delay());
        }

        assert_eq!(
            delays,
            [100, 200, 400, 800, 1000, 1000].map(Duration::from_millis)
        );
    }

    #[test]
    fn reset_returns_to_the_minimum() {
        let mut backoff = Backoff::new(config());
        backoff.grow();
        backoff.grow();
        backoff.reset();
        assert_eq!(backoff.delay(), Duration::from_millis(100));
    }

    #[test]
    fn shrinking_multiplier_is_ignored() {
        let mut backoff = Backoff::new(config().with_multiplier(0.5));
        backoff.grow();
        assert_eq!(backoff.delay(), Duration::from_millis(100));
    }

    #[test]
    fn inverted_bounds_collapse_to_the_minimum() {
        let mut backoff = Backoff::new(
            config()
                .with_min_interval(Duration::from_secs(2))
                .with_max_interval(Duration::from_secs(1)),
        );
        backoff.grow();
        assert_eq!(backoff.delay(), Duration::from_secs(2));
    }

    #[test]
    fn config_deserializes_with_defaults_for_missing_fields() {
        let config: BackoffConfig = serde_json::from_str(r#"{"multiplier":3.0}"#).unwrap();
        assert_eq!(config.multiplier, 3.0);
        assert_eq!(config.min_interval, BackoffConfig::default().min_interval);
    }
}
