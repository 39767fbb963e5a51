//! Exponential backoff with jitter for transient-failure retries.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff calculator with jitter
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempt: 0,
        }
    }

    /// Next delay: grows by `multiplier`, capped at `max_delay`, with
    /// symmetric jitter applied after capping.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base = self.current.as_millis() as f64;
        let grown = (base * self.config.multiplier).min(self.config.max_delay.as_millis() as f64);
        self.current = Duration::from_millis(grown as u64);

        let range = grown * self.config.jitter_factor;
        let jittered = if range > 0.0 {
            let jitter = rand::rng().random_range(-range..range);
            (grown + jitter).max(1.0)
        } else {
            grown.max(1.0)
        };

        Duration::from_millis(jittered as u64)
    }

    /// Reset to the initial state
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
