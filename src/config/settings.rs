use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::fanout::FanOutConfig;
use crate::infrastructure::{BackoffConfig, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub fanout: FanOutSettings,
    #[serde(default)]
    pub subscriptions: SubscriptionsSettings,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Channels (or patterns) the inbound subscriber listens on
    #[serde(default = "default_event_channels")]
    pub event_channels: Vec<String>,
    /// Channel availability events are published to
    #[serde(default = "default_availability_channel")]
    pub availability_channel: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// "memory" or "postgres"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Change feed buffer; slow fan-out past this lags and drops
    #[serde(default = "default_changefeed_capacity")]
    pub changefeed_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FanOutSettings {
    /// Availability events per publish call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent batch publishes per record
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Attempts per external call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionsSettings {
    /// Path to the JSON subscriptions file
    #[serde(default = "default_subscriptions_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_event_channels() -> Vec<String> {
    vec!["events:*".to_string()]
}

fn default_availability_channel() -> String {
    "events:availability".to_string()
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_changefeed_capacity() -> usize {
    1024
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_subscriptions_path() -> String {
    "config/subscriptions.json".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "beacon-pipeline".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("store.backend", "memory")?
            .set_default("fanout.batch_size", 10)?
            .set_default("subscriptions.path", "config/subscriptions.json")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // REDIS_URL, STORE_BACKEND, FANOUT_BATCH_SIZE, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }
}

impl FanOutSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: BackoffConfig {
                initial_delay: std::time::Duration::from_millis(self.initial_backoff_ms),
                max_delay: std::time::Duration::from_millis(self.max_backoff_ms),
                ..BackoffConfig::default()
            },
        }
    }

    pub fn to_config(&self) -> FanOutConfig {
        FanOutConfig {
            batch_size: self.batch_size,
            max_concurrent_batches: self.max_concurrent_batches,
            retry: self.retry_policy(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            event_channels: default_event_channels(),
            availability_channel: default_availability_channel(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            postgres_url: None,
            changefeed_capacity: default_changefeed_capacity(),
        }
    }
}

impl Default for FanOutSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for SubscriptionsSettings {
    fn default() -> Self {
        Self {
            path: default_subscriptions_path(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let redis = RedisConfig::default();
        assert_eq!(redis.url, "redis://localhost:6379");
        assert_eq!(redis.availability_channel, "events:availability");

        let fanout = FanOutSettings::default();
        assert_eq!(fanout.batch_size, 10);
        assert_eq!(fanout.max_attempts, 3);
    }

    #[test]
    fn test_retry_policy_conversion() {
        let fanout = FanOutSettings {
            max_attempts: 5,
            initial_backoff_ms: 50,
            ..Default::default()
        };
        let policy = fanout.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(
            policy.backoff.initial_delay,
            std::time::Duration::from_millis(50)
        );
    }
}
