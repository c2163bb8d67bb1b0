//! Configuration management for the lifecycle worker.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Values that fail to parse fall back to their default.

use event_worker_runtime::{FailurePolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Kafka/Redpanda connection
    pub kafka: KafkaConfig,
    /// Inbound streams the worker consumes
    pub streams: StreamsConfig,
    /// Outbound publishers
    pub publishers: PublishersConfig,
    /// Consumption engine tuning
    pub consumer: ConsumerConfig,
    /// Prometheus exporter
    pub metrics: MetricsConfig,
    /// Log filter (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Kafka/Redpanda configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated)
    pub broker: String,
    /// Consumer group shared by every topic subscription
    pub consumer_group: String,
    /// Where a new consumer group starts reading: earliest or latest
    pub auto_offset_reset: String,
}

/// An enable flag paired with a topic name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggle {
    /// Whether the stream or publisher is active
    pub enable: bool,
    /// Topic name
    pub topic: String,
}

/// Inbound streams, one per handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsConfig {
    /// User lifecycle events
    pub user_lifecycle: Toggle,
    /// Order events
    pub order_events: Toggle,
}

/// Outbound publishers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishersConfig {
    /// User lifecycle events (new users, activations)
    pub user_lifecycle: Toggle,
}

/// Consumption engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
    /// Handler retries for retryable errors (0 = log and drop)
    pub max_retries: usize,
    /// Backoff before the first retry, in milliseconds
    pub retry_initial_delay_ms: u64,
}

impl ConsumerConfig {
    /// Deadline for draining processing loops on shutdown.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    /// Failure policy derived from the retry settings.
    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        if self.max_retries == 0 {
            return FailurePolicy::AtMostOnce;
        }
        FailurePolicy::Retry(
            RetryPolicy::builder()
                .max_retries(self.max_retries)
                .initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
                .build(),
        )
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to install the exporter
    pub enabled: bool,
    /// Listen address for the scrape endpoint
    pub addr: String,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// ```
    /// use lifecycle_worker::Config;
    ///
    /// let config = Config::from_lookup(|key| match key {
    ///     "KAFKA_BROKER" => Some("redpanda:9092".to_string()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.kafka.broker, "redpanda:9092");
    /// assert_eq!(config.streams.user_lifecycle.topic, "user-lifecycle");
    /// ```
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            kafka: KafkaConfig {
                broker: text("KAFKA_BROKER", "localhost:9092"),
                consumer_group: text("KAFKA_CONSUMER_GROUP", "lifecycle-worker"),
                auto_offset_reset: text("KAFKA_AUTO_OFFSET_RESET", "latest"),
            },
            streams: StreamsConfig {
                user_lifecycle: Toggle {
                    enable: parsed(&lookup, "STREAMS_USER_LIFECYCLE_ENABLE", true),
                    topic: text("STREAMS_USER_LIFECYCLE_TOPIC", "user-lifecycle"),
                },
                order_events: Toggle {
                    enable: parsed(&lookup, "STREAMS_ORDER_EVENTS_ENABLE", false),
                    topic: text("STREAMS_ORDER_EVENTS_TOPIC", "order-events"),
                },
            },
            publishers: PublishersConfig {
                user_lifecycle: Toggle {
                    enable: parsed(&lookup, "PUBLISHERS_USER_LIFECYCLE_ENABLE", false),
                    topic: text("PUBLISHERS_USER_LIFECYCLE_TOPIC", "user-lifecycle"),
                },
            },
            consumer: ConsumerConfig {
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT", 10),
                max_retries: parsed(&lookup, "CONSUMER_MAX_RETRIES", 0),
                retry_initial_delay_ms: parsed(&lookup, "CONSUMER_RETRY_INITIAL_DELAY_MS", 100),
            },
            metrics: MetricsConfig {
                enabled: parsed(&lookup, "METRICS_ENABLED", false),
                addr: text("METRICS_ADDR", "0.0.0.0:9090"),
            },
            log_level: text("RUST_LOG", "info"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
