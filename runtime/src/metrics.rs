//! Consumer metrics.
//!
//! Emitted through the `metrics` facade. Library crates never install a
//! recorder; the `worker` binary installs the Prometheus exporter when enabled.
//!
//! | Metric | Kind | Labels |
//! |---|---|---|
//! | `consumer_messages_handled_total` | counter | `topic` |
//! | `consumer_messages_failed_total` | counter | `topic` |
//! | `consumer_handle_duration_seconds` | histogram | `topic` |
//! | `consumer_retry_attempts_total` | counter | `topic` |
//! | `consumer_active_loops` | gauge | |
//! | `consumer_shutdown_timeouts_total` | counter | |

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Register descriptions for every consumer metric.
///
/// Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(
        "consumer_messages_handled_total",
        "Total number of messages handled successfully"
    );
    describe_counter!(
        "consumer_messages_failed_total",
        "Total number of messages whose handler reported an error (acknowledged and dropped)"
    );
    describe_histogram!(
        "consumer_handle_duration_seconds",
        "Time taken by a handler to process one message"
    );
    describe_counter!(
        "consumer_retry_attempts_total",
        "Total number of handler retries under the retry failure policy"
    );
    describe_gauge!(
        "consumer_active_loops",
        "Number of per-topic processing loops currently running"
    );
    describe_counter!(
        "consumer_shutdown_timeouts_total",
        "Total number of shutdowns whose drain deadline elapsed"
    );
}

/// Consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a successfully handled message.
    pub fn record_handled(topic: &str, duration: Duration) {
        counter!("consumer_messages_handled_total", "topic" => topic.to_string()).increment(1);
        histogram!("consumer_handle_duration_seconds", "topic" => topic.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a message whose handler failed.
    pub fn record_failed(topic: &str, duration: Duration) {
        counter!("consumer_messages_failed_total", "topic" => topic.to_string()).increment(1);
        histogram!("consumer_handle_duration_seconds", "topic" => topic.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a handler retry.
    pub fn record_retry(topic: &str) {
        counter!("consumer_retry_attempts_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a processing loop starting.
    pub fn record_loop_started() {
        gauge!("consumer_active_loops").increment(1.0);
    }

    /// Record a processing loop exiting.
    pub fn record_loop_stopped() {
        gauge!("consumer_active_loops").decrement(1.0);
    }

    /// Record a shutdown whose drain deadline elapsed.
    pub fn record_shutdown_timeout() {
        counter!("consumer_shutdown_timeouts_total").increment(1);
    }
}
