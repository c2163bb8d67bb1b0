//! Lifecycle worker.
//!
//! Consumes the enabled streams from Kafka/Redpanda until Ctrl+C or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! KAFKA_BROKER=localhost:9092 METRICS_ENABLED=true cargo run --bin worker
//! ```

use event_worker_core::environment::SystemClock;
use event_worker_redpanda::RedpandaBroker;
use event_worker_runtime::metrics::describe_metrics;
use lifecycle_worker::{Config, InMemoryUserRepository, WorkerApp};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        broker = %config.kafka.broker,
        consumer_group = %config.kafka.consumer_group,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        let addr: SocketAddr = config.metrics.addr.parse()?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        describe_metrics();
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    let broker = RedpandaBroker::builder()
        .brokers(config.kafka.broker.as_str())
        .consumer_group(config.kafka.consumer_group.as_str())
        .auto_offset_reset(config.kafka.auto_offset_reset.as_str())
        .build()?;

    let app = WorkerApp::new(
        config,
        Arc::new(broker),
        Arc::new(InMemoryUserRepository::new()),
        Arc::new(SystemClock),
    )?;

    let outcome = app.run().await?;
    tracing::info!(?outcome, "Worker stopped");
    Ok(())
}
