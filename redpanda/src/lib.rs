//! Redpanda broker client for the event worker.
//!
//! Implements [`MessageBroker`] from `event-worker-core` on top of rdkafka, so it
//! works against Redpanda, Apache Kafka, or any Kafka-compatible service.
//!
//! # Delivery Semantics
//!
//! Each subscription owns one `StreamConsumer` in the configured consumer
//! group, with auto-commit disabled. A forwarding task hands the processing
//! loop one message at a time and waits for its acknowledgment:
//!
//! - **Acknowledged**: the offset is committed and the next message is fetched
//! - **Abandoned** (dropped without ack) or **cancelled**: nothing is committed
//!   and the task exits, so the message is redelivered to the group later
//!
//! Message ids come from the `message_id` header written by [`publish`](MessageBroker::publish);
//! messages produced elsewhere get `topic-partition-offset`.
//!
//! # Example
//!
//! ```no_run
//! use event_worker_core::broker::MessageBroker;
//! use event_worker_core::message::OutboundMessage;
//! use event_worker_core::CancellationToken;
//! use event_worker_redpanda::RedpandaBroker;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("lifecycle-worker")
//!     .build()?;
//!
//! broker
//!     .publish("user-lifecycle", &OutboundMessage::new(br#"{"uuid":"abc","status":"pending"}"#.to_vec()))
//!     .await?;
//!
//! let scope = CancellationToken::new();
//! let mut messages = broker.subscribe(&scope, "user-lifecycle").await?;
//! while let Some(result) = messages.next().await {
//!     let message = result?;
//!     println!("received {}", message.id());
//!     let _ = message.ack();
//! }
//! broker.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use event_worker_core::broker::{BrokerError, BrokerFuture, MessageBroker, MessageStream};
use event_worker_core::message::{AckHandle, InboundMessage, OutboundMessage};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Header carrying the producer-assigned message id.
pub const MESSAGE_ID_HEADER: &str = "message_id";

/// Redpanda broker client.
///
/// One producer shared by every publisher, one consumer per subscribed topic.
///
/// # Configuration
///
/// - **Broker addresses**: bootstrap servers (required)
/// - **Producer settings**: acks, compression, timeout
/// - **Consumer group**: shared by every subscription (default: `lifecycle-worker`)
/// - **Buffer size**: capacity between a consumer task and its stream (default: 16)
/// - **Offset reset**: where a new group starts reading (default: `latest`)
///
/// # Example
///
/// ```no_run
/// use event_worker_redpanda::RedpandaBroker;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = RedpandaBroker::new("localhost:9092")?;
///
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBroker {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: String,
    buffer_size: usize,
    auto_offset_reset: String,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl RedpandaBroker {
    /// Create a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the client.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Bootstrap servers this client connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used by every subscription.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    fn create_consumer(&self, topic: &str) -> Result<StreamConsumer, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::SubscriptionFailed {
                topic: topic.to_string(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::SubscriptionFailed {
                topic: topic.to_string(),
                reason: format!("Failed to subscribe to topic: {e}"),
            })?;

        Ok(consumer)
    }
}

/// Builder for configuring a [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"`, or `"all"`.
    ///
    /// Default: `"1"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout (also bounds the flush on close).
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group shared by every subscription.
    ///
    /// Instances of the worker in the same group split each topic's partitions.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the capacity between a consumer task and its message stream.
    ///
    /// Zero is treated as one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set where a new consumer group starts reading: `"earliest"`, `"latest"`, or `"error"`.
    ///
    /// Default: `"latest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| "lifecycle-worker".to_string());
        let buffer_size = self.buffer_size.unwrap_or(16);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "latest".to_string());

        tracing::info!(
            brokers = %brokers,
            consumer_group = %consumer_group,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "Redpanda broker client created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout,
            consumer_group,
            buffer_size,
            auto_offset_reset,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }
}

impl MessageBroker for RedpandaBroker {
    fn subscribe<'a>(
        &'a self,
        scope: &'a CancellationToken,
        topic: &'a str,
    ) -> BrokerFuture<'a, MessageStream> {
        Box::pin(async move {
            self.ensure_open()?;
            let consumer = self.create_consumer(topic)?;

            tracing::info!(
                topic,
                consumer_group = %self.consumer_group,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            let (tx, mut rx) = mpsc::channel(self.buffer_size);
            tokio::spawn(forward_messages(
                consumer,
                topic.to_string(),
                scope.clone(),
                self.shutdown.clone(),
                tx,
            ));

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        message: &'a OutboundMessage,
    ) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;

            let headers = message.metadata.iter().fold(
                OwnedHeaders::new().insert(Header {
                    key: MESSAGE_ID_HEADER,
                    value: Some(message.id.as_str()),
                }),
                |headers, (key, value)| {
                    headers.insert(Header {
                        key: key.as_str(),
                        value: Some(value.as_str()),
                    })
                },
            );

            // Keyed by message id: one message's retries land on the same partition.
            let record = FutureRecord::to(topic)
                .payload(&message.payload)
                .key(&message.id)
                .headers(headers);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic,
                        partition,
                        offset,
                        message_id = %message.id,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic, error = %kafka_error, "Failed to publish message");
                    Err(BrokerError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn close(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            self.shutdown.cancel();

            let producer = self.producer.clone();
            let timeout = self.timeout;
            let flushed = tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| BrokerError::CloseFailed(format!("Flush task failed: {e}")))?;

            flushed.map_err(|e| {
                tracing::error!(error = %e, "Failed to flush producer");
                BrokerError::CloseFailed(format!("Failed to flush producer: {e}"))
            })?;

            tracing::info!("Redpanda broker client closed");
            Ok(())
        })
    }
}

/// Owns one topic's consumer; delivers a message, waits for its ack, commits.
async fn forward_messages(
    consumer: StreamConsumer,
    topic: String,
    scope: CancellationToken,
    shutdown: CancellationToken,
    tx: mpsc::Sender<Result<InboundMessage, BrokerError>>,
) {
    let mut stream = consumer.stream();

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = scope.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(result) = next else { break };

        let message = match result {
            Ok(message) => message,
            Err(e) => {
                let err = BrokerError::Transport(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let (ack, receipt) = AckHandle::channel();
        let inbound = to_inbound(&message, ack);
        let message_id = inbound.id().to_string();
        tracing::trace!(
            topic = %topic,
            partition = message.partition(),
            offset = message.offset(),
            message_id = %message_id,
            "Received message"
        );

        if tx.send(Ok(inbound)).await.is_err() {
            tracing::debug!(topic = %topic, "Stream receiver dropped, exiting without commit");
            break;
        }

        let acknowledged = tokio::select! {
            biased;
            receipt = receipt => receipt.is_ok(),
            () = shutdown.cancelled() => false,
        };
        if !acknowledged {
            tracing::debug!(
                topic = %topic,
                message_id = %message_id,
                "Message not acknowledged, leaving offset uncommitted"
            );
            break;
        }

        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
            tracing::warn!(
                topic = %topic,
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Failed to commit offset (message may be redelivered)"
            );
        }
    }

    tracing::debug!(topic = %topic, "Consumer task exiting");
}

/// Convert a Kafka record into an [`InboundMessage`].
fn to_inbound(message: &BorrowedMessage<'_>, ack: AckHandle) -> InboundMessage {
    let metadata: HashMap<String, String> = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    let value = header
                        .value
                        .map(|v| String::from_utf8_lossy(v).into_owned())
                        .unwrap_or_default();
                    (header.key.to_string(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    let id = message_id(
        metadata.get(MESSAGE_ID_HEADER).map(String::as_str),
        message.topic(),
        message.partition(),
        message.offset(),
    );
    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

    InboundMessage::new(id, message.topic(), payload, metadata, ack)
}

/// The producer-assigned id if present, else the record's coordinates.
fn message_id(header: Option<&str>, topic: &str, partition: i32, offset: i64) -> String {
    match header {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("{topic}-{partition}-{offset}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBroker>();
        assert_sync::<RedpandaBroker>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaBroker::builder().build();
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }

    #[test]
    fn message_id_prefers_header() {
        assert_eq!(message_id(Some("abc"), "users", 0, 7), "abc");
        assert_eq!(message_id(Some(""), "users", 2, 7), "users-2-7");
        assert_eq!(message_id(None, "users", 1, 42), "users-1-42");
    }

    #[tokio::test]
    async fn closed_client_rejects_operations() {
        // librdkafka connects lazily, so no broker needs to be listening.
        let broker = RedpandaBroker::builder()
            .brokers("127.0.0.1:1")
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        broker.close().await.unwrap();

        let scope = CancellationToken::new();
        assert!(matches!(
            broker.subscribe(&scope, "user-lifecycle").await,
            Err(BrokerError::Closed)
        ));
        assert_eq!(
            broker
                .publish("user-lifecycle", &OutboundMessage::new(vec![]))
                .await,
            Err(BrokerError::Closed)
        );
        broker.close().await.unwrap();
    }
}
