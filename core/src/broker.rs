//! Broker client abstraction.
//!
//! The consumption engine needs exactly three things from a broker client:
//! open a per-topic message sequence, publish a message, and release every
//! resource on shutdown. [`MessageBroker`] captures that surface and nothing else;
//! the wire protocol lives entirely in the implementations.
//!
//! # Implementations
//!
//! - `RedpandaBroker` (`event-worker-redpanda`) - Kafka-compatible production client
//! - `InMemoryBroker` (`event-worker-testing`) - channel-backed broker for tests and demos
//!
//! # Delivery
//!
//! Each subscription yields one message at a time. The client waits for the
//! message's acknowledgment (see [`InboundMessage::ack`](crate::message::InboundMessage::ack))
//! before it records progress and delivers the next one. An abandoned message
//! (dropped without acknowledgment) is never recorded as handled.
//!
//! # Example
//!
//! ```rust,ignore
//! use event_worker_core::broker::MessageBroker;
//! use event_worker_core::CancellationToken;
//! use futures::StreamExt;
//!
//! async fn drain(broker: &dyn MessageBroker) -> Result<(), Box<dyn std::error::Error>> {
//!     let scope = CancellationToken::new();
//!     let mut messages = broker.subscribe(&scope, "user-lifecycle").await?;
//!     while let Some(result) = messages.next().await {
//!         let message = result?;
//!         println!("received {}", message.id());
//!         let _ = message.ack();
//!     }
//!     broker.close().await?;
//!     Ok(())
//! }
//! ```

use crate::message::{InboundMessage, OutboundMessage};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to create or connect the client
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    Transport(String),

    /// Releasing broker resources failed
    #[error("Close failed: {0}")]
    CloseFailed(String),

    /// The broker client has already been closed
    #[error("Broker client is closed")]
    Closed,
}

/// Lazy, unbounded, non-restartable sequence of messages for one topic.
///
/// The stream ends when the subscription scope is cancelled, when the broker
/// client is closed, or when the client gives up on the subscription. Errors
/// are reported in-band and do not end the stream.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<InboundMessage, BrokerError>> + Send>>;

/// Boxed future returned by [`MessageBroker`] methods.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// Trait for broker client implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one client is shared by the
/// consumption engine and every outbound publisher.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the client can
/// be held as `Arc<dyn MessageBroker>`.
pub trait MessageBroker: Send + Sync {
    /// Subscribe to a single topic.
    ///
    /// The subscription lives until `scope` is cancelled or the client is closed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the broker is unreachable
    /// or the topic is invalid, and [`BrokerError::Closed`] after [`close`](Self::close).
    fn subscribe<'a>(
        &'a self,
        scope: &'a CancellationToken,
        topic: &'a str,
    ) -> BrokerFuture<'a, MessageStream>;

    /// Publish a message to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker rejects or times out
    /// the message, and [`BrokerError::Closed`] after [`close`](Self::close).
    fn publish<'a>(&'a self, topic: &'a str, message: &'a OutboundMessage)
    -> BrokerFuture<'a, ()>;

    /// Release all broker resources. Open message streams end.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::CloseFailed`] if resources could not be released cleanly.
    fn close(&self) -> BrokerFuture<'_, ()>;
}
