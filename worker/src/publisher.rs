//! Outbound publisher.
//!
//! A publisher is bound to one topic by a configuration toggle. A disabled
//! publisher accepts every payload and sends nothing, so callers never branch
//! on configuration.

use crate::config::Toggle;
use event_worker_core::CancellationToken;
use event_worker_core::broker::{BrokerError, MessageBroker};
use event_worker_core::handler::HandlerError;
use event_worker_core::message::OutboundMessage;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Metadata key naming the publisher that emitted a message.
pub const PUBLISHER_HEADER: &str = "publisher";

/// Errors from [`Publisher::publish`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// The payload could not be encoded
    #[error("Publisher '{publisher}' failed to encode payload: {reason}")]
    Encode {
        /// Publisher name
        publisher: String,
        /// Encoder error
        reason: String,
    },

    /// The broker rejected the message
    #[error("Publisher '{publisher}' failed to send: {source}")]
    Broker {
        /// Publisher name
        publisher: String,
        /// Broker client error
        #[source]
        source: BrokerError,
    },

    /// The caller's scope was cancelled before the broker confirmed
    #[error("Publish cancelled")]
    Cancelled,
}

impl From<PublishError> for HandlerError {
    fn from(error: PublishError) -> Self {
        match error {
            PublishError::Cancelled => Self::Cancelled,
            other => Self::Publish(other.to_string()),
        }
    }
}

/// Named emitter of JSON events to a single topic.
#[derive(Clone)]
pub enum Publisher {
    /// Sends through the broker
    Enabled {
        /// Publisher name, used in logs and message metadata
        name: String,
        /// Destination topic
        topic: String,
        /// Broker client
        broker: Arc<dyn MessageBroker>,
    },
    /// Accepts and discards every payload
    Disabled {
        /// Publisher name
        name: String,
    },
}

impl Publisher {
    /// Build a publisher from its configuration toggle.
    #[must_use]
    pub fn from_toggle(
        name: impl Into<String>,
        toggle: &Toggle,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        let name = name.into();
        if toggle.enable {
            tracing::info!(publisher = %name, topic = %toggle.topic, "Publisher enabled");
            Self::Enabled {
                name,
                topic: toggle.topic.clone(),
                broker,
            }
        } else {
            tracing::info!(publisher = %name, "Publisher disabled");
            Self::Disabled { name }
        }
    }

    /// The publisher's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Enabled { name, .. } | Self::Disabled { name } => name,
        }
    }

    /// Destination topic, if enabled.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Enabled { topic, .. } => Some(topic),
            Self::Disabled { .. } => None,
        }
    }

    /// Whether messages actually reach the broker.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// Encode `payload` as JSON and send it with a fresh message id.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Encode`] if `payload` cannot be serialized
    /// - [`PublishError::Broker`] if the broker rejects the message
    /// - [`PublishError::Cancelled`] if `scope` is cancelled first
    pub async fn publish<T>(&self, scope: &CancellationToken, payload: &T) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let Self::Enabled {
            name,
            topic,
            broker,
        } = self
        else {
            tracing::debug!(publisher = %self.name(), "Publisher disabled, skipping");
            return Ok(());
        };

        if scope.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        let bytes = serde_json::to_vec(payload).map_err(|e| PublishError::Encode {
            publisher: name.clone(),
            reason: e.to_string(),
        })?;
        let message = OutboundMessage::new(bytes).with_metadata(PUBLISHER_HEADER, name.as_str());

        tokio::select! {
            biased;

            () = scope.cancelled() => Err(PublishError::Cancelled),
            result = broker.publish(topic, &message) => {
                result.map_err(|source| PublishError::Broker {
                    publisher: name.clone(),
                    source,
                })?;
                tracing::debug!(
                    publisher = %name,
                    topic = %topic,
                    message_id = %message.id,
                    "Message published"
                );
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled { name, topic, .. } => f
                .debug_struct("Enabled")
                .field("name", name)
                .field("topic", topic)
                .finish_non_exhaustive(),
            Self::Disabled { name } => f.debug_struct("Disabled").field("name", name).finish(),
        }
    }
}
