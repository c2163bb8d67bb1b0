//! Message types exchanged with the broker.
//!
//! An [`InboundMessage`] is owned by the worker from the moment the broker client
//! hands it over until it is acknowledged or dropped. Acknowledgment consumes the
//! message, so it can happen at most once by construction:
//!
//! ```
//! use event_worker_core::message::{AckHandle, InboundMessage};
//! use std::collections::HashMap;
//!
//! let (ack, mut receipt) = AckHandle::channel();
//! let message = InboundMessage::new(
//!     "msg-1",
//!     "user-lifecycle",
//!     b"{}".to_vec(),
//!     HashMap::new(),
//!     ack,
//! );
//!
//! assert!(message.ack());
//! assert!(receipt.try_recv().is_ok());
//! ```
//!
//! Dropping a message without acknowledging it is *abandonment*: the broker
//! client observes a closed receipt and must treat the message as not handled.

use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

/// Receiving half of an acknowledgment, held by the broker client.
///
/// Resolves with `Ok(())` when the message is acknowledged and with an error
/// when the message is abandoned.
pub type AckReceipt = oneshot::Receiver<()>;

/// One-shot acknowledgment capability attached to an [`InboundMessage`].
#[derive(Debug)]
pub struct AckHandle {
    sender: oneshot::Sender<()>,
}

impl AckHandle {
    /// Create an acknowledgment handle and the receipt the broker client awaits.
    #[must_use]
    pub fn channel() -> (Self, AckReceipt) {
        let (sender, receipt) = oneshot::channel();
        (Self { sender }, receipt)
    }

    /// Signal the broker client. Returns `false` if it stopped waiting.
    fn send(self) -> bool {
        self.sender.send(()).is_ok()
    }
}

/// A message delivered by the broker client for one topic.
///
/// The engine never mutates the payload; handlers only ever see `&InboundMessage`.
pub struct InboundMessage {
    id: String,
    topic: String,
    payload: Vec<u8>,
    metadata: HashMap<String, String>,
    ack: AckHandle,
}

impl InboundMessage {
    /// Create a message with an attached acknowledgment handle.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        payload: Vec<u8>,
        metadata: HashMap<String, String>,
        ack: AckHandle,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            payload,
            metadata,
            ack,
        }
    }

    /// Create a message whose acknowledgment is not observed by anyone.
    ///
    /// Useful for tests and for replaying payloads outside a live subscription.
    #[must_use]
    pub fn detached(id: impl Into<String>, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        let (ack, _receipt) = AckHandle::channel();
        Self::new(id, topic, payload, HashMap::new(), ack)
    }

    /// Opaque message identifier assigned by the producer or the broker client.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Topic the message was received from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Transport metadata (Kafka headers).
    #[must_use]
    pub const fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Acknowledge the message, consuming it.
    ///
    /// Returns `true` if the broker client received the acknowledgment and
    /// `false` if it had already stopped tracking the message (for example after
    /// the broker was closed).
    #[must_use = "a lost acknowledgment means the message may be redelivered"]
    pub fn ack(self) -> bool {
        self.ack.send()
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A message to be published to a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Message identifier (a random UUID unless set explicitly).
    pub id: String,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Metadata sent as transport headers.
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    /// Create a message with a fresh UUID v4 identifier.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), payload)
    }

    /// Create a message with an explicit identifier.
    #[must_use]
    pub fn with_id(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
