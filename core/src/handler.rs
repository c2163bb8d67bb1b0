//! Message handler contract.
//!
//! A handler is bound to exactly one topic. The engine calls
//! [`MessageHandler::handle`] once per delivered message, sequentially within
//! that topic, and acknowledges the message itself afterwards regardless of
//! the outcome. Handlers therefore only see `&InboundMessage` and can never
//! acknowledge on their own.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use event_worker_core::handler::{HandlerError, MessageHandler};
//! use event_worker_core::message::InboundMessage;
//! use event_worker_core::CancellationToken;
//!
//! struct AuditHandler {
//!     topic: String,
//! }
//!
//! #[async_trait]
//! impl MessageHandler for AuditHandler {
//!     fn topic_name(&self) -> &str {
//!         &self.topic
//!     }
//!
//!     async fn handle(
//!         &self,
//!         _scope: &CancellationToken,
//!         message: &InboundMessage,
//!     ) -> Result<(), HandlerError> {
//!         let event: AuditEvent = serde_json::from_slice(message.payload())
//!             .map_err(|e| HandlerError::deserialization(message.id(), e))?;
//!         tracing::info!(?event, "Audit event received");
//!         Ok(())
//!     }
//! }
//! ```

use crate::message::InboundMessage;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors a handler can report for a single message.
///
/// None of these stop the topic's processing loop; the engine logs the error
/// and acknowledges the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The payload does not match the topic's schema
    #[error("Failed to deserialize message {message_id}: {reason}")]
    Deserialization {
        /// Identifier of the offending message
        message_id: String,
        /// Decoder error
        reason: String,
    },

    /// The record referenced by the message does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The record store failed to read or persist
    #[error("Record store failure: {0}")]
    Store(String),

    /// Emitting a follow-up event failed
    #[error("Failed to emit follow-up event: {0}")]
    Publish(String),

    /// The execution scope was cancelled while the handler was waiting
    #[error("Handler cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Build a [`HandlerError::Deserialization`] from any decoder error.
    #[must_use]
    pub fn deserialization(message_id: &str, reason: impl std::fmt::Display) -> Self {
        Self::Deserialization {
            message_id: message_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether running the handler again could change the outcome.
    ///
    /// Malformed payloads, missing records, and cancellation are permanent.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Publish(_))
    }
}

/// Handler for the messages of one topic.
///
/// # Thread Safety
///
/// Implementors must be `Send + Sync + 'static`; handlers are shared with the
/// topic's processing task.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// The topic this handler is bound to. Must not change over the handler's lifetime.
    fn topic_name(&self) -> &str;

    /// Process one message.
    ///
    /// `scope` is the processing loop's execution scope; long waits inside the
    /// handler may observe it, but the engine never interrupts a running call.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::Deserialization`] if the payload does not conform
    /// - [`HandlerError::NotFound`] / [`HandlerError::Store`] if the record lookup or update fails
    /// - [`HandlerError::Publish`] if a follow-up event could not be emitted
    async fn handle(
        &self,
        scope: &CancellationToken,
        message: &InboundMessage,
    ) -> Result<(), HandlerError>;
}
