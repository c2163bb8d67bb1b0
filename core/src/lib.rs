//! # Event Worker Core
//!
//! Contracts shared by every part of the event worker.
//!
//! The worker consumes domain-lifecycle events from a message broker, routes each
//! message to the handler registered for its topic, and may emit follow-up events.
//! This crate holds only the seams between those pieces:
//!
//! - [`message`]: inbound messages (with their one-shot acknowledgment) and outbound messages
//! - [`broker`]: the [`MessageBroker`](broker::MessageBroker) client trait and its errors
//! - [`handler`]: the [`MessageHandler`](handler::MessageHandler) trait and its errors
//! - [`environment`]: injectable dependencies such as the clock
//!
//! ## Example
//!
//! ```ignore
//! use event_worker_core::broker::MessageBroker;
//! use event_worker_core::message::OutboundMessage;
//!
//! async fn emit(broker: &dyn MessageBroker) -> Result<(), Box<dyn std::error::Error>> {
//!     let message = OutboundMessage::new(br#"{"uuid":"abc","status":"pending"}"#.to_vec());
//!     broker.publish("user-lifecycle", &message).await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod handler;
pub mod message;

/// Re-exported so implementors name the same execution-scope type as the engine.
pub use tokio_util::sync::CancellationToken;

/// Environment module - injectable dependencies
///
/// External dependencies that make behavior time-dependent are abstracted
/// behind traits so tests can substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use event_worker_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
