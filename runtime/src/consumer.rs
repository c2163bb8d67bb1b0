//! Consumption engine.
//!
//! One processing loop per registered topic, each bound to a child scope of
//! the caller's scope and tracked by a [`TaskGroup`]. Messages are handled one
//! at a time within a topic and acknowledged after the handler returns,
//! whatever the outcome.

use crate::metrics::ConsumerMetrics;
use crate::registry::HandlerRegistry;
use crate::retry::{RetryError, RetryPolicy, retry_with_predicate};
use crate::task_group::TaskGroup;
use event_worker_core::broker::{BrokerError, MessageBroker, MessageStream};
use event_worker_core::handler::{HandlerError, MessageHandler};
use event_worker_core::message::InboundMessage;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// What the engine does when a handler reports an error.
///
/// The message is acknowledged in every case; there is no redelivery and no
/// dead-letter path.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FailurePolicy {
    /// Log the error and drop the message.
    #[default]
    AtMostOnce,
    /// Re-run the handler on retryable errors with exponential backoff, then
    /// log and drop the message if it still fails.
    Retry(RetryPolicy),
}

/// Lifecycle of a [`Consumer`]. Never returns to `Running` once `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// No handlers registered
    Uninitialized,
    /// Handlers registered, not started
    Populated,
    /// `start` was called; loops may be active
    Running,
    /// Cancellation issued, waiting for loops to drain
    ShuttingDown,
    /// Broker resources released
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Populated => "populated",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How the drain phase of [`Consumer::shutdown`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every processing loop returned before the deadline
    Drained,
    /// The deadline elapsed with `pending` loops still running
    TimedOut {
        /// Loops that had not returned when the deadline elapsed
        pending: usize,
    },
}

/// Errors surfaced by the consumption engine.
///
/// Per-message failures never appear here; they are logged by the loops.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Subscribing to a topic failed; loops started by the same call were cancelled
    #[error("Failed to subscribe to topic '{topic}': {source}")]
    Subscription {
        /// The topic whose subscription failed
        topic: String,
        /// Broker client error
        #[source]
        source: BrokerError,
    },

    /// Releasing the broker client failed during shutdown
    #[error("Failed to release broker resources: {0}")]
    Release(#[source] BrokerError),

    /// The operation is not valid in the engine's current state
    #[error("Cannot {operation} consumer in state '{state}'")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// The state the engine was in
        state: ConsumerState,
    },
}

/// Orchestrates per-topic processing loops over a shared broker client.
///
/// # Example
///
/// ```rust,ignore
/// let mut consumer = Consumer::new(broker, registry);
/// let scope = CancellationToken::new();
///
/// consumer.start(&scope).await?;
/// shutdown_signal().await;
/// consumer.shutdown(Duration::from_secs(10)).await?;
/// ```
pub struct Consumer {
    broker: Arc<dyn MessageBroker>,
    registry: HandlerRegistry,
    tasks: TaskGroup,
    policy: FailurePolicy,
    state: ConsumerState,
}

impl Consumer {
    /// Create an engine over a populated (or empty) registry.
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>, registry: HandlerRegistry) -> Self {
        let state = if registry.is_empty() {
            ConsumerState::Uninitialized
        } else {
            ConsumerState::Populated
        };

        Self {
            broker,
            registry,
            tasks: TaskGroup::new(),
            policy: FailurePolicy::default(),
            state,
        }
    }

    /// Replace the default at-most-once failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConsumerState {
        self.state
    }

    /// Number of processing loops that have not returned yet.
    #[must_use]
    pub fn active_loops(&self) -> usize {
        self.tasks.active()
    }

    /// Topics with a registered handler, in subscription order.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.registry.topics()
    }

    /// Subscribe to every registered topic and start one loop per topic.
    ///
    /// Loops run in child scopes of `scope`; cancelling `scope` stops them all.
    /// With an empty registry nothing is subscribed and `start` succeeds.
    ///
    /// # Errors
    ///
    /// - [`ConsumerError::Subscription`] if any subscription fails. Loops
    ///   already started by this call are cancelled before returning; call
    ///   [`shutdown`](Self::shutdown) to drain them and release the broker.
    /// - [`ConsumerError::InvalidState`] if the engine was already started.
    pub async fn start(&mut self, scope: &CancellationToken) -> Result<(), ConsumerError> {
        if !matches!(
            self.state,
            ConsumerState::Uninitialized | ConsumerState::Populated
        ) {
            return Err(ConsumerError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        self.state = ConsumerState::Running;

        if self.registry.is_empty() {
            tracing::info!("No handlers registered, consumer has nothing to start");
            return Ok(());
        }

        for (topic, handler) in self.registry.iter() {
            let stream = match self.broker.subscribe(scope, topic).await {
                Ok(stream) => stream,
                Err(source) => {
                    tracing::error!(topic = %topic, error = %source, "Failed to subscribe to topic");
                    self.tasks.cancel_all();
                    return Err(ConsumerError::Subscription {
                        topic: topic.to_string(),
                        source,
                    });
                }
            };

            let topic_name = topic.to_string();
            let handler = Arc::clone(handler);
            let policy = self.policy.clone();
            self.tasks.spawn(topic, scope, move |token| {
                process_messages(token, topic_name, stream, handler, policy)
            });

            tracing::info!(topic = %topic, "Started consumer for topic");
        }

        Ok(())
    }

    /// Cancel every loop, wait for them up to `timeout`, then release the broker.
    ///
    /// A timeout is not an error: it is logged and reported as
    /// [`ShutdownOutcome::TimedOut`], and the broker is released anyway.
    ///
    /// # Errors
    ///
    /// - [`ConsumerError::Release`] if the broker client fails to close.
    /// - [`ConsumerError::InvalidState`] if shutdown was already requested.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<ShutdownOutcome, ConsumerError> {
        if matches!(
            self.state,
            ConsumerState::ShuttingDown | ConsumerState::Stopped
        ) {
            return Err(ConsumerError::InvalidState {
                operation: "shutdown",
                state: self.state,
            });
        }
        self.state = ConsumerState::ShuttingDown;

        tracing::info!(active_loops = self.tasks.active(), "Shutting down consumer");
        self.tasks.cancel_all();

        let outcome = match self.tasks.wait_with_timeout(timeout).await {
            Ok(()) => {
                tracing::info!("All consumer loops stopped");
                ShutdownOutcome::Drained
            }
            Err(pending) => {
                tracing::warn!(
                    pending,
                    timeout_ms = timeout.as_millis(),
                    "Shutdown timed out waiting for consumer loops"
                );
                ConsumerMetrics::record_shutdown_timeout();
                ShutdownOutcome::TimedOut { pending }
            }
        };

        let released = self.broker.close().await;
        self.state = ConsumerState::Stopped;

        if let Err(err) = released {
            tracing::error!(error = %err, "Failed to close broker client");
            return Err(ConsumerError::Release(err));
        }

        tracing::info!("Consumer stopped");
        Ok(outcome)
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("active_loops", &self.tasks.active())
            .finish_non_exhaustive()
    }
}

/// Per-topic processing loop.
async fn process_messages(
    scope: CancellationToken,
    topic: String,
    mut stream: MessageStream,
    handler: Arc<dyn MessageHandler>,
    policy: FailurePolicy,
) {
    ConsumerMetrics::record_loop_started();

    loop {
        tokio::select! {
            biased;

            () = scope.cancelled() => {
                tracing::info!(topic = %topic, "Stopping consumer loop");
                break;
            }

            next = stream.next() => match next {
                Some(Ok(message)) => {
                    handle_message(&scope, &topic, handler.as_ref(), &policy, message).await;
                }
                Some(Err(err)) => {
                    tracing::warn!(topic = %topic, error = %err, "Error receiving message");
                }
                None => {
                    tracing::warn!(topic = %topic, "Message stream closed");
                    break;
                }
            }
        }
    }

    ConsumerMetrics::record_loop_stopped();
}

/// Run the handler under `policy`, log the outcome, and acknowledge.
async fn handle_message(
    scope: &CancellationToken,
    topic: &str,
    handler: &dyn MessageHandler,
    policy: &FailurePolicy,
    message: InboundMessage,
) {
    let message_id = message.id().to_string();
    tracing::debug!(topic, message_id = %message_id, "Processing message");

    let started = Instant::now();
    let result = match policy {
        FailurePolicy::AtMostOnce => handler.handle(scope, &message).await,
        FailurePolicy::Retry(retry) => {
            let mut attempts = 0_usize;
            retry_with_predicate(
                retry,
                scope,
                || {
                    if attempts > 0 {
                        ConsumerMetrics::record_retry(topic);
                    }
                    attempts += 1;
                    handler.handle(scope, &message)
                },
                HandlerError::is_retryable,
            )
            .await
            .map_err(RetryError::into_inner)
        }
    };
    let elapsed = started.elapsed();

    match result {
        Ok(()) => {
            ConsumerMetrics::record_handled(topic, elapsed);
            tracing::debug!(topic, message_id = %message_id, "Message handled");
        }
        Err(err) => {
            ConsumerMetrics::record_failed(topic, elapsed);
            tracing::error!(
                message_id = %message_id,
                topic,
                error = %err,
                "Failed to handle message, acknowledging and dropping"
            );
        }
    }

    if !message.ack() {
        tracing::warn!(
            topic,
            message_id = %message_id,
            "Broker client stopped tracking message before acknowledgment"
        );
    }
}
