//! Scripted message handler for engine tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use event_worker_core::handler::{HandlerError, MessageHandler};
use event_worker_core::message::InboundMessage;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Script {
    delay: Option<Duration>,
    failure: Option<HandlerError>,
    remaining_failures: Option<usize>,
}

/// Handler whose behavior is set up front and whose calls are recorded.
///
/// Ignores its execution scope on purpose: a delayed call runs to completion
/// even after cancellation, like a handler stuck on a slow downstream.
///
/// # Example
///
/// ```
/// use event_worker_core::handler::{HandlerError, MessageHandler};
/// use event_worker_core::message::InboundMessage;
/// use event_worker_core::CancellationToken;
/// use event_worker_testing::ScriptedHandler;
///
/// # tokio_test::block_on(async {
/// let handler = ScriptedHandler::new("orders").failing_with(HandlerError::Store("down".into()));
/// let scope = CancellationToken::new();
/// let message = InboundMessage::detached("m-1", "orders", vec![]);
///
/// assert!(handler.handle(&scope, &message).await.is_err());
/// assert_eq!(handler.handled_ids(), vec!["m-1"]);
/// # });
/// ```
#[derive(Clone)]
pub struct ScriptedHandler {
    topic: String,
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<String>>>,
    started: Arc<Notify>,
}

impl ScriptedHandler {
    /// A handler for `topic` that succeeds immediately.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            script: Arc::new(Mutex::new(Script::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
            started: Arc::new(Notify::new()),
        }
    }

    /// Sleep for `delay` inside every call, ignoring cancellation.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().delay = Some(delay);
        self
    }

    /// Fail every call with `error`.
    #[must_use]
    pub fn failing_with(self, error: HandlerError) -> Self {
        {
            let mut script = self.script.lock().unwrap();
            script.failure = Some(error);
            script.remaining_failures = None;
        }
        self
    }

    /// Fail the first `times` calls with `error`, then succeed.
    #[must_use]
    pub fn failing_times(self, error: HandlerError, times: usize) -> Self {
        {
            let mut script = self.script.lock().unwrap();
            script.failure = Some(error);
            script.remaining_failures = Some(times);
        }
        self
    }

    /// Message ids of every call, in call order (retries included).
    #[must_use]
    pub fn handled_ids(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Resolve once a call has started (immediately if one started unobserved).
    pub async fn started(&self) {
        self.started.notified().await;
    }

    fn next_outcome(&self) -> (Option<Duration>, Result<(), HandlerError>) {
        let mut script = self.script.lock().unwrap();
        let outcome = match script.failure.clone() {
            None => Ok(()),
            Some(error) => match script.remaining_failures {
                None => Err(error),
                Some(0) => Ok(()),
                Some(remaining) => {
                    script.remaining_failures = Some(remaining - 1);
                    Err(error)
                }
            },
        };
        (script.delay, outcome)
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    fn topic_name(&self) -> &str {
        &self.topic
    }

    async fn handle(
        &self,
        _scope: &CancellationToken,
        message: &InboundMessage,
    ) -> Result<(), HandlerError> {
        self.started.notify_one();
        let (delay, outcome) = self.next_outcome();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(message.id().to_string());
        outcome
    }
}

impl std::fmt::Debug for ScriptedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedHandler")
            .field("topic", &self.topic)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}
