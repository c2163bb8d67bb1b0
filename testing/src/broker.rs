//! In-memory broker client for fast, deterministic tests.
//!
//! Each topic is an unbounded queue. A subscription drains its topic through a
//! forwarding task that hands over one message at a time and waits for the
//! message's acknowledgment before delivering the next, so the ack ledger
//! mirrors what a committing broker would record.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned test locks

use event_worker_core::broker::{BrokerError, BrokerFuture, MessageBroker, MessageStream};
use event_worker_core::message::{AckHandle, InboundMessage, OutboundMessage};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Item queued on a topic.
enum Delivery {
    Message(OutboundMessage),
    Error(BrokerError),
}

#[derive(Default)]
struct TopicState {
    sender: Option<mpsc::UnboundedSender<Delivery>>,
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
    published: Vec<OutboundMessage>,
    acked: Vec<String>,
    abandoned: Vec<String>,
}

impl TopicState {
    fn sender(&mut self) -> &mpsc::UnboundedSender<Delivery> {
        let Self {
            sender, receiver, ..
        } = self;
        sender.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            *receiver = Some(rx);
            tx
        })
    }
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    subscriptions: Vec<String>,
    failing_subscribe: HashSet<String>,
    failing_publish: HashSet<String>,
    fail_close: bool,
    closed: bool,
    close_calls: usize,
}

/// Channel-backed [`MessageBroker`] with delivery ledgers and failure injection.
///
/// # Example
///
/// ```
/// use event_worker_core::broker::MessageBroker;
/// use event_worker_core::message::OutboundMessage;
/// use event_worker_core::CancellationToken;
/// use event_worker_testing::InMemoryBroker;
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::new();
/// broker
///     .publish("user-lifecycle", &OutboundMessage::with_id("m-1", b"{}".to_vec()))
///     .await
///     .unwrap();
///
/// let scope = CancellationToken::new();
/// let mut messages = broker.subscribe(&scope, "user-lifecycle").await.unwrap();
/// let message = messages.next().await.unwrap().unwrap();
/// assert_eq!(message.id(), "m-1");
/// assert!(message.ack());
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    shutdown: CancellationToken,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subscription to `topic` fail.
    pub fn fail_subscribe(&self, topic: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_subscribe
            .insert(topic.to_string());
    }

    /// Make every publish to `topic` fail.
    pub fn fail_publish(&self, topic: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_publish
            .insert(topic.to_string());
    }

    /// Make [`close`](MessageBroker::close) report a failure.
    pub fn fail_close(&self) {
        self.state.lock().unwrap().fail_close = true;
    }

    /// Queue a receive error on `topic`; subscribers see it in-band.
    pub fn push_error(&self, topic: &str, error: BrokerError) {
        let mut state = self.state.lock().unwrap();
        let _ = state
            .topics
            .entry(topic.to_string())
            .or_default()
            .sender()
            .send(Delivery::Error(error));
    }

    /// End the topic's message sequence once its queued messages are delivered.
    pub fn close_topic(&self, topic: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(topic_state) = state.topics.get_mut(topic) {
            topic_state.sender = None;
        }
    }

    /// Whether [`close`](MessageBroker::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Number of [`close`](MessageBroker::close) calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    /// Topics subscribed to, in request order (failed attempts included).
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    /// Messages published to `topic`, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<OutboundMessage> {
        self.state
            .lock()
            .unwrap()
            .topics
            .get(topic)
            .map(|t| t.published.clone())
            .unwrap_or_default()
    }

    /// Ids of messages acknowledged on `topic`, in acknowledgment order.
    #[must_use]
    pub fn acked(&self, topic: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .topics
            .get(topic)
            .map(|t| t.acked.clone())
            .unwrap_or_default()
    }

    /// Ids of messages dropped on `topic` without acknowledgment.
    #[must_use]
    pub fn abandoned(&self, topic: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .topics
            .get(topic)
            .map(|t| t.abandoned.clone())
            .unwrap_or_default()
    }

    fn record(&self, topic: &str, id: String, acknowledged: bool) {
        let mut state = self.state.lock().unwrap();
        let topic_state = state.topics.entry(topic.to_string()).or_default();
        if acknowledged {
            topic_state.acked.push(id);
        } else {
            topic_state.abandoned.push(id);
        }
    }

    /// Hand messages to the subscriber one at a time, recording each outcome.
    async fn forward(
        self,
        scope: CancellationToken,
        topic: String,
        mut queue: mpsc::UnboundedReceiver<Delivery>,
        out: mpsc::Sender<Result<InboundMessage, BrokerError>>,
    ) {
        loop {
            let delivery = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = scope.cancelled() => break,
                delivery = queue.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let message = match delivery {
                Delivery::Message(message) => message,
                Delivery::Error(err) => {
                    if out.send(Err(err)).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let id = message.id.clone();
            let (ack, mut receipt) = AckHandle::channel();
            let inbound = InboundMessage::new(
                message.id,
                topic.clone(),
                message.payload,
                message.metadata,
                ack,
            );
            if out.send(Ok(inbound)).await.is_err() {
                self.record(&topic, id, false);
                break;
            }

            let acknowledged = tokio::select! {
                biased;
                receipt = &mut receipt => receipt.is_ok(),
                () = self.shutdown.cancelled() => false,
            };
            self.record(&topic, id, acknowledged);
            if !acknowledged {
                break;
            }
        }
        tracing::debug!(topic = %topic, "In-memory subscription ended");
    }
}

impl MessageBroker for InMemoryBroker {
    fn subscribe<'a>(
        &'a self,
        scope: &'a CancellationToken,
        topic: &'a str,
    ) -> BrokerFuture<'a, MessageStream> {
        Box::pin(async move {
            let queue = {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                state.subscriptions.push(topic.to_string());
                if state.failing_subscribe.contains(topic) {
                    return Err(BrokerError::SubscriptionFailed {
                        topic: topic.to_string(),
                        reason: "injected subscribe failure".to_string(),
                    });
                }

                let topic_state = state.topics.entry(topic.to_string()).or_default();
                let _ = topic_state.sender();
                topic_state
                    .receiver
                    .take()
                    .ok_or_else(|| BrokerError::SubscriptionFailed {
                        topic: topic.to_string(),
                        reason: "topic already has a subscriber".to_string(),
                    })?
            };

            let (out, mut inbound) = mpsc::channel(1);
            tokio::spawn(self.clone().forward(
                scope.clone(),
                topic.to_string(),
                queue,
                out,
            ));

            let stream = async_stream::stream! {
                while let Some(item) = inbound.recv().await {
                    yield item;
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
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            if state.failing_publish.contains(topic) {
                return Err(BrokerError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }

            let topic_state = state.topics.entry(topic.to_string()).or_default();
            topic_state.published.push(message.clone());
            let _ = topic_state.sender().send(Delivery::Message(message.clone()));
            Ok(())
        })
    }

    fn close(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            self.shutdown.cancel();
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            state.close_calls += 1;
            if state.fail_close {
                return Err(BrokerError::CloseFailed("injected close failure".to_string()));
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("InMemoryBroker")
            .field("topics", &state.topics.keys().collect::<Vec<_>>())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_in_publish_order_and_records_acks() {
        let broker = InMemoryBroker::new();
        for id in ["m-1", "m-2"] {
            broker
                .publish("orders", &OutboundMessage::with_id(id, vec![]))
                .await
                .unwrap();
        }

        let scope = CancellationToken::new();
        let mut messages = broker.subscribe(&scope, "orders").await.unwrap();

        let first = messages.next().await.unwrap().unwrap();
        assert_eq!(first.id(), "m-1");
        assert!(first.ack());

        let second = messages.next().await.unwrap().unwrap();
        assert_eq!(second.id(), "m-2");
        drop(second);

        broker.close_topic("orders");
        assert!(messages.next().await.is_none());
        assert_eq!(broker.acked("orders"), vec!["m-1"]);
        assert_eq!(broker.abandoned("orders"), vec!["m-2"]);
    }

    #[tokio::test]
    async fn next_message_waits_for_ack() {
        let broker = InMemoryBroker::new();
        for id in ["m-1", "m-2"] {
            broker
                .publish("orders", &OutboundMessage::with_id(id, vec![]))
                .await
                .unwrap();
        }

        let scope = CancellationToken::new();
        let mut messages = broker.subscribe(&scope, "orders").await.unwrap();
        let first = messages.next().await.unwrap().unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), messages.next()).await;
        assert!(pending.is_err());

        assert!(first.ack());
        let second = messages.next().await.unwrap().unwrap();
        assert_eq!(second.id(), "m-2");
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let broker = InMemoryBroker::new();
        broker.fail_subscribe("a");
        broker.fail_publish("b");
        broker.fail_close();

        let scope = CancellationToken::new();
        assert!(matches!(
            broker.subscribe(&scope, "a").await,
            Err(BrokerError::SubscriptionFailed { .. })
        ));
        assert!(matches!(
            broker.publish("b", &OutboundMessage::new(vec![])).await,
            Err(BrokerError::PublishFailed { .. })
        ));
        assert!(matches!(broker.close().await, Err(BrokerError::CloseFailed(_))));
        assert_eq!(broker.subscriptions(), vec!["a"]);
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn close_ends_streams_and_rejects_operations() {
        let broker = InMemoryBroker::new();
        let scope = CancellationToken::new();
        let mut messages = broker.subscribe(&scope, "orders").await.unwrap();

        broker.close().await.unwrap();
        assert!(messages.next().await.is_none());
        assert_eq!(
            broker.publish("orders", &OutboundMessage::new(vec![])).await,
            Err(BrokerError::Closed)
        );
        assert!(matches!(
            broker.subscribe(&scope, "orders").await,
            Err(BrokerError::Closed)
        ));
    }

    #[tokio::test]
    async fn second_subscriber_is_rejected() {
        let broker = InMemoryBroker::new();
        let scope = CancellationToken::new();
        let _first = broker.subscribe(&scope, "orders").await.unwrap();
        assert!(matches!(
            broker.subscribe(&scope, "orders").await,
            Err(BrokerError::SubscriptionFailed { .. })
        ));
    }
}
