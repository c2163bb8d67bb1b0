//! Integration tests for the consumption engine lifecycle
//!
//! Exercise start, per-topic processing, acknowledgment, and bounded shutdown
//! against the in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use event_worker_core::CancellationToken;
use event_worker_core::broker::{BrokerError, MessageBroker};
use event_worker_core::handler::HandlerError;
use event_worker_core::message::OutboundMessage;
use event_worker_runtime::{
    Consumer, ConsumerError, ConsumerState, FailurePolicy, HandlerRegistry, RetryPolicy,
    ShutdownOutcome,
};
use event_worker_testing::helpers::eventually;
use event_worker_testing::{InMemoryBroker, ScriptedHandler, properties};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Test Fixtures
// ============================================================================

const WAIT: Duration = Duration::from_secs(2);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("event_worker_runtime=debug")
        .with_test_writer()
        .try_init();
}

fn registry_with(handlers: &[ScriptedHandler]) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for handler in handlers {
        registry.register(Arc::new(handler.clone())).unwrap();
    }
    registry
}

async fn publish(broker: &InMemoryBroker, topic: &str, id: &str, payload: &[u8]) {
    broker
        .publish(topic, &OutboundMessage::with_id(id, payload.to_vec()))
        .await
        .unwrap();
}

// ============================================================================
// Start
// ============================================================================

#[tokio::test]
async fn start_runs_one_loop_per_topic() {
    let broker = Arc::new(InMemoryBroker::new());
    let handlers = [
        ScriptedHandler::new("user-lifecycle"),
        ScriptedHandler::new("order-events"),
    ];
    let mut consumer = Consumer::new(broker.clone(), registry_with(&handlers));
    let scope = CancellationToken::new();

    consumer.start(&scope).await.unwrap();

    assert_eq!(consumer.state(), ConsumerState::Running);
    assert_eq!(consumer.active_loops(), 2);
    assert_eq!(broker.subscriptions(), vec!["order-events", "user-lifecycle"]);

    consumer.shutdown(WAIT).await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn every_registered_topic_gets_exactly_one_loop(topics in properties::topic_names(8)) {
        let (loops, subscriptions) = tokio_test::block_on(async {
            let broker = Arc::new(InMemoryBroker::new());
            let handlers: Vec<_> = topics.iter().map(ScriptedHandler::new).collect();
            let mut consumer = Consumer::new(broker.clone(), registry_with(&handlers));

            consumer.start(&CancellationToken::new()).await.unwrap();
            let loops = consumer.active_loops();
            consumer.shutdown(WAIT).await.unwrap();
            (loops, broker.subscriptions())
        });

        let mut expected = topics.clone();
        expected.sort();
        prop_assert_eq!(loops, topics.len());
        prop_assert_eq!(subscriptions, expected);
    }
}

#[tokio::test]
async fn empty_registry_never_subscribes() {
    let broker = Arc::new(InMemoryBroker::new());
    let mut consumer = Consumer::new(broker.clone(), HandlerRegistry::new());
    assert_eq!(consumer.state(), ConsumerState::Uninitialized);

    consumer.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(consumer.active_loops(), 0);

    let outcome = consumer.shutdown(WAIT).await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert!(broker.subscriptions().is_empty());
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn subscribe_failure_rolls_back_started_loops() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_subscribe("b");
    let handlers = [
        ScriptedHandler::new("a"),
        ScriptedHandler::new("b"),
        ScriptedHandler::new("c"),
    ];
    let mut consumer = Consumer::new(broker.clone(), registry_with(&handlers));

    let err = consumer.start(&CancellationToken::new()).await.unwrap_err();
    match err {
        ConsumerError::Subscription { topic, source } => {
            assert_eq!(topic, "b");
            assert!(matches!(source, BrokerError::SubscriptionFailed { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    // "c" was never requested; "a" is cancelled.
    assert_eq!(broker.subscriptions(), vec!["a", "b"]);
    assert!(eventually(WAIT, || async { consumer.active_loops() == 0 }).await);

    let outcome = consumer.shutdown(WAIT).await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert!(broker.is_closed());
}

// ============================================================================
// Processing
// ============================================================================

#[tokio::test]
async fn every_message_is_acknowledged_once_whatever_the_outcome() {
    init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    let ok = ScriptedHandler::new("ok");
    let failing = ScriptedHandler::new("failing").failing_with(HandlerError::Store("down".into()));
    let malformed = ScriptedHandler::new("malformed")
        .failing_with(HandlerError::deserialization("m", "expected value"));
    let mut consumer = Consumer::new(
        broker.clone(),
        registry_with(&[ok.clone(), failing.clone(), malformed.clone()]),
    );
    consumer.start(&CancellationToken::new()).await.unwrap();

    for topic in ["ok", "failing", "malformed"] {
        publish(&broker, topic, &format!("{topic}-1"), b"{}").await;
        publish(&broker, topic, &format!("{topic}-2"), b"{}").await;
    }

    for topic in ["ok", "failing", "malformed"] {
        let expected = vec![format!("{topic}-1"), format!("{topic}-2")];
        assert!(eventually(WAIT, || async { broker.acked(topic) == expected }).await);
        assert!(broker.abandoned(topic).is_empty());
    }
    assert_eq!(failing.calls(), 2);
    assert_eq!(malformed.calls(), 2);

    consumer.shutdown(WAIT).await.unwrap();
    for topic in ["ok", "failing", "malformed"] {
        assert_eq!(broker.acked(topic).len(), 2);
    }
}

#[tokio::test]
async fn messages_within_a_topic_are_sequential() {
    let broker = Arc::new(InMemoryBroker::new());
    let handler = ScriptedHandler::new("orders").with_delay(Duration::from_millis(20));
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[handler.clone()]));
    consumer.start(&CancellationToken::new()).await.unwrap();

    for id in ["m-1", "m-2", "m-3"] {
        publish(&broker, "orders", id, b"{}").await;
    }

    assert!(eventually(WAIT, || async { broker.acked("orders").len() == 3 }).await);
    assert_eq!(handler.handled_ids(), vec!["m-1", "m-2", "m-3"]);
    assert_eq!(broker.acked("orders"), vec!["m-1", "m-2", "m-3"]);

    consumer.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn slow_topic_does_not_block_other_topics() {
    let broker = Arc::new(InMemoryBroker::new());
    let slow = ScriptedHandler::new("slow").with_delay(Duration::from_secs(5));
    let fast = ScriptedHandler::new("fast");
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[slow.clone(), fast.clone()]));
    consumer.start(&CancellationToken::new()).await.unwrap();

    publish(&broker, "slow", "s-1", b"{}").await;
    slow.started().await;
    publish(&broker, "fast", "f-1", b"{}").await;

    assert!(eventually(WAIT, || async { broker.acked("fast") == vec!["f-1"] }).await);
    assert!(broker.acked("slow").is_empty());

    consumer.shutdown(Duration::from_millis(50)).await.unwrap();
}

#[tokio::test]
async fn receive_errors_do_not_stop_the_loop() {
    let broker = Arc::new(InMemoryBroker::new());
    let handler = ScriptedHandler::new("orders");
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[handler.clone()]));
    consumer.start(&CancellationToken::new()).await.unwrap();

    broker.push_error("orders", BrokerError::Transport("connection reset".into()));
    publish(&broker, "orders", "m-1", b"{}").await;

    assert!(eventually(WAIT, || async { broker.acked("orders") == vec!["m-1"] }).await);
    assert_eq!(consumer.active_loops(), 1);

    consumer.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn loop_exits_when_broker_closes_the_stream() {
    let broker = Arc::new(InMemoryBroker::new());
    let handlers = [ScriptedHandler::new("a"), ScriptedHandler::new("b")];
    let mut consumer = Consumer::new(broker.clone(), registry_with(&handlers));
    consumer.start(&CancellationToken::new()).await.unwrap();

    publish(&broker, "a", "m-1", b"{}").await;
    broker.close_topic("a");

    assert!(eventually(WAIT, || async { consumer.active_loops() == 1 }).await);
    assert_eq!(broker.acked("a"), vec!["m-1"]);
    assert_eq!(consumer.state(), ConsumerState::Running);

    assert_eq!(consumer.shutdown(WAIT).await.unwrap(), ShutdownOutcome::Drained);
}

#[tokio::test]
async fn retry_policy_reruns_retryable_failures_then_acks() {
    let broker = Arc::new(InMemoryBroker::new());
    let flaky =
        ScriptedHandler::new("flaky").failing_times(HandlerError::Store("timeout".into()), 2);
    let broken = ScriptedHandler::new("broken").failing_with(HandlerError::NotFound("abc".into()));
    let policy = RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(5))
        .build();
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[flaky.clone(), broken.clone()]))
        .with_failure_policy(FailurePolicy::Retry(policy));
    consumer.start(&CancellationToken::new()).await.unwrap();

    publish(&broker, "flaky", "f-1", b"{}").await;
    publish(&broker, "broken", "b-1", b"{}").await;

    assert!(eventually(WAIT, || async { broker.acked("flaky") == vec!["f-1"] }).await);
    assert!(eventually(WAIT, || async { broker.acked("broken") == vec!["b-1"] }).await);
    assert_eq!(flaky.handled_ids(), vec!["f-1", "f-1", "f-1"]);
    assert_eq!(broken.calls(), 1);

    consumer.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn at_most_once_policy_never_retries() {
    let broker = Arc::new(InMemoryBroker::new());
    let flaky =
        ScriptedHandler::new("flaky").failing_times(HandlerError::Store("timeout".into()), 1);
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[flaky.clone()]));
    consumer.start(&CancellationToken::new()).await.unwrap();

    publish(&broker, "flaky", "f-1", b"{}").await;

    assert!(eventually(WAIT, || async { broker.acked("flaky") == vec!["f-1"] }).await);
    assert_eq!(flaky.calls(), 1);

    consumer.shutdown(WAIT).await.unwrap();
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn cancelling_the_scope_stops_idle_loops() {
    let broker = Arc::new(InMemoryBroker::new());
    let handlers = [ScriptedHandler::new("A"), ScriptedHandler::new("B")];
    let mut consumer = Consumer::new(broker.clone(), registry_with(&handlers));
    let scope = CancellationToken::new();
    consumer.start(&scope).await.unwrap();
    assert_eq!(consumer.active_loops(), 2);

    scope.cancel();

    assert!(eventually(Duration::from_millis(500), || async { consumer.active_loops() == 0 }).await);
    assert_eq!(consumer.shutdown(WAIT).await.unwrap(), ShutdownOutcome::Drained);
}

#[tokio::test]
async fn short_deadline_returns_in_time_with_slow_handler() {
    init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    let slow = ScriptedHandler::new("slow").with_delay(Duration::from_secs(5));
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[slow.clone()]));
    consumer.start(&CancellationToken::new()).await.unwrap();

    publish(&broker, "slow", "s-1", b"{}").await;
    slow.started().await;

    let started = Instant::now();
    let outcome = consumer.shutdown(Duration::from_millis(100)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(outcome, ShutdownOutcome::TimedOut { pending: 1 });
    assert!(broker.is_closed());
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn generous_deadline_waits_for_in_flight_handler() {
    let broker = Arc::new(InMemoryBroker::new());
    let slow = ScriptedHandler::new("slow").with_delay(Duration::from_millis(200));
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[slow.clone()]));
    consumer.start(&CancellationToken::new()).await.unwrap();

    publish(&broker, "slow", "s-1", b"{}").await;
    slow.started().await;

    let outcome = consumer.shutdown(WAIT).await.unwrap();

    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert_eq!(consumer.active_loops(), 0);
    assert_eq!(slow.handled_ids(), vec!["s-1"]);
    assert_eq!(broker.acked("slow"), vec!["s-1"]);
}

#[tokio::test]
async fn release_failure_is_reported() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_close();
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[ScriptedHandler::new("a")]));
    consumer.start(&CancellationToken::new()).await.unwrap();

    let err = consumer.shutdown(WAIT).await.unwrap_err();

    assert!(matches!(err, ConsumerError::Release(BrokerError::CloseFailed(_))));
    assert_eq!(consumer.state(), ConsumerState::Stopped);
    assert_eq!(consumer.active_loops(), 0);
}

#[tokio::test]
async fn second_shutdown_is_rejected() {
    let broker = Arc::new(InMemoryBroker::new());
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[ScriptedHandler::new("a")]));
    consumer.start(&CancellationToken::new()).await.unwrap();

    consumer.shutdown(WAIT).await.unwrap();
    let err = consumer.shutdown(WAIT).await.unwrap_err();

    assert!(matches!(
        err,
        ConsumerError::InvalidState {
            operation: "shutdown",
            state: ConsumerState::Stopped
        }
    ));
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test]
async fn stopped_consumer_cannot_restart() {
    let broker = Arc::new(InMemoryBroker::new());
    let mut consumer = Consumer::new(broker.clone(), registry_with(&[ScriptedHandler::new("a")]));
    consumer.start(&CancellationToken::new()).await.unwrap();
    consumer.shutdown(WAIT).await.unwrap();

    let err = consumer.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ConsumerError::InvalidState { operation: "start", .. }));
}
