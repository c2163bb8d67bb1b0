//! # Event Worker Testing
//!
//! Testing utilities for the event worker.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: channel-backed broker client with ack ledgers and failure injection
//! - [`ScriptedHandler`]: handler with scripted delays and failures that records its calls
//! - [`FixedClock`] / [`test_clock`]: deterministic time
//! - [`helpers::eventually`]: polling assertion helper
//! - [`properties`]: proptest strategies
//!
//! ## Example
//!
//! ```ignore
//! use event_worker_runtime::{Consumer, HandlerRegistry};
//! use event_worker_testing::{InMemoryBroker, ScriptedHandler, helpers::eventually};
//!
//! #[tokio::test]
//! async fn acknowledges_every_message() {
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let handler = ScriptedHandler::new("orders");
//!     let mut registry = HandlerRegistry::new();
//!     registry.register(Arc::new(handler.clone())).unwrap();
//!
//!     let mut consumer = Consumer::new(broker.clone(), registry);
//!     consumer.start(&CancellationToken::new()).await.unwrap();
//!     broker.publish("orders", &OutboundMessage::with_id("m-1", vec![])).await.unwrap();
//!
//!     assert!(eventually(Duration::from_secs(1), || async { broker.acked("orders").len() == 1 }).await);
//! }
//! ```

use chrono::{DateTime, Utc};
use event_worker_core::environment::Clock;

mod broker;
mod handler;

pub use broker::InMemoryBroker;
pub use handler::ScriptedHandler;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use event_worker_testing::mocks::FixedClock;
    /// use event_worker_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use std::future::Future;
    use std::time::Duration;

    /// Poll `condition` every 10ms until it holds or `timeout` elapses.
    ///
    /// Returns whether the condition held before the deadline.
    pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::collection::btree_set;
    use proptest::prelude::*;

    /// Between 1 and `max` distinct topic names.
    pub fn topic_names(max: usize) -> impl Strategy<Value = Vec<String>> {
        btree_set("[a-z][a-z0-9-]{0,15}", 1..=max.max(1))
            .prop_map(|topics| topics.into_iter().collect())
    }
}

pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn eventually_reports_deadline() {
        assert!(helpers::eventually(Duration::from_millis(50), || async { true }).await);
        assert!(!helpers::eventually(Duration::from_millis(30), || async { false }).await);
    }

    proptest! {
        #[test]
        fn topic_names_are_distinct(topics in properties::topic_names(6)) {
            let mut sorted = topics.clone();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), topics.len());
            prop_assert!(!topics.is_empty() && topics.len() <= 6);
        }
    }
}
