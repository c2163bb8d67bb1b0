//! # Event Worker Runtime
//!
//! The consumption engine for the event worker.
//!
//! ## Core Components
//!
//! - **[`HandlerRegistry`]**: topic name to handler, built once at startup
//! - **[`Consumer`]**: one processing loop per topic, bounded-time shutdown
//! - **[`TaskGroup`]**: cancellation handles plus a shared completion counter
//! - **[`retry`]**: opt-in exponential backoff for retryable handler errors
//! - **[`metrics`]**: consumer metrics through the `metrics` facade
//!
//! ## Example
//!
//! ```ignore
//! use event_worker_runtime::{Consumer, HandlerRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(Arc::new(UserLifecycleHandler::new(repo, publisher, clock)))?;
//!
//! let scope = CancellationToken::new();
//! let mut consumer = Consumer::new(broker, registry);
//! consumer.start(&scope).await?;
//!
//! // ... on shutdown signal
//! consumer.shutdown(Duration::from_secs(10)).await?;
//! ```

/// Per-topic consumption engine
pub mod consumer;

/// Consumer metrics
pub mod metrics;

/// Handler registry
pub mod registry;

/// Retry logic with exponential backoff
pub mod retry;

/// Supervised task group
pub mod task_group;

pub use consumer::{Consumer, ConsumerError, ConsumerState, FailurePolicy, ShutdownOutcome};
pub use registry::{HandlerRegistry, RegistryError};
pub use retry::RetryPolicy;
pub use task_group::TaskGroup;
