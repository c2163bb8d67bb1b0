//! Message handlers and registry assembly.
//!
//! Each enabled stream in [`StreamsConfig`] contributes one handler bound to
//! the configured topic. Disabled streams are never registered, so the engine
//! never subscribes to them.

mod order_events;
mod user_lifecycle;

pub use order_events::OrderEventsHandler;
pub use user_lifecycle::UserLifecycleHandler;

use crate::config::StreamsConfig;
use crate::publisher::Publisher;
use crate::repository::UserRepository;
use event_worker_core::environment::Clock;
use event_worker_runtime::{HandlerRegistry, RegistryError};
use std::sync::Arc;

/// Shared dependencies handed to every handler.
#[derive(Clone)]
pub struct HandlerDependencies {
    /// User record store
    pub repository: Arc<dyn UserRepository>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Follow-up publisher for user lifecycle events
    pub user_lifecycle_publisher: Arc<Publisher>,
}

/// Register one handler per enabled stream.
///
/// # Errors
///
/// [`RegistryError::DuplicateTopic`] if two enabled streams name the same topic.
pub fn build_registry(
    streams: &StreamsConfig,
    deps: &HandlerDependencies,
) -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();

    if streams.user_lifecycle.enable {
        registry.register(Arc::new(UserLifecycleHandler::new(
            streams.user_lifecycle.topic.clone(),
            Arc::clone(&deps.repository),
            Arc::clone(&deps.clock),
            Arc::clone(&deps.user_lifecycle_publisher),
        )))?;
    }

    if streams.order_events.enable {
        registry.register(Arc::new(OrderEventsHandler::new(
            streams.order_events.topic.clone(),
        )))?;
    }

    Ok(registry)
}
