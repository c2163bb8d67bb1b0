//! Handler registry: one handler per topic, built once at startup.

use event_worker_core::handler::MessageHandler;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while populating the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A handler is already bound to this topic
    #[error("A handler is already registered for topic '{0}'")]
    DuplicateTopic(String),
}

/// Mapping from topic name to the handler bound to it.
///
/// Iteration is ordered by topic name, so subscription order is
/// deterministic. The registry has no topic-specific logic: supplying a new
/// [`MessageHandler`] is all it takes to consume another topic.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to the topic it reports.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTopic`] if the topic already has a handler.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) -> Result<(), RegistryError> {
        let topic = handler.topic_name().to_string();
        if self.handlers.contains_key(&topic) {
            return Err(RegistryError::DuplicateTopic(topic));
        }

        tracing::info!(topic = %topic, "Registered handler");
        self.handlers.insert(topic, handler);
        Ok(())
    }

    /// Handler bound to `topic`, if any.
    #[must_use]
    pub fn get(&self, topic: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.get(topic)
    }

    /// Registered topics in subscription order.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// `(topic, handler)` pairs in subscription order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn MessageHandler>)> {
        self.handlers.iter().map(|(topic, handler)| (topic.as_str(), handler))
    }

    /// Number of registered topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("topics", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
