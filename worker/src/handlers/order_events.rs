//! Order events stub.

use crate::messages::OrderEvent;
use async_trait::async_trait;
use event_worker_core::CancellationToken;
use event_worker_core::handler::{HandlerError, MessageHandler};
use event_worker_core::message::InboundMessage;

/// Decodes order events and logs them. No record is touched.
#[derive(Debug, Clone)]
pub struct OrderEventsHandler {
    topic: String,
}

impl OrderEventsHandler {
    /// Create a handler bound to `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for OrderEventsHandler {
    fn topic_name(&self) -> &str {
        &self.topic
    }

    async fn handle(
        &self,
        _scope: &CancellationToken,
        message: &InboundMessage,
    ) -> Result<(), HandlerError> {
        let event: OrderEvent = serde_json::from_slice(message.payload())
            .map_err(|e| HandlerError::deserialization(message.id(), e))?;

        tracing::info!(
            topic = %self.topic,
            message_id = %message.id(),
            order_id = %event.order_id,
            status = %event.status,
            "Order event received"
        );
        Ok(())
    }
}
