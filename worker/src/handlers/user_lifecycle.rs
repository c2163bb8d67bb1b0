//! Activates pending users.

use crate::messages::UserLifecycleStream;
use crate::publisher::Publisher;
use crate::repository::UserRepository;
use crate::user::UserStatus;
use async_trait::async_trait;
use event_worker_core::CancellationToken;
use event_worker_core::environment::Clock;
use event_worker_core::handler::{HandlerError, MessageHandler};
use event_worker_core::message::InboundMessage;
use std::sync::Arc;

/// Handler for the user-lifecycle topic.
///
/// A `pending` event loads the user, marks it active, stores it, and emits the
/// activated record through the follow-up publisher. Any other status is ignored.
pub struct UserLifecycleHandler {
    topic: String,
    repository: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
    publisher: Arc<Publisher>,
}

impl UserLifecycleHandler {
    /// Create a handler bound to `topic`.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        repository: Arc<dyn UserRepository>,
        clock: Arc<dyn Clock>,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            topic: topic.into(),
            repository,
            clock,
            publisher,
        }
    }

    async fn activate(&self, uuid: &str) -> Result<(), HandlerError> {
        let mut user = self.repository.get_by_uuid(uuid).await?;
        user.mark_as_active(self.clock.now());
        self.repository.update(&user).await?;
        tracing::info!(uuid = %uuid, user_id = user.id, "User activated");

        // The update is stored and the message will be acked, so the follow-up
        // must go out even if the loop is stopping.
        self.publisher.publish(&CancellationToken::new(), &user).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for UserLifecycleHandler {
    fn topic_name(&self) -> &str {
        &self.topic
    }

    async fn handle(
        &self,
        _scope: &CancellationToken,
        message: &InboundMessage,
    ) -> Result<(), HandlerError> {
        tracing::info!(topic = %self.topic, message_id = %message.id(), "Processing message");

        let event: UserLifecycleStream = serde_json::from_slice(message.payload())
            .map_err(|e| HandlerError::deserialization(message.id(), e))?;

        if event.status != UserStatus::Pending.as_str() {
            tracing::debug!(
                uuid = %event.uuid,
                status = %event.status,
                "Ignoring lifecycle event"
            );
            return Ok(());
        }

        self.activate(&event.uuid).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Toggle;
    use crate::repository::InMemoryUserRepository;
    use crate::user::User;
    use event_worker_testing::{InMemoryBroker, test_clock};

    struct Fixture {
        handler: UserLifecycleHandler,
        repository: Arc<InMemoryUserRepository>,
        broker: InMemoryBroker,
    }

    async fn fixture(publish_follow_up: bool) -> Fixture {
        let repository = Arc::new(InMemoryUserRepository::new());
        let clock = test_clock();
        repository
            .create(User::pending("abc", "Ada", "", clock.now() - chrono::Duration::hours(1)))
            .await
            .unwrap();

        let broker = InMemoryBroker::new();
        let toggle = Toggle {
            enable: publish_follow_up,
            topic: "user-activated".to_string(),
        };
        let publisher = Arc::new(Publisher::from_toggle(
            "user-lifecycle",
            &toggle,
            Arc::new(broker.clone()),
        ));

        Fixture {
            handler: UserLifecycleHandler::new(
                "user-lifecycle",
                repository.clone(),
                Arc::new(clock),
                publisher,
            ),
            repository,
            broker,
        }
    }

    fn message(payload: &[u8]) -> InboundMessage {
        InboundMessage::detached("m-1", "user-lifecycle", payload.to_vec())
    }

    #[tokio::test]
    async fn pending_event_activates_user() {
        let fx = fixture(false).await;

        fx.handler
            .handle(
                &CancellationToken::new(),
                &message(br#"{"uuid":"abc","status":"pending"}"#),
            )
            .await
            .unwrap();

        let user = fx.repository.get_by_uuid("abc").await.unwrap();
        assert!(user.is_active());
        assert_eq!(user.updated_at, test_clock().now());
        assert!(fx.broker.published("user-activated").is_empty());
    }

    #[tokio::test]
    async fn activation_is_emitted_when_publisher_enabled() {
        let fx = fixture(true).await;

        fx.handler
            .handle(
                &CancellationToken::new(),
                &message(br#"{"uuid":"abc","status":"pending"}"#),
            )
            .await
            .unwrap();

        let published = fx.broker.published("user-activated");
        assert_eq!(published.len(), 1);
        let emitted: UserLifecycleStream = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(emitted.status, "active");
        assert_eq!(emitted.uuid, "abc");
    }

    #[tokio::test]
    async fn activation_is_emitted_after_loop_is_cancelled() {
        let fx = fixture(true).await;
        let scope = CancellationToken::new();
        scope.cancel();

        fx.handler
            .handle(&scope, &message(br#"{"uuid":"abc","status":"pending"}"#))
            .await
            .unwrap();

        assert!(fx.repository.get_by_uuid("abc").await.unwrap().is_active());
        assert_eq!(fx.broker.published("user-activated").len(), 1);
    }

    #[tokio::test]
    async fn other_statuses_are_ignored() {
        let fx = fixture(true).await;

        fx.handler
            .handle(
                &CancellationToken::new(),
                &message(br#"{"uuid":"abc","status":"active","name":"Ada"}"#),
            )
            .await
            .unwrap();

        assert!(!fx.repository.get_by_uuid("abc").await.unwrap().is_active());
        assert!(fx.broker.published("user-activated").is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_deserialization_error() {
        let fx = fixture(false).await;

        let err = fx
            .handler
            .handle(&CancellationToken::new(), &message(br#"{"uuid":"ab"#))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Deserialization { ref message_id, .. } if message_id == "m-1"));
        assert!(!fx.repository.get_by_uuid("abc").await.unwrap().is_active());
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let fx = fixture(false).await;

        let err = fx
            .handler
            .handle(
                &CancellationToken::new(),
                &message(br#"{"uuid":"nobody","status":"pending"}"#),
            )
            .await
            .unwrap_err();

        assert_eq!(err, HandlerError::NotFound("nobody".to_string()));
    }
}
