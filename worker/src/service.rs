//! User service: creates users and announces them on the lifecycle topic.

use crate::publisher::{PublishError, Publisher};
use crate::repository::{RecordError, UserRepository};
use crate::user::User;
use event_worker_core::CancellationToken;
use event_worker_core::environment::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Request to create a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

/// Errors from [`UserService`].
#[derive(Error, Debug)]
pub enum ServiceError {
    /// No user with the given uuid
    #[error("User not found: {0}")]
    NotFound(String),

    /// The record store failed
    #[error("Record store failure: {0}")]
    Store(#[source] RecordError),

    /// The user was stored but the lifecycle event could not be published
    #[error("Failed to publish user event: {0}")]
    Publish(#[from] PublishError),
}

/// Application service over the user record store.
#[derive(Clone)]
pub struct UserService {
    repository: Arc<dyn UserRepository>,
    publisher: Arc<Publisher>,
    clock: Arc<dyn Clock>,
}

impl UserService {
    /// Create a service.
    #[must_use]
    pub fn new(
        repository: Arc<dyn UserRepository>,
        publisher: Arc<Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock,
        }
    }

    /// Store a pending user under a fresh uuid and publish it.
    ///
    /// The worker picks the event up and activates the user.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Store`] if the user cannot be stored
    /// - [`ServiceError::Publish`] if the lifecycle event cannot be sent
    pub async fn create_user(
        &self,
        scope: &CancellationToken,
        request: NewUser,
    ) -> Result<User, ServiceError> {
        let pending = User::pending(
            Uuid::new_v4().to_string(),
            request.name,
            request.description,
            self.clock.now(),
        );

        let user = self.repository.create(pending).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to store user");
            ServiceError::Store(e)
        })?;

        self.publisher.publish(scope, &user).await?;

        tracing::info!(uuid = %user.uuid, user_id = user.id, "User created");
        Ok(user)
    }

    /// Look a user up by uuid.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if there is no such user
    /// - [`ServiceError::Store`] if the lookup fails
    pub async fn fetch_user(&self, uuid: &str) -> Result<User, ServiceError> {
        match self.repository.get_by_uuid(uuid).await {
            Ok(user) => Ok(user),
            Err(RecordError::NotFound(_)) => {
                tracing::warn!(uuid = %uuid, "User not found");
                Err(ServiceError::NotFound(uuid.to_string()))
            }
            Err(e) => {
                tracing::error!(uuid = %uuid, error = %e, "Failed to load user");
                Err(ServiceError::Store(e))
            }
        }
    }
}
