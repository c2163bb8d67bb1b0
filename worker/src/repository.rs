//! Record store for users.
//!
//! [`UserRepository`] is the seam handlers and the service depend on.
//! [`InMemoryUserRepository`] is the implementation the binaries ship with.

use crate::user::User;
use async_trait::async_trait;
use event_worker_core::handler::HandlerError;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Record store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// No record with the given uuid
    #[error("User not found: {0}")]
    NotFound(String),

    /// A record with the given uuid already exists
    #[error("User already exists: {0}")]
    Conflict(String),

    /// The store could not complete the operation
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<RecordError> for HandlerError {
    fn from(error: RecordError) -> Self {
        match error {
            RecordError::NotFound(uuid) => Self::NotFound(uuid),
            other @ (RecordError::Conflict(_) | RecordError::Storage(_)) => {
                Self::Store(other.to_string())
            }
        }
    }
}

/// Persistence for [`User`] records.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Store a new user and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// [`RecordError::Conflict`] if the uuid is taken, [`RecordError::Storage`] on store failure.
    async fn create(&self, user: User) -> Result<User, RecordError>;

    /// Load a user by uuid.
    ///
    /// # Errors
    ///
    /// [`RecordError::NotFound`] if absent, [`RecordError::Storage`] on store failure.
    async fn get_by_uuid(&self, uuid: &str) -> Result<User, RecordError>;

    /// Replace a stored user.
    ///
    /// # Errors
    ///
    /// [`RecordError::NotFound`] if absent, [`RecordError::Storage`] on store failure.
    async fn update(&self, user: &User) -> Result<(), RecordError>;
}

#[derive(Debug, Default)]
struct Records {
    next_id: u64,
    by_uuid: HashMap<String, User>,
}

/// In-memory [`UserRepository`].
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    records: RwLock<Records>,
}

impl InMemoryUserRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.records.read().await.by_uuid.len()
    }

    /// Whether no user is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, mut user: User) -> Result<User, RecordError> {
        let mut records = self.records.write().await;
        if records.by_uuid.contains_key(&user.uuid) {
            return Err(RecordError::Conflict(user.uuid));
        }
        records.next_id += 1;
        user.id = records.next_id;
        records.by_uuid.insert(user.uuid.clone(), user.clone());
        Ok(user)
    }

    async fn get_by_uuid(&self, uuid: &str) -> Result<User, RecordError> {
        self.records
            .read()
            .await
            .by_uuid
            .get(uuid)
            .cloned()
            .ok_or_else(|| RecordError::NotFound(uuid.to_string()))
    }

    async fn update(&self, user: &User) -> Result<(), RecordError> {
        let mut records = self.records.write().await;
        let stored = records
            .by_uuid
            .get_mut(&user.uuid)
            .ok_or_else(|| RecordError::NotFound(user.uuid.clone()))?;
        *stored = User {
            id: stored.id,
            ..user.clone()
        };
        Ok(())
    }
}
