//! User record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Created, waiting for the worker to activate it
    Pending,
    /// Activated
    Active,
    /// Deactivated
    Inactive,
}

impl UserStatus {
    /// Wire representation, as carried in lifecycle events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user record as held by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned identifier (0 until created)
    pub id: u64,
    /// Externally visible identifier
    pub uuid: String,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Lifecycle status
    pub status: UserStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A new pending user that has not been stored yet.
    #[must_use]
    pub fn pending(
        uuid: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            uuid: uuid.into(),
            name: name.into(),
            description: description.into(),
            status: UserStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the user to [`UserStatus::Active`].
    pub const fn mark_as_active(&mut self, now: DateTime<Utc>) {
        self.status = UserStatus::Active;
        self.updated_at = now;
    }

    /// Whether the user has been activated.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, UserStatus::Active)
    }
}
