//! Payloads of the inbound streams.
//!
//! Unknown fields are ignored, so a published [`User`](crate::user::User)
//! decodes as a [`UserLifecycleStream`].

use serde::{Deserialize, Serialize};

/// Event on the user-lifecycle topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLifecycleStream {
    /// User the event refers to
    pub uuid: String,
    /// Lifecycle status carried by the event (`pending`, `active`, ...)
    pub status: String,
}

/// Event on the order-events topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Order the event refers to
    pub order_id: String,
    /// Order status
    pub status: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::user::User;
    use event_worker_core::environment::Clock;
    use event_worker_testing::test_clock;

    #[test]
    fn published_user_decodes_as_lifecycle_event() {
        let user = User::pending("abc", "Ada", "first user", test_clock().now());
        let bytes = serde_json::to_vec(&user).unwrap();

        let event: UserLifecycleStream = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            event,
            UserLifecycleStream {
                uuid: "abc".to_string(),
                status: "pending".to_string(),
            }
        );
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(serde_json::from_slice::<UserLifecycleStream>(br#"{"uuid":"abc"}"#).is_err());
        assert!(serde_json::from_slice::<OrderEvent>(br#"{"status":"paid"}"#).is_err());
    }
}
