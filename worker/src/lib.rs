//! # Lifecycle Worker
//!
//! Consumes user lifecycle events from Kafka/Redpanda and activates pending
//! users. Built on the event worker crates:
//!
//! - [`config`]: environment-driven configuration
//! - [`user`] / [`repository`]: the user record and its store
//! - [`messages`]: payloads of the inbound streams
//! - [`handlers`]: per-topic handlers and registry assembly
//! - [`publisher`]: toggle-controlled outbound publisher
//! - [`service`]: user creation and lookup
//! - [`app`]: startup, signal handling and bounded shutdown
//!
//! ## Flow
//!
//! ```text
//! UserService::create_user ──publish──▶ user-lifecycle ──▶ UserLifecycleHandler
//!        │                                                      │
//!        └──────────── store (pending) ◀──── mark active ───────┘
//! ```

pub mod app;
pub mod config;
pub mod handlers;
pub mod messages;
pub mod publisher;
pub mod repository;
pub mod service;
pub mod user;

pub use app::{AppError, WorkerApp, shutdown_signal};
pub use config::Config;
pub use handlers::{HandlerDependencies, OrderEventsHandler, UserLifecycleHandler, build_registry};
pub use publisher::{PublishError, Publisher};
pub use repository::{InMemoryUserRepository, RecordError, UserRepository};
pub use service::{NewUser, ServiceError, UserService};
pub use user::{User, UserStatus};
