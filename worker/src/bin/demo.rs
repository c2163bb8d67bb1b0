//! In-memory demo of the lifecycle worker.
//!
//! Runs the worker against an in-memory broker, creates a user through the
//! service, waits until the worker has activated it, and shuts down.
//!
//! ```bash
//! cargo run --bin demo
//! ```

use event_worker_core::CancellationToken;
use event_worker_core::environment::SystemClock;
use event_worker_testing::InMemoryBroker;
use event_worker_testing::helpers::eventually;
use lifecycle_worker::{Config, InMemoryUserRepository, NewUser, UserRepository, WorkerApp};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lifecycle_worker=debug,event_worker_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env();
    config.streams.user_lifecycle.enable = true;
    config.publishers.user_lifecycle.enable = true;
    config.publishers.user_lifecycle.topic = config.streams.user_lifecycle.topic.clone();

    let broker = Arc::new(InMemoryBroker::new());
    let repository = Arc::new(InMemoryUserRepository::new());
    let mut app = WorkerApp::new(config, broker, repository.clone(), Arc::new(SystemClock))?;

    let scope = CancellationToken::new();
    app.start(&scope).await?;

    let user = app
        .service()
        .create_user(
            &scope,
            NewUser {
                name: "Ada Lovelace".to_string(),
                description: "demo user".to_string(),
            },
        )
        .await?;
    tracing::info!(uuid = %user.uuid, status = %user.status, "Created user");

    let activated = eventually(Duration::from_secs(5), || {
        let repository = Arc::clone(&repository);
        let uuid = user.uuid.clone();
        async move {
            repository
                .get_by_uuid(&uuid)
                .await
                .is_ok_and(|stored| stored.is_active())
        }
    })
    .await;

    if activated {
        tracing::info!(uuid = %user.uuid, "Worker activated the user");
    } else {
        tracing::warn!(uuid = %user.uuid, "User was not activated in time");
    }

    scope.cancel();
    let outcome = app.shutdown().await?;
    tracing::info!(?outcome, "Demo finished");
    Ok(())
}
