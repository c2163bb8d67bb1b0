//! Application lifecycle management and graceful shutdown.
//!
//! [`WorkerApp`] wires configuration, record store, publishers, handlers and
//! the consumption engine together, and drives them through
//! start → wait for signal → cancel → bounded shutdown.
//!
//! # Example
//!
//! ```rust,ignore
//! let broker = Arc::new(RedpandaBroker::builder().brokers(&config.kafka.broker).build()?);
//! let app = WorkerApp::new(config, broker, Arc::new(InMemoryUserRepository::new()), Arc::new(SystemClock))?;
//! app.run().await?;
//! ```

use crate::config::Config;
use crate::handlers::{HandlerDependencies, build_registry};
use crate::publisher::Publisher;
use crate::repository::UserRepository;
use crate::service::UserService;
use event_worker_core::CancellationToken;
use event_worker_core::broker::MessageBroker;
use event_worker_core::environment::Clock;
use event_worker_runtime::{Consumer, ConsumerError, RegistryError, ShutdownOutcome};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors that stop the worker.
#[derive(Error, Debug)]
pub enum AppError {
    /// Handler registration failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The consumption engine failed to start or stop
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

/// The lifecycle worker.
pub struct WorkerApp {
    config: Config,
    consumer: Consumer,
    service: UserService,
}

impl WorkerApp {
    /// Build publishers, handlers, the engine and the user service.
    ///
    /// # Errors
    ///
    /// [`AppError::Registry`] if two enabled streams share a topic.
    pub fn new(
        config: Config,
        broker: Arc<dyn MessageBroker>,
        repository: Arc<dyn UserRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let user_lifecycle_publisher = Arc::new(Publisher::from_toggle(
            "user-lifecycle",
            &config.publishers.user_lifecycle,
            Arc::clone(&broker),
        ));

        let deps = HandlerDependencies {
            repository: Arc::clone(&repository),
            clock: Arc::clone(&clock),
            user_lifecycle_publisher: Arc::clone(&user_lifecycle_publisher),
        };
        let registry = build_registry(&config.streams, &deps)?;

        let consumer =
            Consumer::new(broker, registry).with_failure_policy(config.consumer.failure_policy());
        let service = UserService::new(repository, user_lifecycle_publisher, clock);

        Ok(Self {
            config,
            consumer,
            service,
        })
    }

    /// Loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The consumption engine.
    #[must_use]
    pub const fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    /// The user service, sharing the worker's store and publisher.
    #[must_use]
    pub const fn service(&self) -> &UserService {
        &self.service
    }

    /// Start one processing loop per enabled stream under `scope`.
    ///
    /// # Errors
    ///
    /// [`AppError::Consumer`] if a subscription fails. Call
    /// [`shutdown`](Self::shutdown) afterwards to release the broker.
    pub async fn start(&mut self, scope: &CancellationToken) -> Result<(), AppError> {
        self.consumer.start(scope).await?;
        tracing::info!(
            topics = ?self.consumer.topics().collect::<Vec<_>>(),
            "Worker started"
        );
        Ok(())
    }

    /// Stop every loop within `SHUTDOWN_TIMEOUT` and release the broker.
    ///
    /// # Errors
    ///
    /// [`AppError::Consumer`] if the broker fails to close or shutdown was
    /// already requested.
    pub async fn shutdown(&mut self) -> Result<ShutdownOutcome, AppError> {
        let outcome = self
            .consumer
            .shutdown(self.config.consumer.shutdown_timeout())
            .await?;

        match outcome {
            ShutdownOutcome::Drained => tracing::info!("Graceful shutdown complete"),
            ShutdownOutcome::TimedOut { pending } => {
                tracing::warn!(pending, "Shutdown deadline elapsed with loops still running");
            }
        }
        Ok(outcome)
    }

    /// Run until Ctrl+C or SIGTERM, then shut down.
    ///
    /// # Errors
    ///
    /// See [`run_until`](Self::run_until).
    pub async fn run(self) -> Result<ShutdownOutcome, AppError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes, then cancel and shut down.
    ///
    /// A failed start still shuts down so broker resources are released
    /// before the start error is returned.
    ///
    /// # Errors
    ///
    /// The start error, or the shutdown error if start succeeded.
    pub async fn run_until<S>(mut self, signal: S) -> Result<ShutdownOutcome, AppError>
    where
        S: Future<Output = ()>,
    {
        let scope = CancellationToken::new();

        if let Err(start_error) = self.start(&scope).await {
            tracing::error!(error = %start_error, "Worker failed to start");
            scope.cancel();
            if let Err(shutdown_error) = self.shutdown().await {
                tracing::warn!(error = %shutdown_error, "Shutdown after failed start also failed");
            }
            return Err(start_error);
        }

        tracing::info!("Press Ctrl+C to shutdown");
        signal.await;

        tracing::info!("Shutdown signal received");
        scope.cancel();
        self.shutdown().await
    }
}

impl std::fmt::Debug for WorkerApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerApp")
            .field("config", &self.config)
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

/// Resolve on Ctrl+C, or on SIGTERM where supported.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
