//! Server module for managing the scheduler service lifecycle
//!
//! This module handles component initialization, startup, and graceful shutdown.

use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::settings::Settings;
use crate::state::AppState;

/// Long-running scheduler and worker process
pub struct Server {
    settings: Settings,
}

impl Server {
    /// Create a new server with the given settings
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Start the scheduler and queue worker and run until a shutdown signal
    ///
    /// # Errors
    /// - Store or connection pool initialization errors
    /// - Scheduler startup errors
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            app_name = %self.settings.application.name,
            app_version = %self.settings.application.version,
            environment = %self.settings.application.environment,
            "Application starting"
        );

        tracing::info!(
            backend = ?self.settings.database.backend,
            max_connections = %self.settings.database.max_connections,
            auto_migrate = %self.settings.database.auto_migrate,
            "Database configuration loaded"
        );

        tracing::info!(
            scheduler_enabled = %self.settings.scheduler.enabled,
            tick_seconds = %self.settings.scheduler.tick_seconds,
            queue_enabled = %self.settings.queue.enabled,
            webhooks = self.settings.notifications.webhooks.len(),
            "Engine configuration loaded"
        );

        let state = AppState::build(&self.settings).await?;
        tracing::info!(
            sinks = ?state.engine.notifier().sink_names(),
            internal_tasks = ?state.engine.registry().describe().iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            "Application state created"
        );

        if self.settings.scheduler.enabled {
            state.scheduler.start().await?;
        } else {
            tracing::warn!("Scheduler disabled; only manual submissions will run");
        }

        let shutdown = CancellationToken::new();
        let worker_handle = state.worker.clone().map(|worker| {
            let token = shutdown.clone();
            tokio::spawn(async move { worker.run(token).await })
        });

        shutdown_signal().await;

        state.scheduler.stop().await?;
        shutdown.cancel();
        if let Some(handle) = worker_handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Queue worker task failed");
        }

        let running = state.engine.running();
        if !running.is_empty() {
            tracing::warn!(count = running.len(), "Shutting down with executions still running");
        }

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
