//! Application state shared by the long-running parts of `serve`.
//!
//! Contains the stores, the execution engine, the services built on it,
//! the scheduler and the optional queue worker.

use std::sync::Arc;

use crate::config::{Settings, StorageBackend};
use crate::db::{establish_async_connection_pool, run_pending_migrations};
use crate::error::AppResult;
use crate::jobs::executor::ExecutionEngine;
use crate::jobs::queue::{QueueAdapter, RedisQueue};
use crate::jobs::registry::InternalTaskRegistry;
use crate::jobs::scheduler::Scheduler;
use crate::jobs::worker::QueueWorker;
use crate::notifications::NotificationHub;
use crate::repositories::Stores;
use crate::services::Services;

/// Application state containing all shared services and resources.
///
/// Cloning is cheap since every member is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub engine: ExecutionEngine,
    /// All business logic services
    pub services: Services,
    pub scheduler: Arc<Scheduler>,
    /// Present only when the durable queue is enabled and reachable
    pub worker: Option<Arc<QueueWorker>>,
}

impl AppState {
    /// Builds every component from the settings.
    ///
    /// An unreachable queue is logged and left out; submissions then run
    /// locally.
    pub async fn build(settings: &Settings) -> AppResult<Self> {
        let stores = open_stores(settings).await?;
        let notifier = NotificationHub::from_config(&settings.notifications);
        let queue = connect_queue(settings).await;

        let engine = ExecutionEngine::builder(stores.clone())
            .notifier(notifier)
            .registry(InternalTaskRegistry::builtin())
            .queue(queue.clone())
            .config(settings.executor.clone())
            .build();

        let worker = queue.map(|queue| Arc::new(QueueWorker::new(queue, engine.clone(), &settings.queue)));
        let scheduler = Arc::new(Scheduler::new(engine.clone(), settings.scheduler.clone()));
        let services = Services::new(engine.clone());

        Ok(Self {
            stores,
            engine,
            services,
            scheduler,
            worker,
        })
    }

    /// State over in-memory stores with no queue
    pub fn in_memory(settings: &Settings) -> Self {
        let stores = Stores::memory();
        let engine = ExecutionEngine::builder(stores.clone())
            .notifier(NotificationHub::from_config(&settings.notifications))
            .config(settings.executor.clone())
            .build();

        Self {
            scheduler: Arc::new(Scheduler::new(engine.clone(), settings.scheduler.clone())),
            services: Services::new(engine.clone()),
            stores,
            engine,
            worker: None,
        }
    }
}

async fn open_stores(settings: &Settings) -> AppResult<Stores> {
    match settings.database.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            Ok(Stores::memory())
        }
        StorageBackend::Postgres => {
            if settings.database.auto_migrate {
                let applied = run_pending_migrations(settings.database.url.clone()).await?;
                tracing::info!(count = applied.len(), migrations = ?applied, "Database migrations applied");
            }

            tracing::info!("Initializing database connection pool...");
            let pool = establish_async_connection_pool(&settings.database).await?;
            tracing::info!("Database connection pool initialized");
            Ok(Stores::postgres(pool))
        }
    }
}

async fn connect_queue(settings: &Settings) -> Option<Arc<dyn QueueAdapter>> {
    if !settings.queue.enabled {
        tracing::info!("Durable queue disabled, executions run locally");
        return None;
    }

    match RedisQueue::connect(&settings.queue).await {
        Ok(queue) => {
            let health = queue.health().await;
            if health.healthy {
                tracing::info!(latency_ms = health.latency_ms, "Durable queue connected");
            } else {
                tracing::warn!(
                    error = health.error.as_deref().unwrap_or("unknown"),
                    "Durable queue unhealthy, enqueue failures will fall back to local execution"
                );
            }
            Some(Arc::new(queue))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Durable queue unavailable, executions run locally");
            None
        }
    }
}
