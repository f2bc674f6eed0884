//! Serve command handler
//!
//! Handles the serve command including dry-run validation and engine startup.

use crate::config::StorageBackend;
use crate::config::settings::Settings;
use crate::error::AppResult;
use crate::server::Server;

/// Handler for the serve command
pub struct ServeCommandHandler {
    config: Settings,
}

impl ServeCommandHandler {
    /// Create a new serve command handler
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Execute the serve command with optional dry-run support
    ///
    /// # Errors
    /// - Configuration validation errors
    /// - Store, queue or scheduler startup errors (if not dry-run)
    pub async fn execute(&self, dry_run: bool) -> AppResult<()> {
        if dry_run {
            return self.validate_only();
        }

        self.config.validate()?;
        Server::new(self.config.clone()).run().await?;
        Ok(())
    }

    /// Validate configuration and print what `serve` would start
    pub fn validate_only(&self) -> AppResult<()> {
        self.config.validate()?;

        println!("✓ Configuration is valid");
        for line in self.summary() {
            println!("✓ {}", line);
        }
        println!("Dry run completed successfully - configuration is ready for deployment");
        Ok(())
    }

    /// One line per component `serve` would build
    pub fn summary(&self) -> Vec<String> {
        let settings = &self.config;
        let storage = match settings.database.backend {
            StorageBackend::Postgres => format!(
                "Storage: PostgreSQL (pool {}..{}, auto-migrate {})",
                settings.database.min_connections,
                settings.database.max_connections,
                settings.database.auto_migrate
            ),
            StorageBackend::Memory => "Storage: in-memory (not persisted)".to_string(),
        };
        let scheduler = if settings.scheduler.enabled {
            format!("Scheduler: tick every {}s", settings.scheduler.tick_seconds)
        } else {
            "Scheduler: disabled".to_string()
        };
        let queue = if settings.queue.enabled {
            format!(
                "Queue: Redis at {} (prefix '{}', batch {})",
                settings.queue.url, settings.queue.key_prefix, settings.queue.batch_size
            )
        } else {
            "Queue: disabled, executions run locally".to_string()
        };
        let notifications = format!(
            "Notifications: broadcast capacity {}, log events {}, {} webhook(s)",
            settings.notifications.broadcast_capacity,
            settings.notifications.log_events,
            settings.notifications.webhooks.len()
        );

        vec![storage, scheduler, queue, notifications]
    }

    /// Get the configuration
    pub fn config(&self) -> &Settings {
        &self.config
    }
}
