//! Migrate command handler
//!
//! Applies, previews or reverts the embedded schema migrations for the
//! jobs, executions and schedules tables.

use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::MigrationHarness;

use crate::config::StorageBackend;
use crate::config::settings::Settings;
use crate::db::MIGRATIONS;
use crate::error::{AppError, AppResult};

/// Handler for the migrate command
pub struct MigrateCommandHandler {
    config: Settings,
}

impl MigrateCommandHandler {
    /// Create a new migrate command handler
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Execute the migrate command with dry-run and rollback support
    ///
    /// # Errors
    /// - Database connection errors
    /// - Migration execution errors
    /// - Configuration validation errors, including the in-memory backend
    pub async fn execute(&self, dry_run: bool, rollback: Option<u32>) -> AppResult<()> {
        if self.config.database.backend == StorageBackend::Memory {
            return Err(AppError::Validation {
                field: "database.backend".to_string(),
                reason: "The in-memory backend has no schema to migrate".to_string(),
            });
        }
        if rollback == Some(0) {
            return Err(AppError::Validation {
                field: "rollback_steps".to_string(),
                reason: "Number of rollback steps must be greater than 0".to_string(),
            });
        }
        self.config.database.validate()?;

        match (dry_run, rollback) {
            (true, _) => self.show_pending_migrations().await,
            (false, Some(steps)) => self.rollback_migrations(steps).await,
            (false, None) => self.run_migrations().await,
        }
    }

    async fn show_pending_migrations(&self) -> AppResult<()> {
        println!("Checking for pending migrations...");

        let pending = self
            .with_connection("check pending migrations", |conn| {
                conn.pending_migrations(MIGRATIONS)
                    .map(|pending| pending.iter().map(|m| m.name().to_string()).collect::<Vec<_>>())
            })
            .await?;

        if pending.is_empty() {
            println!("✓ No pending migrations found - database is up to date");
        } else {
            println!("Found {} pending migration(s):", pending.len());
            for name in &pending {
                println!("  - {}", name);
            }
            println!("\nRun without --dry-run to apply these migrations");
        }

        Ok(())
    }

    async fn run_migrations(&self) -> AppResult<()> {
        println!("Running database migrations...");

        let applied = self
            .with_connection("run pending migrations", |conn| {
                conn.run_pending_migrations(MIGRATIONS)
                    .map(|applied| applied.iter().map(|m| m.to_string()).collect::<Vec<_>>())
            })
            .await?;

        if applied.is_empty() {
            println!("✓ No migrations to apply - database is already up to date");
        } else {
            println!("✓ Applied {} migration(s):", applied.len());
            for migration in &applied {
                println!("  - {}", migration);
            }
        }

        Ok(())
    }

    async fn rollback_migrations(&self, steps: u32) -> AppResult<()> {
        println!("Rolling back {} migration(s)...", steps);

        let applied_count = self
            .with_connection("get applied migrations", |conn| {
                conn.applied_migrations().map(|applied| applied.len())
            })
            .await?;
        if applied_count < steps as usize {
            return Err(AppError::Validation {
                field: "rollback_steps".to_string(),
                reason: format!(
                    "Cannot rollback {} migrations - only {} applied migrations available",
                    steps, applied_count
                ),
            });
        }

        let reverted = self
            .with_connection("revert migration", move |conn| {
                let mut reverted = Vec::with_capacity(steps as usize);
                for _ in 0..steps {
                    reverted.push(conn.revert_last_migration(MIGRATIONS)?.to_string());
                }
                Ok(reverted)
            })
            .await?;

        println!("✓ Rolled back {} migration(s):", reverted.len());
        for migration in &reverted {
            println!("  - {}", migration);
        }

        Ok(())
    }

    /// Run `f` on a blocking PostgreSQL connection
    async fn with_connection<T, F>(&self, operation: &'static str, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> diesel::migration::Result<T> + Send + 'static,
    {
        let database_url = self.config.database.url.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = PgConnection::establish(&database_url).map_err(|e| AppError::Database {
                operation: format!("establish connection to {}", operation),
                source: anyhow::anyhow!("Connection error: {}", e),
            })?;

            f(&mut conn).map_err(|e| AppError::Database {
                operation: operation.to_string(),
                source: anyhow::anyhow!("Migration error: {}", e),
            })
        })
        .await
        .map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?
    }

    /// Get the configuration
    pub fn config(&self) -> &Settings {
        &self.config
    }
}
