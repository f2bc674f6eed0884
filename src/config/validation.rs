//! Configuration validation logic
//!
//! This module provides validation methods for all configuration structures
//! to ensure configuration values are within acceptable ranges and formats.

use crate::config::error::ConfigError;
use crate::config::settings::{
    DatabaseConfig, ExecutorConfig, FileSettings, LoggerSettings, NotificationsConfig,
    QueueConfig, SchedulerConfig, Settings, StorageBackend,
};

/// Valid log levels
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid log formats
const VALID_LOG_FORMATS: &[&str] = &["full", "compact", "json"];

/// Bounds for the scheduler tick
pub const MIN_TICK_SECONDS: u64 = 1;
pub const MAX_TICK_SECONDS: u64 = 60;

impl DatabaseConfig {
    /// Validate database configuration
    ///
    /// # Validation Rules
    /// - With the postgres backend the URL must be a postgres URL
    /// - Max and min connections must be greater than 0
    /// - Min connections must not exceed max connections
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == StorageBackend::Memory {
            return Ok(());
        }

        if self.url.is_empty() {
            return Err(ConfigError::validation(
                "database.url",
                "Database URL is required. Please specify a valid database connection string.",
            ));
        }

        if !self.is_valid_database_url() {
            return Err(ConfigError::validation(
                "database.url",
                "Invalid database URL format. Expected format: postgres://[user:password@]host[:port]/database",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "database.max_connections",
                "Max connections must be greater than 0.",
            ));
        }

        if self.min_connections == 0 {
            return Err(ConfigError::validation(
                "database.min_connections",
                "Min connections must be greater than 0.",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::validation(
                "database.min_connections",
                format!(
                    "Min connections ({}) cannot exceed max connections ({}).",
                    self.min_connections, self.max_connections
                ),
            ));
        }

        if self.connection_timeout == 0 {
            return Err(ConfigError::validation(
                "database.connection_timeout",
                "Connection timeout must be greater than 0 seconds.",
            ));
        }

        Ok(())
    }

    fn is_valid_database_url(&self) -> bool {
        ["postgres://", "postgresql://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme))
    }
}

impl FileSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path is required when file logging is enabled.",
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.file.format",
                format!(
                    "Invalid log format '{}'. Valid formats are: {}",
                    self.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            ));
        }

        if self.enabled && self.max_size > 0 && self.max_files == 0 {
            return Err(ConfigError::validation(
                "logger.file.max_files",
                "At least one rolled-over file must be kept when max_size is set.",
            ));
        }

        Ok(())
    }
}

impl LoggerSettings {
    /// Validate logger settings
    ///
    /// # Validation Rules
    /// - Log level must be one of: trace, debug, info, warn, error
    /// - If file logging is enabled, path must not be empty
    /// - Log format must be one of: full, compact, json
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.level",
                format!(
                    "Invalid log level '{}'. Valid levels are: {}",
                    self.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }

        if !self.console.enabled && !self.file.enabled {
            return Err(ConfigError::validation(
                "logger",
                "At least one output (console or file) must be enabled.",
            ));
        }

        self.file.validate()
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_TICK_SECONDS..=MAX_TICK_SECONDS).contains(&self.tick_seconds) {
            return Err(ConfigError::validation(
                "scheduler.tick_seconds",
                format!(
                    "Tick interval must be between {} and {} seconds, got {}.",
                    MIN_TICK_SECONDS, MAX_TICK_SECONDS, self.tick_seconds
                ),
            ));
        }
        Ok(())
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("executor.shell", &self.shell),
            ("executor.node", &self.node),
            ("executor.python", &self.python),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::validation(field, "Interpreter must not be empty."));
            }
        }

        if self.max_log_bytes == 0 {
            return Err(ConfigError::validation(
                "executor.max_log_bytes",
                "Captured output limit must be greater than 0.",
            ));
        }

        if self.history_retention_days == 0 {
            return Err(ConfigError::validation(
                "executor.history_retention_days",
                "History retention must be at least one day.",
            ));
        }

        Ok(())
    }
}

impl QueueConfig {
    /// Only checked when the queue is enabled
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(ConfigError::validation(
                "queue.url",
                "Invalid Redis URL format. Expected format: redis://[user:password@]host[:port][/db]",
            ));
        }

        if self.pool_size == 0 {
            return Err(ConfigError::validation(
                "queue.pool_size",
                "Pool size must be greater than 0.",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::validation(
                "queue.poll_interval_ms",
                "Poll interval must be greater than 0 milliseconds.",
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::validation(
                "queue.batch_size",
                "Batch size must be greater than 0.",
            ));
        }

        if self.key_prefix.trim().is_empty() {
            return Err(ConfigError::validation(
                "queue.key_prefix",
                "Key prefix must not be empty.",
            ));
        }

        Ok(())
    }
}

impl NotificationsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::validation(
                "notifications.broadcast_capacity",
                "Broadcast capacity must be greater than 0.",
            ));
        }

        for (index, hook) in self.webhooks.iter().enumerate() {
            if !hook.url.starts_with("http://") && !hook.url.starts_with("https://") {
                return Err(ConfigError::validation(
                    format!("notifications.webhooks[{}].url", index),
                    format!("Webhook URL must be http(s), got '{}'.", hook.url),
                ));
            }
            if hook.timeout_seconds == 0 {
                return Err(ConfigError::validation(
                    format!("notifications.webhooks[{}].timeout_seconds", index),
                    "Webhook timeout must be greater than 0 seconds.",
                ));
            }
        }

        Ok(())
    }
}

impl Settings {
    /// Validate all configuration settings
    ///
    /// This method validates all sub-configurations and returns the first
    /// validation error encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.logger.validate()?;
        self.scheduler.validate()?;
        self.executor.validate()?;
        self.queue.validate()?;
        self.notifications.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{ConsoleSettings, WebhookSettings};
    use std::collections::HashMap;

    fn field_of(err: ConfigError) -> String {
        err.field().map(str::to_string).unwrap_or_default()
    }

    #[test]
    fn test_memory_backend_needs_no_url() {
        let config = DatabaseConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_backend_requires_url() {
        let err = DatabaseConfig::default().validate().unwrap_err();
        assert_eq!(field_of(err), "database.url");

        let config = DatabaseConfig {
            url: "mysql://localhost/db".to_string(),
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "database.url");
    }

    #[test]
    fn test_database_config_min_exceeds_max() {
        let config = DatabaseConfig {
            url: "postgres://localhost/test".to_string(),
            max_connections: 5,
            min_connections: 10,
            ..Default::default()
        };
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "database.min_connections"
        );
    }

    #[test]
    fn test_logger_settings_levels() {
        for level in ["trace", "debug", "info", "warn", "error", "INFO"] {
            let settings = LoggerSettings {
                level: level.to_string(),
                ..Default::default()
            };
            assert!(settings.validate().is_ok(), "Level should be valid: {}", level);
        }

        let settings = LoggerSettings {
            level: "verbose".to_string(),
            ..Default::default()
        };
        assert_eq!(field_of(settings.validate().unwrap_err()), "logger.level");
    }

    #[test]
    fn test_logger_requires_an_output() {
        let settings = LoggerSettings {
            console: ConsoleSettings {
                enabled: false,
                colored: false,
            },
            ..Default::default()
        };
        assert_eq!(field_of(settings.validate().unwrap_err()), "logger");
    }

    #[test]
    fn test_scheduler_tick_bounds() {
        for tick_seconds in [1, 30, 60] {
            let config = SchedulerConfig {
                enabled: true,
                tick_seconds,
            };
            assert!(config.validate().is_ok());
        }
        for tick_seconds in [0, 61, 3600] {
            let config = SchedulerConfig {
                enabled: true,
                tick_seconds,
            };
            assert_eq!(
                field_of(config.validate().unwrap_err()),
                "scheduler.tick_seconds"
            );
        }
    }

    #[test]
    fn test_executor_rejects_empty_interpreter() {
        let config = ExecutorConfig {
            python: " ".to_string(),
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "executor.python");
    }

    #[test]
    fn test_disabled_queue_is_not_checked() {
        let config = QueueConfig {
            url: "not-a-url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = QueueConfig {
            enabled: true,
            ..config
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "queue.url");
    }

    #[test]
    fn test_webhook_url_validation() {
        let config = NotificationsConfig {
            webhooks: vec![WebhookSettings {
                url: "ftp://example.com".to_string(),
                timeout_seconds: 5,
                headers: HashMap::new(),
            }],
            ..Default::default()
        };
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "notifications.webhooks[0].url"
        );
    }

    #[test]
    fn test_settings_validate_memory_defaults() {
        let mut settings = Settings::default();
        settings.database.backend = StorageBackend::Memory;
        assert!(settings.validate().is_ok());
    }
}
