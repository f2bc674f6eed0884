//! Configuration merger for CLI arguments and config files
//!
//! This module handles merging CLI argument overrides with file-based configuration,
//! implementing the configuration precedence logic.

use std::path::Path;

use super::parser::{Cli, Commands};
use crate::config::error::ConfigError;
use crate::config::{ConfigLoader, Environment, settings::Settings};

/// Applies CLI overrides on top of file-based configuration
pub struct ConfigurationMerger {
    base_config: Settings,
}

impl ConfigurationMerger {
    /// Create a new configuration merger with base configuration
    pub fn new(base_config: Settings) -> Self {
        Self { base_config }
    }

    /// Load the base configuration for the parsed CLI
    ///
    /// `--config` selects single-file mode, otherwise the layered directory
    /// is loaded for `--env` (or `OPSDECK_APP_ENV`).
    ///
    /// # Errors
    /// Returns ConfigError if configuration loading or validation fails
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let environment = match cli.env {
            Some(env) => Environment::from(env),
            None => Environment::from_env()?,
        };
        let loader = match cli.config.as_deref() {
            Some(path) => {
                Self::validate_config_file_access(path)?;
                ConfigLoader::single_file(path, environment)
            }
            None => ConfigLoader::discover(environment)?,
        };

        Ok(Self::new(loader.load()?))
    }

    /// Validate that the configuration file is accessible and readable
    fn validate_config_file_access(path: &Path) -> Result<(), ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::validation(
                "config_file",
                format!("Configuration file does not exist or is not a file: '{}'", path.display()),
            ));
        }

        std::fs::File::open(path).map(|_| ()).map_err(|e| {
            ConfigError::validation(
                "config_file",
                format!("Cannot read configuration file '{}': {}", path.display(), e),
            )
        })
    }

    /// Merge CLI arguments with the base configuration
    ///
    /// CLI arguments have highest priority; a command-specific log level
    /// beats `--verbose` / `--quiet`.
    pub fn merge_cli_args(&self, cli: &Cli) -> Result<Settings, ConfigError> {
        let mut config = self.base_config.clone();

        if cli.verbose {
            config.logger.level = "debug".to_string();
        } else if cli.quiet {
            config.logger.level = "error".to_string();
        }

        if let Some(ref command) = cli.command {
            Self::apply_command_overrides(&mut config, command);
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_command_overrides(config: &mut Settings, command: &Commands) {
        match command {
            Commands::Serve {
                tick_seconds,
                no_queue,
                log_level,
                dry_run: _,
            } => {
                if let Some(seconds) = tick_seconds {
                    config.scheduler.tick_seconds = *seconds;
                }
                if *no_queue {
                    config.queue.enabled = false;
                }
                if let Some(level) = log_level {
                    config.logger.level = (*level).into();
                }
            }
            Commands::Migrate { .. } | Commands::Cron { .. } => {}
        }
    }

    /// Get the base configuration (useful for inspection)
    pub fn config(&self) -> &Settings {
        &self.base_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn create_valid_base_config() -> Settings {
        let mut config = Settings::default();
        config.database.url = "postgres://localhost/test".to_string();
        config.queue.enabled = true;
        config
    }

    fn merge(args: &[&str]) -> Settings {
        let cli = Cli::try_parse_from(args).unwrap();
        ConfigurationMerger::new(create_valid_base_config())
            .merge_cli_args(&cli)
            .unwrap()
    }

    #[test]
    fn test_configuration_merger_new() {
        let base_config = Settings::default();
        let merger = ConfigurationMerger::new(base_config.clone());
        assert_eq!(merger.config(), &base_config);
    }

    #[test]
    fn test_verbose_and_quiet_flags() {
        assert_eq!(merge(&["opsdeck", "--verbose"]).logger.level, "debug");
        assert_eq!(merge(&["opsdeck", "--quiet"]).logger.level, "error");
    }

    #[test]
    fn test_serve_overrides() {
        let merged = merge(&["opsdeck", "serve", "--tick-seconds", "3", "--no-queue"]);
        assert_eq!(merged.scheduler.tick_seconds, 3);
        assert!(!merged.queue.enabled);

        let untouched = merge(&["opsdeck", "serve"]);
        assert_eq!(untouched.scheduler.tick_seconds, Settings::default().scheduler.tick_seconds);
        assert!(untouched.queue.enabled);
    }

    #[test]
    fn test_command_log_level_overrides_global() {
        let merged = merge(&["opsdeck", "--verbose", "serve", "--log-level", "warn"]);
        assert_eq!(merged.logger.level, "warn");
    }

    #[test]
    fn test_invalid_base_is_rejected_after_merge() {
        let mut base = Settings::default();
        base.database.url = String::new();
        let cli = Cli::try_parse_from(["opsdeck", "serve"]).unwrap();
        assert!(ConfigurationMerger::new(base).merge_cli_args(&cli).is_err());
    }
}
