//! Layered configuration loading
//!
//! Sources, lowest priority first:
//! 1. `default.toml` (required)
//! 2. `{environment}.toml`
//! 3. `local.toml`
//! 4. `OPSDECK_*` variables, `__` between nested keys
//!    (`OPSDECK_QUEUE__URL` -> `queue.url`)
//!
//! A single file (`--config` or `OPSDECK_CONFIG_FILE`) replaces the three
//! file layers; variables still apply on top of it.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};

use crate::config::environment::Environment as AppEnvironment;
use crate::config::error::ConfigError;
use crate::config::settings::Settings;

const CONFIG_DIR_ENV: &str = "OPSDECK_CONFIG_DIR";
const CONFIG_FILE_ENV: &str = "OPSDECK_CONFIG_FILE";
const DEFAULT_CONFIG_DIR: &str = "config";
const DEFAULT_FILE: &str = "default.toml";
const LOCAL_FILE: &str = "local.toml";
const ENV_PREFIX: &str = "OPSDECK";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigSource {
    /// Directory holding the default, environment and local layers
    Layered(PathBuf),
    /// One file standing in for every file layer
    Single(PathBuf),
}

/// Resolves where settings come from and loads them
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    source: ConfigSource,
    environment: AppEnvironment,
}

impl ConfigLoader {
    /// Loader for the environment named by `OPSDECK_APP_ENV`
    ///
    /// # Errors
    /// See [`ConfigLoader::discover`]; an unknown `OPSDECK_APP_ENV` also fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::discover(AppEnvironment::from_env()?)
    }

    /// Picks the layered directory or single file named by
    /// `OPSDECK_CONFIG_DIR` / `OPSDECK_CONFIG_FILE`, defaulting to `./config`
    ///
    /// # Errors
    /// Returns `MutualExclusivityError` when both variables are set.
    pub fn discover(environment: AppEnvironment) -> Result<Self, ConfigError> {
        let dir = std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from);
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);

        let source = match (dir, file) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::mutual_exclusivity(format!(
                    "{CONFIG_DIR_ENV} and {CONFIG_FILE_ENV} cannot both be set; \
                     use the directory for layered files or the file on its own"
                )));
            }
            (None, Some(file)) => ConfigSource::Single(file),
            (dir, None) => {
                ConfigSource::Layered(dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR)))
            }
        };

        Ok(Self {
            source,
            environment,
        })
    }

    pub fn layered(dir: impl Into<PathBuf>, environment: AppEnvironment) -> Self {
        Self {
            source: ConfigSource::Layered(dir.into()),
            environment,
        }
    }

    /// Loader reading exactly one file, as `--config` does
    pub fn single_file(path: impl Into<PathBuf>, environment: AppEnvironment) -> Self {
        Self {
            source: ConfigSource::Single(path.into()),
            environment,
        }
    }

    pub fn with_environment(mut self, environment: AppEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn environment(&self) -> AppEnvironment {
        self.environment
    }

    /// Files consulted in load order, with whether each must exist
    fn files(&self) -> Vec<(PathBuf, bool)> {
        match &self.source {
            ConfigSource::Single(path) => vec![(path.clone(), true)],
            ConfigSource::Layered(dir) => vec![
                (dir.join(DEFAULT_FILE), true),
                (dir.join(self.environment.layer_file()), false),
                (dir.join(LOCAL_FILE), false),
            ],
        }
    }

    /// Load, deserialize and validate the settings
    ///
    /// The resolved environment is recorded in `application.environment`.
    ///
    /// # Errors
    /// - A required file is missing
    /// - A file or variable does not parse
    /// - A section fails validation
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let mut builder = Config::builder();
        for (path, required) in self.files() {
            builder = builder.add_source(file_source(&path, required)?);
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR)
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize().map_err(|e| {
            ConfigError::ParseError(format!(
                "{} settings do not deserialize: {}",
                self.environment, e
            ))
        })?;
        settings.application.environment = self.environment;
        settings.validate()?;

        Ok(settings)
    }
}

fn file_source(
    path: &Path,
    required: bool,
) -> Result<File<config::FileSourceFile, FileFormat>, ConfigError> {
    if required && !path.is_file() {
        return Err(ConfigError::file_not_found(format!(
            "Required configuration file not found: {}",
            path.display()
        )));
    }
    Ok(File::from(path).format(FileFormat::Toml).required(required))
}
