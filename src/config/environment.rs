//! Deployment environment selection
//!
//! The environment picks which `{environment}.toml` layer is loaded. It comes
//! from `OPSDECK_APP_ENV` unless `--env` overrides it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    /// Variable holding the environment name
    pub const ENV_VAR: &'static str = "OPSDECK_APP_ENV";

    pub const ALL: [Environment; 4] = [
        Environment::Development,
        Environment::Test,
        Environment::Staging,
        Environment::Production,
    ];

    /// Environment named by `OPSDECK_APP_ENV`, `Development` when unset or blank
    ///
    /// # Errors
    /// Returns `EnvVarError` when the variable names no known environment
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(Self::ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(Self::default()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// File name of this environment's configuration layer
    pub fn layer_file(&self) -> String {
        format!("{}.toml", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => {
                let known: Vec<&str> = Self::ALL.iter().map(Environment::as_str).collect();
                Err(ConfigError::EnvVarError(format!(
                    "{}: unknown environment '{}', expected one of {}",
                    Self::ENV_VAR,
                    s.trim(),
                    known.join(", ")
                )))
            }
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_aliases() {
        for (input, expected) in [
            ("development", Environment::Development),
            ("dev", Environment::Development),
            ("test", Environment::Test),
            ("stage", Environment::Staging),
            (" Production ", Environment::Production),
            ("PROD", Environment::Production),
        ] {
            assert_eq!(input.parse::<Environment>().unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn test_unknown_name_lists_choices() {
        match "qa".parse::<Environment>() {
            Err(ConfigError::EnvVarError(msg)) => {
                assert!(msg.contains("OPSDECK_APP_ENV"));
                assert!(msg.contains("'qa'"));
                assert!(msg.contains("development, test, staging, production"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_layer_file_follows_name() {
        for env in Environment::ALL {
            assert_eq!(env.layer_file(), format!("{env}.toml"));
        }
        assert_eq!(Environment::default().layer_file(), "development.toml");
    }
}
