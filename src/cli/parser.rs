//! CLI argument parsing with clap
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, arguments, and their documentation.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use super::validation;

/// Job scheduler and execution engine
#[derive(Parser, Debug)]
#[command(name = "opsdeck")]
#[command(about = "Job scheduler and execution engine for shell, Node, Python and built-in tasks")]
#[command(long_about = "
Opsdeck runs registered jobs on cron expressions and explicit schedules,
supervises their processes with timeouts, retries failures with exponential
backoff and fans out lifecycle notifications.

EXAMPLES:
    # Start the scheduler with default configuration
    opsdeck serve

    # Evaluate due work every 5 seconds and never use the durable queue
    opsdeck serve --tick-seconds 5 --no-queue

    # Use custom configuration file
    opsdeck --config /path/to/config.toml serve

    # Check configuration without starting
    opsdeck serve --dry-run

    # Run database migrations
    opsdeck migrate

    # Rollback last 2 migrations
    opsdeck migrate --rollback 2

    # Show the next 10 fire times of a cron expression
    opsdeck cron '*/15 * * * *' --count 10
")]
#[command(version = crate::clap_long_version())]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Load this single TOML file instead of the layered configuration
    /// directory. `OPSDECK_*` environment variables still override it.
    ///
    /// Example: --config /etc/opsdeck/production.toml
    #[arg(short, long, value_name = "FILE", value_parser = validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects which `{environment}.toml` layer is loaded.
    ///
    /// Available values: development (dev), test, staging (stage), production (prod)
    #[arg(short, long, value_enum)]
    pub env: Option<Environment>,

    /// Enable verbose logging
    ///
    /// Cannot be used with --quiet.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error output
    ///
    /// Cannot be used with --verbose.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler and queue worker (default)
    ///
    /// Builds the stores, notification sinks, the optional durable queue,
    /// the execution engine and the scheduler, then runs until Ctrl+C or
    /// SIGTERM.
    ///
    /// Examples:
    ///   opsdeck serve                      # Start with defaults
    ///   opsdeck serve --tick-seconds 10    # Evaluate due work every 10 seconds
    ///   opsdeck serve --dry-run            # Validate config without starting
    Serve {
        /// Seconds between two scheduler ticks (1-60)
        #[arg(long, value_name = "SECONDS", value_parser = validation::validate_tick_seconds)]
        tick_seconds: Option<u64>,

        /// Run every execution locally even if a queue is configured
        #[arg(long)]
        no_queue: bool,

        /// Log level override
        ///
        /// Takes precedence over --verbose and --quiet.
        #[arg(long, value_enum)]
        log_level: Option<LogLevel>,

        /// Validate configuration and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Database migration operations
    ///
    /// Examples:
    ///   opsdeck migrate                    # Apply all pending migrations
    ///   opsdeck migrate --dry-run          # Show pending migrations without applying
    ///   opsdeck migrate --rollback 3       # Rollback the last 3 migrations
    Migrate {
        /// Show pending migrations without applying
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to rollback (1-100)
        #[arg(long, value_name = "STEPS", conflicts_with = "dry_run", value_parser = validation::validate_rollback_steps)]
        rollback: Option<u32>,
    },
    /// Validate a cron expression and preview its next fire times
    ///
    /// Five-field expressions are accepted and fire at second zero.
    ///
    /// Examples:
    ///   opsdeck cron '0 3 * * *'
    ///   opsdeck cron '*/10 * * * * *' --count 3
    Cron {
        /// Cron expression (quote it in the shell)
        expression: String,

        /// Number of upcoming fire times to print (1-100)
        #[arg(short = 'n', long, default_value_t = 5, value_parser = validation::validate_preview_count)]
        count: usize,
    },
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

/// Log level options
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn", alias = "warning")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl Cli {
    /// Validate argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if let Some(Commands::Migrate { dry_run, rollback }) = &self.command
            && *dry_run
            && rollback.is_some()
        {
            return Err("Cannot use --dry-run and --rollback together".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use --verbose and --quiet together".to_string());
        }

        Ok(())
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => "error".to_string(),
            LogLevel::Warn => "warn".to_string(),
            LogLevel::Info => "info".to_string(),
            LogLevel::Debug => "debug".to_string(),
            LogLevel::Trace => "trace".to_string(),
        }
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}
