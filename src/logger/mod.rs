//! Logger Module
//!
//! A logging system based on `tracing-subscriber` with support for:
//! - Console output with color control
//! - File output with multiple formats (Full, Compact, JSON)
//! - Size-based file rollover
//! - Changing the log level at runtime

pub mod config;
pub mod error;
pub(crate) mod writer;

#[cfg(test)]
mod tests;

pub use config::*;
pub use error::LoggerError;

use std::io::IsTerminal;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};
use writer::RotatingFileWriter;

/// Handle for adjusting the active log filter after initialisation
#[derive(Clone)]
pub struct LogLevelHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    /// Replace the active filter, e.g. `"debug"` or `"opsdeck=trace,info"`
    pub fn set_level(&self, level: &str) -> Result<(), LoggerError> {
        let filter = EnvFilter::try_new(level).map_err(|e| LoggerError::reload(e.to_string()))?;
        self.inner
            .reload(filter)
            .map_err(|e| LoggerError::reload(e.to_string()))
    }
}

/// Initialize the global subscriber with the given configuration
pub fn init_logger(config: LoggerConfig) -> anyhow::Result<LogLevelHandle> {
    config.validate()?;

    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);

    let writer = if config.file.enabled {
        Some(RotatingFileWriter::new(&config.file)?)
    } else {
        None
    };
    let format = config.file.format;

    // File layers go before the console layer so ANSI escapes never leak into
    // file output (tokio-rs/tracing#1817).
    let full_layer = writer
        .clone()
        .filter(|_| format == LogFormat::Full)
        .map(|w| fmt::layer().with_ansi(false).with_target(true).with_writer(w));
    let compact_layer = writer
        .clone()
        .filter(|_| format == LogFormat::Compact)
        .map(|w| {
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .compact()
                .with_writer(w)
        });
    let json_layer = writer
        .filter(|_| format == LogFormat::Json)
        .map(|w| fmt::layer().with_ansi(false).json().with_writer(w));

    let use_ansi = config.console.colored && std::io::stdout().is_terminal();
    let console_layer = config.console.enabled.then(|| {
        fmt::layer()
            .with_ansi(use_ansi)
            .with_target(true)
            .with_level(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(full_layer)
        .with(compact_layer)
        .with(json_layer)
        .with(console_layer)
        .try_init()?;

    Ok(LogLevelHandle { inner: handle })
}
