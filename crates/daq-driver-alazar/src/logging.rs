//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level when set.
//!
//! ```no_run
//! use daq_driver_alazar::logging::{self, LogFormat, LoggingConfig};
//!
//! logging::init(&LoggingConfig {
//!     level: "debug".to_string(),
//!     format: LogFormat::Json,
//!     ..LoggingConfig::default()
//! })?;
//! tracing::info!(board = 1, "Acquisition configured");
//! # Ok::<(), daq_driver_alazar::AlazarError>(())
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::error::{AlazarError, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored output for development.
    #[default]
    Pretty,
    /// Single-line output without colors.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Logging section of the acquisition configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter (trace, debug, info, warn, error).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Include source file and line.
    pub with_file_and_line: bool,
    /// Include thread names.
    pub with_thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_file_and_line: false,
            with_thread_names: true,
        }
    }
}

impl LoggingConfig {
    /// Parsed level filter.
    pub fn level(&self) -> Result<Level> {
        Level::from_str(self.level.trim()).map_err(|_| {
            AlazarError::config(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.level
            ))
        })
    }
}

/// Install a global subscriber for `config`.
///
/// Calling this when a subscriber is already installed is a no-op, so tests
/// and embedding applications may call it freely.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = config.level()?;
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| AlazarError::config(format!("Failed to initialize tracing: {e}")))
}
