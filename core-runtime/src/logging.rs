//! # Logging & Tracing Infrastructure
//!
//! Configures the `tracing-subscriber` stack for the engine: pretty,
//! compact, or JSON output with module-level filtering through `EnvFilter`.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Compact)
//!     .with_filter("core_refresh=debug,core_sync=trace");
//! init_logging(config).expect("Failed to initialize logging");
//!
//! tracing::info!("Engine started");
//! ```

use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact format for production
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default directive when `RUST_LOG` and `filter` are unset
    pub default_level: String,
    /// Custom filter string (e.g., "core_refresh=debug,core_sync=trace")
    pub filter: Option<String>,
    /// Display target module in logs
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_level: "info".to_string(),
            filter: None,
            display_target: true,
        }
    }
}

impl LoggingConfig {
    /// Set log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the default level directive
    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    /// Set custom filter string
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Display or hide the target module
    pub fn with_target(mut self, display_target: bool) -> Self {
        self.display_target = display_target;
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Filter resolution order: explicit `filter` string, then the `RUST_LOG`
/// environment variable, then `default_level`.
///
/// # Errors
///
/// Returns an error when the filter directive cannot be parsed or a global
/// subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = match &config.filter {
        Some(directives) => {
            EnvFilter::try_new(directives).map_err(|e| Error::Logging(e.to_string()))?
        }
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.default_level))
            .map_err(|e| Error::Logging(e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(config.display_target),
            )
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?,
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.display_target),
            )
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.display_target),
            )
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?,
    }

    Ok(())
}
