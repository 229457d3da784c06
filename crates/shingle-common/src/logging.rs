//! Logging configuration and setup.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default filter when neither `RUST_LOG` nor a custom filter is set.
const DEFAULT_FILTER: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Logging configuration.
///
/// Deserializable so it can sit inside a gateway config file:
///
/// ```json
/// { "format": "json", "filter": "shingle_sw=debug,info" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directives (e.g. "shingle_sw=debug,reqwest=warn").
    /// Falls back to `RUST_LOG`, then to `info`.
    pub filter: Option<String>,
    /// Include source file and line.
    pub include_location: bool,
    /// Emit span enter/close events.
    pub include_span_events: bool,
}

impl LogConfig {
    /// Verbose configuration for local debugging.
    pub fn debug() -> Self {
        Self {
            filter: Some("debug".to_string()),
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// Set a custom filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        match &self.filter {
            Some(filter) => {
                EnvFilter::try_new(filter).map_err(|e| LoggingError::InvalidFilter {
                    filter: filter.clone(),
                    reason: e.to_string(),
                })
            }
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails if the filter does not parse or a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = config.env_filter()?;

    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    tracing::debug!(
        format = ?config.format,
        filter = config.filter.as_deref().unwrap_or(DEFAULT_FILTER),
        "Logging initialized"
    );
    Ok(())
}
