//! Logging configuration and setup.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{OffkitError, Result};

/// Environment variable selecting the output format (`pretty`, `compact`, `json`).
pub const LOG_FORMAT_ENV: &str = "OFFKIT_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for offkit crates when no filter is given.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Include source file location.
    pub include_location: bool,
    /// Include span close events with timings.
    pub include_span_events: bool,
    /// Custom filter string (e.g., "offkit_sw=debug,reqwest=warn").
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Create a debug configuration.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// Default configuration with the format taken from `OFFKIT_LOG_FORMAT`.
    pub fn from_env() -> Self {
        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        Self {
            format,
            ..Default::default()
        }
    }

    /// Set a custom filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Directives used when neither a custom filter nor `RUST_LOG` is set.
    fn default_directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        format!(
            "warn,offkit_common={level},offkit_net={level},offkit_store={level},\
             offkit_page={level},offkit_sw={level},offkit_smoke={level}"
        )
    }

    fn build_filter(&self) -> Result<EnvFilter> {
        match self.filter {
            Some(ref custom) => EnvFilter::try_new(custom).map_err(|e| OffkitError::Config {
                message: format!("Invalid log filter `{custom}`"),
                source: Some(Box::new(e)),
            }),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.default_directives()))),
        }
    }
}

/// Initialize the global subscriber. Fails if the filter is invalid or a
/// subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let filter = config.build_filter()?;

    let span_events = if config.include_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
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

    installed.map_err(|e| OffkitError::Config {
        message: "Failed to install tracing subscriber".to_string(),
        source: Some(Box::new(e)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.include_location);
    }

    #[test]
    fn test_log_config_debug() {
        let config = LogConfig::debug();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.include_location);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" compact "), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_default_directives_cover_crates() {
        let directives = LogConfig::debug().default_directives();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("offkit_sw=debug"));
        assert!(directives.contains("offkit_store=debug"));
    }

    #[test]
    fn test_custom_filter_is_used() {
        let config = LogConfig::default().with_filter("offkit_sw=trace");
        assert_eq!(config.filter.as_deref(), Some("offkit_sw=trace"));
        assert!(config.build_filter().is_ok());
    }
}
