//! # Offkit Common
//!
//! Shared error taxonomy, configuration, logging setup and retry helpers for
//! the offkit crates.
//!
//! ## Features
//!
//! - One error type ([`OffkitError`]) covering network, storage, missing
//!   offline data and parse failures
//! - [`OfflineConfig`] loaded from JSON with sensible defaults
//! - `tracing` subscriber setup
//! - Backoff and timeout utilities

use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod logging;
pub mod retry;

pub use config::{GatewayConfig, OfflineConfig, ProbeConfig, StoreConfig, WorkerConfig};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryPolicy};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for offkit.
#[derive(Error, Debug)]
pub enum OffkitError {
    /// Connection, DNS or timeout failure talking to the network.
    #[error("Network failure: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Quota exceeded, serialization error or backend failure.
    #[error("Storage failure: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Fallback requested but absent or expired.
    #[error("No offline data available{}", key.as_deref().map(|k| format!(" for `{k}`")).unwrap_or_default())]
    NoOfflineData { key: Option<String> },

    /// Stored payload could not be decoded.
    #[error("Parse failure for `{key}` (schema {schema}): {message}")]
    Parse {
        key: String,
        schema: String,
        message: String,
    },

    /// Invalid configuration.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl OffkitError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with source.
    pub fn storage_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// No offline data for the given fallback key.
    pub fn no_offline_data(key: Option<&str>) -> Self {
        Self::NoOfflineData {
            key: key.map(str::to_string),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OffkitError::Network { .. } | OffkitError::Timeout(_) | OffkitError::Io(_)
        )
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            OffkitError::Network { .. } => "network",
            OffkitError::Storage { .. } => "storage",
            OffkitError::NoOfflineData { .. } => "no_offline_data",
            OffkitError::Parse { .. } => "parse",
            OffkitError::Config { .. } => "config",
            OffkitError::Io(_) => "io",
            OffkitError::Timeout(_) => "timeout",
            OffkitError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for offkit operations.
pub type Result<T> = std::result::Result<T, OffkitError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| OffkitError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}
