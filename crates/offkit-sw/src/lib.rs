//! # Offkit Service Worker
//!
//! The worker context of the offline layer: versioned cache buckets, the
//! per-request caching strategies and the install/activate lifecycle.
//!
//! ## Features
//!
//! - **Cache API**: ordered named buckets, GET-only `put`/`match`, JSON snapshots
//! - **Routing**: stale-while-revalidate for navigations, network-first for
//!   API and other requests, cache-first for static assets
//! - **Lifecycle**: pre-warm on install, eager activation, stale bucket eviction,
//!   client claiming and update detection
//! - **Background sync / push**: extension points behind traits
//!
//! ## Architecture
//!
//! ```text
//! WorkerLifecycle
//!     ├── Registration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker)
//!     ├── Clients
//!     └── SyncManager / PushHandler
//!
//! CacheRouter ──► Fetcher
//!     └── CacheStorage (static-v1, dynamic-v1, generic-v1)
//!             └── Cache
//!                     └── Request → Response
//! ```

use offkit_common::OffkitError;
use offkit_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod lifecycle;
pub mod router;
pub mod sync;
pub mod tasks;

pub use cache::{Cache, CacheEntry, CacheStorage};
pub use lifecycle::{
    Client, Clients, Registration, ServiceWorker, ServiceWorkerId, WorkerEvent, WorkerLifecycle,
    WorkerState,
};
pub use router::{CacheRouter, FetchOutcome, RequestClass};
pub use sync::{
    LoggingPushHandler, LoggingSyncHandler, PushHandler, SyncHandler, SyncManager, SyncReport,
};
pub use tasks::BackgroundTasks;

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Install superseded: worker {0:?} was replaced by a newer install")]
    Superseded(ServiceWorkerId),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Invalid API pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Sync failed for `{tag}`: {message}")]
    SyncFailed { tag: String, message: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl From<ServiceWorkerError> for OffkitError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Network(net) => net.into(),
            ServiceWorkerError::CacheError(_) | ServiceWorkerError::Snapshot(_) => {
                OffkitError::storage_with_source("cache operation failed", err)
            }
            ServiceWorkerError::InvalidPattern(_) => OffkitError::Config {
                message: err.to_string(),
                source: None,
            },
            other => OffkitError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: OffkitError = ServiceWorkerError::CacheError("full".into()).into();
        assert_eq!(err.category(), "storage");

        let err: OffkitError = ServiceWorkerError::Network(NetError::Connect("down".into())).into();
        assert_eq!(err.category(), "network");
        assert!(err.is_retryable());

        let err: OffkitError = ServiceWorkerError::StateError("no worker".into()).into();
        assert_eq!(err.category(), "internal");
    }
}
