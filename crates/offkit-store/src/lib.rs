//! # Offkit Store
//!
//! Durable, origin-scoped key-value store that remembers the last good
//! payload per logical key for offline use.
//!
//! ## Features
//!
//! - **Namespaced keys**: every record lives under `offline_<key>`
//! - **Lazy TTL**: records older than the TTL are evicted on the next read
//! - **Non-fatal writes**: quota and serialization failures are logged, never raised
//! - **Schema tags**: typed payloads carry a tag so decode failures name their key
//! - **Backends**: in-memory (with optional quota) and SQLite
//!
//! ## Architecture
//!
//! ```text
//! OfflineStore
//!     ├── Clock (system / manual)
//!     └── StorageBackend
//!             ├── MemoryBackend
//!             └── SqliteBackend
//! ```

use offkit_common::OffkitError;
use thiserror::Error;

pub mod backend;
pub mod clock;
pub mod record;
pub mod sqlite;
pub mod store;

pub use backend::{MemoryBackend, StorageBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use record::{OfflinePayload, OfflineRecord};
pub use sqlite::SqliteBackend;
pub use store::OfflineStore;

// ==================== Errors ====================

/// Storage backend errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for OffkitError {
    fn from(err: StoreError) -> Self {
        OffkitError::storage_with_source("offline store operation failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_into_offkit_error() {
        let err: OffkitError = StoreError::QuotaExceeded {
            needed: 10,
            quota: 5,
        }
        .into();
        assert_eq!(err.category(), "storage");
    }
}
