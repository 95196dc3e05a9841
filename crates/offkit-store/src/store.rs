//! The offline store.

use offkit_common::StoreConfig;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{MemoryBackend, StorageBackend};
use crate::clock::{Clock, SystemClock};
use crate::record::{OfflinePayload, OfflineRecord};
use crate::sqlite::SqliteBackend;
use crate::StoreError;

/// Namespaced, TTL-bound key-value store for offline payloads.
///
/// Reads never fail: anything that cannot be returned (missing, corrupt,
/// expired) is evicted and reported as absent. Writes never fail either;
/// they report success as a `bool` and log the reason otherwise.
pub struct OfflineStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    namespace: String,
    ttl: Duration,
    record_version: u32,
}

impl OfflineStore {
    /// Create a store over an existing backend.
    pub fn new(backend: Arc<dyn StorageBackend>, config: &StoreConfig) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            namespace: config.namespace.clone(),
            ttl: config.ttl(),
            record_version: config.record_version,
        }
    }

    /// Volatile store with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), &StoreConfig::default())
    }

    /// SQLite store when `db_path` is set, memory otherwise.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let backend: Arc<dyn StorageBackend> = match config.db_path {
            Some(ref path) => Arc::new(SqliteBackend::open(path)?),
            None => Arc::new(MemoryBackend::new()),
        };
        Ok(Self::new(backend, config))
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Storage key for a logical key.
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Persist `data` under `key`. Returns `false` if the write failed.
    pub fn store(&self, key: &str, data: &JsonValue) -> bool {
        self.write(key, data.clone(), self.record_version, None)
    }

    /// Stored value for `key`, or `None` if missing, unreadable or expired.
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.read(key).map(|record| record.data)
    }

    /// Remove `key`, or every namespaced key when `None`.
    pub fn clear(&self, key: Option<&str>) {
        match key {
            Some(key) => self.evict(&self.namespaced_key(key)),
            None => match self.backend.keys() {
                Ok(keys) => {
                    let mut removed = 0usize;
                    for k in keys.iter().filter(|k| k.starts_with(&self.namespace)) {
                        self.evict(k);
                        removed += 1;
                    }
                    debug!(removed, "Cleared offline store");
                }
                Err(e) => warn!(error = %e, "Failed to list offline keys"),
            },
        }
    }

    /// Persist a typed payload, tagging the record with its schema.
    pub fn store_typed<T: OfflinePayload>(&self, key: &str, payload: &T) -> bool {
        match serde_json::to_value(payload) {
            Ok(data) => self.write(key, data, T::VERSION, Some(T::SCHEMA)),
            Err(e) => {
                warn!(key, schema = T::SCHEMA, error = %e, "Failed to serialize offline payload");
                false
            }
        }
    }

    /// Typed read. A record with another schema tag or version, or one that
    /// no longer decodes as `T`, is evicted.
    pub fn get_typed<T: OfflinePayload>(&self, key: &str) -> Option<T> {
        let record = self.read(key)?;

        if record.schema.as_deref() != Some(T::SCHEMA) || record.version != T::VERSION {
            warn!(
                key,
                schema = T::SCHEMA,
                found_schema = ?record.schema,
                found_version = record.version,
                "Offline record schema mismatch, evicting"
            );
            self.evict(&self.namespaced_key(key));
            return None;
        }

        match serde_json::from_value(record.data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(key, schema = T::SCHEMA, error = %e, "Offline payload no longer decodes, evicting");
                self.evict(&self.namespaced_key(key));
                None
            }
        }
    }

    /// Logical keys currently held, expired or not.
    pub fn keys(&self) -> Vec<String> {
        match self.backend.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.namespace).map(str::to_string))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to list offline keys");
                Vec::new()
            }
        }
    }

    fn write(&self, key: &str, data: JsonValue, version: u32, schema: Option<&str>) -> bool {
        let record = OfflineRecord {
            data,
            timestamp: self.clock.now_ms(),
            version,
            schema: schema.map(str::to_string),
        };

        let result = serde_json::to_string(&record)
            .map_err(StoreError::from)
            .and_then(|raw| self.backend.set_item(&self.namespaced_key(key), &raw));

        match result {
            Ok(()) => {
                debug!(key, "Stored offline data");
                true
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to store offline data");
                false
            }
        }
    }

    fn read(&self, key: &str) -> Option<OfflineRecord> {
        let storage_key = self.namespaced_key(key);

        let raw = match self.backend.get_item(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Failed to retrieve offline data");
                return None;
            }
        };

        let record: OfflineRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key, error = %e, "Corrupt offline record, evicting");
                self.evict(&storage_key);
                return None;
            }
        };

        if record.is_expired(self.clock.now_ms(), self.ttl) {
            debug!(key, stored_at = record.timestamp, "Offline record expired, evicting");
            self.evict(&storage_key);
            return None;
        }

        Some(record)
    }

    fn evict(&self, storage_key: &str) {
        if let Err(e) = self.backend.remove_item(storage_key) {
            warn!(key = storage_key, error = %e, "Failed to remove offline data");
        }
    }
}
