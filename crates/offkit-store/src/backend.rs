//! Storage backend trait and the in-memory implementation.

use hashbrown::HashMap;
use std::sync::RwLock;

use crate::StoreError;

/// String-to-string storage with `localStorage` semantics.
pub trait StorageBackend: Send + Sync {
    /// Read a raw value.
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a raw value, replacing any previous one.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// All stored keys.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Volatile backend, optionally capped at a byte quota.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    items: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the total size of keys and values.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock_err<E: std::fmt::Display>(e: E) -> StoreError {
        StoreError::Backend(format!("Lock poisoned: {}", e))
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let items = self.items.read().map_err(Self::lock_err)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(Self::lock_err)?;

        if let Some(quota) = self.quota_bytes {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(Self::lock_err)?;
        items.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let items = self.items.read().map_err(Self::lock_err)?;
        Ok(items.keys().cloned().collect())
    }
}
