//! Offline layer configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{OffkitError, Result};

/// Top-level configuration shared by the page and worker contexts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Worker (cache router / lifecycle) settings
    pub worker: WorkerConfig,

    /// Offline key-value store settings
    pub store: StoreConfig,

    /// Fetch gateway settings
    pub gateway: GatewayConfig,

    /// Connectivity probe settings
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix prepended to every bucket name
    pub bucket_prefix: String,

    /// Bucket generation; bumping it evicts every older bucket on activation
    pub bucket_version: u32,

    /// Routes and assets pre-warmed into the static bucket on install
    pub precache: Vec<String>,

    /// Regular expressions identifying API requests
    pub api_patterns: Vec<String>,

    /// Any request whose host contains this substring is an API request
    pub backend_host: Option<String>,

    /// Background sync tag handled by the worker
    pub sync_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Key namespace prefix
    pub namespace: String,

    /// Record time-to-live in seconds
    pub ttl_secs: u64,

    /// Version written into every record
    pub record_version: u32,

    /// SQLite database path; `None` keeps records in memory
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Methods whose responses are never captured for offline use
    pub uncacheable_methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// URL polled with HEAD requests; no URL disables probing
    pub health_url: Option<String>,

    /// Seconds between probes
    pub interval_secs: u64,

    /// Seconds before a probe counts as failed
    pub timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bucket_prefix: String::new(),
            bucket_version: 1,
            precache: vec![
                "/".to_string(),
                "/dashboard".to_string(),
                "/matrix".to_string(),
                "/registerToMatrix".to_string(),
                "/favicon.svg".to_string(),
            ],
            api_patterns: vec![
                r"/v1/databases/.*/collections/.*/documents".to_string(),
                r"/v1/account".to_string(),
            ],
            backend_host: Some("appwrite".to_string()),
            sync_tag: "background-sync-matrix-data".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "offline_".to_string(),
            ttl_secs: 24 * 60 * 60,
            record_version: 1,
            db_path: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            uncacheable_methods: vec!["POST".to_string()],
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            health_url: None,
            interval_secs: 15,
            timeout_secs: 5,
        }
    }
}

impl WorkerConfig {
    fn bucket_name(&self, role: &str) -> String {
        format!("{}{}-v{}", self.bucket_prefix, role, self.bucket_version)
    }

    /// Name of the pre-warmed, long-lived bucket.
    pub fn static_bucket(&self) -> String {
        self.bucket_name("static")
    }

    /// Name of the runtime-populated bucket.
    pub fn dynamic_bucket(&self) -> String {
        self.bucket_name("dynamic")
    }

    /// Name of the generic versioned bucket.
    pub fn generic_bucket(&self) -> String {
        self.bucket_name("generic")
    }

    /// The three bucket names that survive activation.
    pub fn current_buckets(&self) -> [String; 3] {
        [
            self.static_bucket(),
            self.dynamic_bucket(),
            self.generic_bucket(),
        ]
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Default on-disk location for the durable store.
    pub fn default_db_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("offkit").join("offline.db"))
    }
}

impl GatewayConfig {
    /// Whether a response to `method` may be captured into the offline store.
    pub fn is_cacheable_method(&self, method: &str) -> bool {
        !self
            .uncacheable_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OfflineConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| OffkitError::Config {
            message: format!("Failed to read config file {}", path.display()),
            source: Some(Box::new(e)),
        })?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(contents: &str) -> Result<Self> {
        let config: OfflineConfig =
            serde_json::from_str(contents).map_err(|e| OffkitError::Config {
                message: "Failed to parse config".to_string(),
                source: Some(Box::new(e)),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the layer misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.store.ttl_secs == 0 {
            return Err(OffkitError::config("store.ttl_secs must be positive"));
        }
        if self.store.namespace.is_empty() {
            return Err(OffkitError::config("store.namespace must not be empty"));
        }
        if self.worker.sync_tag.is_empty() {
            return Err(OffkitError::config("worker.sync_tag must not be empty"));
        }
        if let Some(bad) = self.worker.precache.iter().find(|p| !p.starts_with('/')) {
            return Err(OffkitError::config(format!(
                "precache entry `{bad}` must be a root-relative path"
            )));
        }
        if self.probe.health_url.is_some() && self.probe.interval_secs == 0 {
            return Err(OffkitError::config("probe.interval_secs must be positive"));
        }
        if self.probe.health_url.is_some() && self.probe.timeout_secs == 0 {
            return Err(OffkitError::config("probe.timeout_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_bucket_names() {
        let config = WorkerConfig::default();
        assert_eq!(
            config.current_buckets(),
            [
                "static-v1".to_string(),
                "dynamic-v1".to_string(),
                "generic-v1".to_string()
            ]
        );
    }

    #[test]
    fn test_bucket_prefix_and_version() {
        let config = WorkerConfig {
            bucket_prefix: "tsa-matrix-".to_string(),
            bucket_version: 3,
            ..Default::default()
        };
        assert_eq!(config.static_bucket(), "tsa-matrix-static-v3");
        assert_eq!(config.dynamic_bucket(), "tsa-matrix-dynamic-v3");
    }

    #[test]
    fn test_store_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.namespace, "offline_");
        assert_eq!(config.ttl(), Duration::from_secs(86_400));
        assert_eq!(config.record_version, 1);
    }

    #[test]
    fn test_uncacheable_methods() {
        let config = GatewayConfig::default();
        assert!(!config.is_cacheable_method("POST"));
        assert!(!config.is_cacheable_method("post"));
        assert!(config.is_cacheable_method("GET"));
        assert!(config.is_cacheable_method("PUT"));

        let strict = GatewayConfig {
            uncacheable_methods: vec!["POST".into(), "PUT".into(), "PATCH".into(), "DELETE".into()],
        };
        assert!(!strict.is_cacheable_method("DELETE"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = OfflineConfig::from_json(r#"{ "store": { "ttl_secs": 60 } }"#).unwrap();
        assert_eq!(config.store.ttl_secs, 60);
        assert_eq!(config.store.namespace, "offline_");
        assert_eq!(config.worker.sync_tag, "background-sync-matrix-data");
    }

    #[test]
    fn test_validation_rejects_zero_ttl() {
        let err = OfflineConfig::from_json(r#"{ "store": { "ttl_secs": 0 } }"#).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_validation_rejects_zero_probe_timeout() {
        let err = OfflineConfig::from_json(
            r#"{ "probe": { "health_url": "/health", "timeout_secs": 0 } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("probe.timeout_secs"));

        let unused = OfflineConfig::from_json(r#"{ "probe": { "timeout_secs": 0 } }"#);
        assert!(unused.is_ok());
    }

    #[test]
    fn test_validation_rejects_relative_precache() {
        let err =
            OfflineConfig::from_json(r#"{ "worker": { "precache": ["dashboard"] } }"#).unwrap_err();
        assert!(err.to_string().contains("root-relative"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "worker": {{ "bucket_version": 2 }} }}"#).unwrap();

        let config = OfflineConfig::load(file.path()).unwrap();
        assert_eq!(config.worker.static_bucket(), "static-v2");
    }

    #[test]
    fn test_load_missing_file() {
        let err = OfflineConfig::load(Path::new("/nonexistent/offkit.json")).unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
