//! Stored record layout.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// What sits behind `offline_<key>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
    pub data: JsonValue,
    /// Write time, ms since epoch.
    pub timestamp: i64,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl OfflineRecord {
    /// True once the record is strictly older than `ttl`. An age that does
    /// not fit in an `i64` counts as expired.
    pub fn is_expired(&self, now_ms: i64, ttl: Duration) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms
            .checked_sub(self.timestamp)
            .map_or(true, |age| age > ttl_ms)
    }
}

/// A payload type with a schema tag.
///
/// ```
/// use offkit_store::OfflinePayload;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Profile {
///     name: String,
/// }
///
/// impl OfflinePayload for Profile {
///     const SCHEMA: &'static str = "profile";
/// }
/// ```
pub trait OfflinePayload: Serialize + DeserializeOwned {
    const SCHEMA: &'static str;
    const VERSION: u32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: i64) -> OfflineRecord {
        OfflineRecord {
            data: serde_json::json!({ "name": "Ada" }),
            timestamp,
            version: 1,
            schema: None,
        }
    }

    #[test]
    fn test_expiry_is_strict() {
        let ttl = Duration::from_secs(60);
        assert!(!record(0).is_expired(60_000, ttl));
        assert!(record(0).is_expired(60_001, ttl));
    }

    #[test]
    fn test_unrepresentable_age_is_expired() {
        let ttl = Duration::from_secs(60);
        assert!(record(i64::MIN).is_expired(1_700_000_000_000, ttl));
        assert!(record(i64::MIN).is_expired(1, Duration::MAX));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let ttl = Duration::from_secs(u64::MAX);
        assert!(!record(0).is_expired(1_700_000_000_000, ttl));
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(record(42)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "data": { "name": "Ada" }, "timestamp": 42, "version": 1 })
        );
    }

    #[test]
    fn test_reads_records_without_schema() {
        let parsed: OfflineRecord =
            serde_json::from_str(r#"{"data":[1,2],"timestamp":7,"version":1}"#).unwrap();
        assert_eq!(parsed.schema, None);
        assert_eq!(parsed.data, serde_json::json!([1, 2]));
    }
}
