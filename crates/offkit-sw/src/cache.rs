//! Cache API: named buckets of request/response pairs.

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use offkit_net::{cache_key_for, Request, Response, ResponseSource, Url};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::ServiceWorkerError;

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Response URL.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers in wire order. Repeated names keep every value;
    /// values are raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

impl CacheEntry {
    /// Capture a response for storage.
    pub fn from_response(response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            url: response.url.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.bytes().to_vec(),
            cached_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Rebuild the stored response. Entries whose URL or status no longer
    /// parse yield `None`.
    pub fn to_response(&self) -> Option<Response> {
        let url = Url::parse(&self.url).ok()?;
        let status = StatusCode::from_u16(self.status).ok()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.append(n, v);
                }
                _ => debug!(url = %self.url, header = %name, "Dropping unparsable cached header"),
            }
        }

        Some(
            Response::new(url, status, headers, Bytes::from(self.body.clone()))
                .with_source(ResponseSource::Cache),
        )
    }
}

/// A cache instance.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries keyed by request URL without fragment.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request. Only `GET` requests ever match.
    pub fn match_request(&self, request: &Request) -> Option<Response> {
        if request.method != Method::GET {
            return None;
        }
        self.match_url(&request.cache_key())
    }

    /// Match by cache key.
    pub fn match_url(&self, key: &str) -> Option<Response> {
        self.entries.get(key).and_then(CacheEntry::to_response)
    }

    /// Store a response for a `GET` request, replacing any previous entry.
    pub fn put(&mut self, request: &Request, response: &Response) -> Result<(), ServiceWorkerError> {
        if request.method != Method::GET {
            return Err(ServiceWorkerError::CacheError(format!(
                "Request method '{}' is unsupported",
                request.method
            )));
        }

        self.entries
            .insert(request.cache_key(), CacheEntry::from_response(response));
        debug!(cache = %self.name, url = %request.url, "Cached response");
        Ok(())
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &Url) -> bool {
        self.entries.remove(&cache_key_for(url)).is_some()
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache storage (the `caches` global).
///
/// Buckets are kept in creation order, which decides precedence when
/// matching across all of them.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: Vec<Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let index = match self.caches.iter().position(|c| c.name == name) {
            Some(index) => index,
            None => {
                debug!(cache = name, "Creating cache");
                self.caches.push(Cache::new(name));
                self.caches.len() - 1
            }
        };
        &mut self.caches[index]
    }

    /// Get an existing cache.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.iter().find(|c| c.name == name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.caches.len();
        self.caches.retain(|c| c.name != name);
        self.caches.len() != before
    }

    /// All cache names, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.caches.iter().map(|c| c.name.clone()).collect()
    }

    /// Match across all caches.
    pub fn match_request(&self, request: &Request) -> Option<Response> {
        self.caches.iter().find_map(|c| c.match_request(request))
    }

    /// Match a path on `origin` across all caches.
    pub fn match_path(&self, origin: &Url, path: &str) -> Option<Response> {
        let url = origin.join(path).ok()?;
        let key = cache_key_for(&url);
        self.caches.iter().find_map(|c| c.match_url(&key))
    }

    /// Write a JSON snapshot of every bucket.
    pub fn save(&self, path: &Path) -> Result<(), ServiceWorkerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceWorkerError::Snapshot(format!("{}: {}", parent.display(), e))
            })?;
        }

        let json = serde_json::to_vec(self)
            .map_err(|e| ServiceWorkerError::Snapshot(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| ServiceWorkerError::Snapshot(format!("{}: {}", path.display(), e)))?;

        info!(path = %path.display(), buckets = self.caches.len(), "Saved cache snapshot");
        Ok(())
    }

    /// Load a snapshot written by [`save`](Self::save). A missing file is an
    /// empty storage.
    pub fn load(path: &Path) -> Result<Self, ServiceWorkerError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let bytes = std::fs::read(path)
            .map_err(|e| ServiceWorkerError::Snapshot(format!("{}: {}", path.display(), e)))?;
        let storage: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ServiceWorkerError::Snapshot(e.to_string()))?;

        info!(path = %path.display(), buckets = storage.caches.len(), "Loaded cache snapshot");
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn response(u: &str, body: &str) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/css"),
        );
        Response::new(url(u), StatusCode::OK, headers, Bytes::from(body.to_string()))
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("static-v1");
        let request = Request::get(url("https://example.com/style.css"));
        cache
            .put(&request, &response("https://example.com/style.css", "body{}"))
            .unwrap();

        let hit = cache.match_request(&request).unwrap();
        assert_eq!(hit.source, ResponseSource::Cache);
        assert_eq!(hit.text().unwrap(), "body{}");
        assert_eq!(hit.content_type().unwrap().essence_str(), "text/css");

        assert!(cache
            .match_request(&Request::get(url("https://example.com/other.css")))
            .is_none());
    }

    #[test]
    fn test_repeated_and_binary_headers_survive() {
        let mut headers = HeaderMap::new();
        headers.append(http::header::SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(http::header::SET_COOKIE, HeaderValue::from_static("b=2"));
        headers.insert(
            HeaderName::from_static("x-raw"),
            HeaderValue::from_bytes(b"caf\xe9").unwrap(),
        );
        let original = Response::new(
            url("https://example.com/session"),
            StatusCode::OK,
            headers,
            Bytes::from_static(b"ok"),
        );
        let request = Request::get(url("https://example.com/session"));

        let mut cache = Cache::new("dynamic-v1");
        cache.put(&request, &original).unwrap();
        let hit = cache.match_request(&request).unwrap();

        let cookies: Vec<_> = hit.headers.get_all(http::header::SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(hit.headers.get("x-raw").unwrap().as_bytes(), b"caf\xe9");
    }

    #[test]
    fn test_cache_ignores_fragment() {
        let mut cache = Cache::new("static-v1");
        cache
            .put(
                &Request::get(url("https://example.com/matrix")),
                &response("https://example.com/matrix", "m"),
            )
            .unwrap();

        assert!(cache
            .match_request(&Request::get(url("https://example.com/matrix#top")))
            .is_some());
    }

    #[test]
    fn test_cache_rejects_non_get() {
        let mut cache = Cache::new("dynamic-v1");
        let post = Request::post(url("https://example.com/items"), Bytes::from_static(b"{}"));

        let err = cache
            .put(&post, &response("https://example.com/items", "{}"))
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::CacheError(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_non_get_never_matches() {
        let mut cache = Cache::new("dynamic-v1");
        cache
            .put(
                &Request::get(url("https://example.com/items")),
                &response("https://example.com/items", "[]"),
            )
            .unwrap();

        let post = Request::post(url("https://example.com/items"), Bytes::new());
        assert!(cache.match_request(&post).is_none());
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        cache
            .put(
                &Request::get(url("https://example.com/a.js")),
                &response("https://example.com/a.js", ""),
            )
            .unwrap();

        assert!(cache.delete(&url("https://example.com/a.js")));
        assert!(!cache.delete(&url("https://example.com/a.js")));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("static-v1"));

        storage.open("static-v1");
        storage.open("dynamic-v1");
        storage.open("static-v1");
        assert_eq!(storage.keys(), vec!["static-v1", "dynamic-v1"]);

        assert!(storage.delete("static-v1"));
        assert!(!storage.delete("static-v1"));
        assert_eq!(storage.keys(), vec!["dynamic-v1"]);
    }

    #[test]
    fn test_match_precedence_follows_creation_order() {
        let mut storage = CacheStorage::new();
        let request = Request::get(url("https://example.com/"));

        storage
            .open("static-v1")
            .put(&request, &response("https://example.com/", "static"))
            .unwrap();
        storage
            .open("dynamic-v1")
            .put(&request, &response("https://example.com/", "dynamic"))
            .unwrap();

        let hit = storage.match_request(&request).unwrap();
        assert_eq!(hit.text().unwrap(), "static");
    }

    #[test]
    fn test_match_path() {
        let mut storage = CacheStorage::new();
        storage
            .open("static-v1")
            .put(
                &Request::get(url("https://example.com/")),
                &response("https://example.com/", "home"),
            )
            .unwrap();

        let origin = url("https://example.com/dashboard");
        assert_eq!(
            storage.match_path(&origin, "/").unwrap().text().unwrap(),
            "home"
        );
        assert!(storage.match_path(&origin, "/matrix").is_none());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches").join("snapshot.json");

        let mut storage = CacheStorage::new();
        storage
            .open("static-v1")
            .put(
                &Request::get(url("https://example.com/favicon.svg")),
                &response("https://example.com/favicon.svg", "<svg/>"),
            )
            .unwrap();
        storage.open("dynamic-v1");
        storage.save(&path).unwrap();

        let loaded = CacheStorage::load(&path).unwrap();
        assert_eq!(loaded.keys(), vec!["static-v1", "dynamic-v1"]);
        let hit = loaded
            .match_request(&Request::get(url("https://example.com/favicon.svg")))
            .unwrap();
        assert_eq!(hit.text().unwrap(), "<svg/>");
        assert_eq!(hit.content_type().unwrap().essence_str(), "text/css");
    }

    #[test]
    fn test_load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::load(&dir.path().join("none.json")).unwrap();
        assert!(storage.keys().is_empty());
    }
}
