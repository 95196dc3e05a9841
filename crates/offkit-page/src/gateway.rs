//! Fetch with offline fallback.

use http::StatusCode;
use offkit_common::{GatewayConfig, OffkitError, Result};
use offkit_net::{FetchOptions, Fetcher, NetError, Response, Url};
use offkit_store::{OfflinePayload, OfflineStore};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::connectivity::ConnectivityMonitor;

/// Page-level `fetch` that remembers the last good JSON payload per key and
/// serves it when the network is unavailable.
pub struct FetchGateway {
    origin: Url,
    fetcher: Arc<dyn Fetcher>,
    monitor: Arc<ConnectivityMonitor>,
    store: Arc<OfflineStore>,
    config: GatewayConfig,
}

impl FetchGateway {
    pub fn new(
        origin: Url,
        fetcher: Arc<dyn Fetcher>,
        monitor: Arc<ConnectivityMonitor>,
        store: Arc<OfflineStore>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            origin,
            fetcher,
            monitor,
            store,
            config,
        }
    }

    /// Fetch `url` (absolute, or relative to the page origin).
    ///
    /// With a `fallback_key`, a 200 JSON response is captured into the
    /// offline store, and a network failure or offline state is answered
    /// from it when possible.
    pub async fn fetch_with_fallback(
        &self,
        url: &str,
        options: FetchOptions,
        fallback_key: Option<&str>,
    ) -> Result<Response> {
        let url = self
            .origin
            .join(url)
            .map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;

        if !self.monitor.is_online() {
            debug!(url = %url, key = ?fallback_key, "Offline, skipping network");
            return self
                .fallback(&url, fallback_key)
                .ok_or_else(|| OffkitError::no_offline_data(fallback_key));
        }

        let method = options
            .method
            .clone()
            .unwrap_or_else(|| "GET".to_string());
        let request = options.into_request(url.clone())?;

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if let Some(key) = fallback_key {
                    if response.status == StatusCode::OK && self.config.is_cacheable_method(&method) {
                        self.capture(key, &response);
                    }
                }
                Ok(response)
            }
            Err(e) => {
                debug!(url = %url, key = ?fallback_key, error = %e, "Network failure, trying offline data");
                match self.fallback(&url, fallback_key) {
                    Some(response) => Ok(response),
                    None => Err(e.into()),
                }
            }
        }
    }

    /// Fetch and decode a typed payload, attributing decode failures to
    /// `key` and the payload's schema tag.
    pub async fn fetch_typed<T: OfflinePayload>(
        &self,
        url: &str,
        options: FetchOptions,
        key: &str,
    ) -> Result<T> {
        let response = self.fetch_with_fallback(url, options, Some(key)).await?;
        response.json::<T>().map_err(|e| OffkitError::Parse {
            key: key.to_string(),
            schema: T::SCHEMA.to_string(),
            message: e.to_string(),
        })
    }

    pub fn store(&self) -> &Arc<OfflineStore> {
        &self.store
    }

    fn capture(&self, key: &str, response: &Response) {
        match response.json::<JsonValue>() {
            Ok(JsonValue::Null) => trace!(key, "Null body, not captured"),
            Ok(data) => {
                if !self.store.store(key, &data) {
                    debug!(key, "Offline capture skipped");
                }
            }
            Err(e) => trace!(key, error = %e, "Body is not JSON, not captured"),
        }
    }

    fn fallback(&self, url: &Url, key: Option<&str>) -> Option<Response> {
        let data = self.store.get(key?)?;
        debug!(url = %url, key = ?key, "Serving offline data");
        Some(Response::synthesized_json(url.clone(), StatusCode::OK, &data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityState;
    use offkit_net::ScriptedFetcher;
    use serde_json::json;

    struct Setup {
        fetcher: Arc<ScriptedFetcher>,
        monitor: Arc<ConnectivityMonitor>,
        store: Arc<OfflineStore>,
        gateway: FetchGateway,
    }

    fn setup() -> Setup {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityState::Online));
        let store = Arc::new(OfflineStore::in_memory());
        let gateway = FetchGateway::new(
            Url::parse("https://app.test/").unwrap(),
            fetcher.clone(),
            monitor.clone(),
            store.clone(),
            GatewayConfig::default(),
        );
        Setup {
            fetcher,
            monitor,
            store,
            gateway,
        }
    }

    #[tokio::test]
    async fn test_relative_url_resolved_against_origin() {
        let s = setup();
        s.fetcher.respond("https://app.test/api/ping", 200, "pong");

        let response = s
            .gateway
            .fetch_with_fallback("/api/ping", FetchOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "pong");
        assert_eq!(s.fetcher.calls(), vec!["https://app.test/api/ping"]);
    }

    #[tokio::test]
    async fn test_null_body_not_captured() {
        let s = setup();
        s.fetcher
            .respond_json("https://app.test/api/empty", 200, &JsonValue::Null);

        s.gateway
            .fetch_with_fallback("/api/empty", FetchOptions::default(), Some("empty"))
            .await
            .unwrap();
        assert!(s.store.get("empty").is_none());
    }

    #[tokio::test]
    async fn test_non_json_body_not_captured() {
        let s = setup();
        s.fetcher.respond("https://app.test/page", 200, "<html></html>");

        let response = s
            .gateway
            .fetch_with_fallback("/page", FetchOptions::default(), Some("page"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert!(s.store.get("page").is_none());
    }

    #[tokio::test]
    async fn test_offline_uses_store_without_network() {
        let s = setup();
        s.store.store("grades", &json!([90]));
        s.monitor.handle_signal(ConnectivityState::Offline);

        let response = s
            .gateway
            .fetch_with_fallback("/api/grades", FetchOptions::default(), Some("grades"))
            .await
            .unwrap();
        assert_eq!(response.json::<JsonValue>().unwrap(), json!([90]));
        assert!(s.fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_without_key_is_no_offline_data() {
        let s = setup();
        s.monitor.handle_signal(ConnectivityState::Offline);

        let err = s
            .gateway
            .fetch_with_fallback("/api/grades", FetchOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OffkitError::NoOfflineData { key: None }));
    }

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct Grades {
        items: Vec<u32>,
    }

    impl OfflinePayload for Grades {
        const SCHEMA: &'static str = "grades";
    }

    #[tokio::test]
    async fn test_fetch_typed_parse_failure_names_key_and_schema() {
        let s = setup();
        s.fetcher
            .respond_json("https://app.test/api/grades", 200, &json!({ "wrong": true }));

        let err = s
            .gateway
            .fetch_typed::<Grades>("/api/grades", FetchOptions::default(), "grades")
            .await
            .unwrap_err();
        match err {
            OffkitError::Parse { key, schema, .. } => {
                assert_eq!(key, "grades");
                assert_eq!(schema, "grades");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_typed_success() {
        let s = setup();
        s.fetcher
            .respond_json("https://app.test/api/grades", 200, &json!({ "items": [1, 2] }));

        let grades = s
            .gateway
            .fetch_typed::<Grades>("/api/grades", FetchOptions::default(), "grades")
            .await
            .unwrap();
        assert_eq!(grades.items, vec![1, 2]);
    }
}
