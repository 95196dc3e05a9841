//! Fetch interception: one caching strategy per request class.

use http::StatusCode;
use offkit_common::WorkerConfig;
use offkit_net::{Fetcher, NetError, PatternSet, Request, RequestMode, Response, UrlPattern};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::cache::CacheStorage;
use crate::tasks::BackgroundTasks;
use crate::ServiceWorkerError;

/// How an intercepted request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Top-level page load: stale-while-revalidate.
    Navigation,
    /// Backend call: network-first with a synthesized offline error.
    ApiCall,
    /// Style, script, image or font: cache-first.
    StaticAsset,
    /// Anything else: network-first with a bare cache fallback.
    Other,
}

/// Result of routing one request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the platform handles the request itself.
    Passthrough,
    /// Deliver this response.
    Respond(Response),
    /// Intercepted but nothing to deliver.
    Empty,
    /// Network failure with no fallback.
    Failed(NetError),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            _ => None,
        }
    }
}

/// Routes intercepted requests through the cache buckets and the network.
pub struct CacheRouter {
    caches: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
    api_patterns: PatternSet,
    static_bucket: String,
    dynamic_bucket: String,
    tasks: BackgroundTasks,
}

impl CacheRouter {
    /// Build a router over shared cache storage.
    pub fn new(
        config: &WorkerConfig,
        caches: Arc<RwLock<CacheStorage>>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        let mut api_patterns = PatternSet::from_regexes(&config.api_patterns)?;
        if let Some(host) = config.backend_host.as_deref().filter(|h| !h.is_empty()) {
            api_patterns.push(UrlPattern::host_contains(host));
        }

        Ok(Self {
            caches,
            fetcher,
            api_patterns,
            static_bucket: config.static_bucket(),
            dynamic_bucket: config.dynamic_bucket(),
            tasks: BackgroundTasks::new(),
        })
    }

    /// Shared cache storage.
    pub fn caches(&self) -> &Arc<RwLock<CacheStorage>> {
        &self.caches
    }

    /// Class of a request, or `None` if it is not intercepted at all.
    pub fn classify(&self, request: &Request) -> Option<RequestClass> {
        if !request.is_http() {
            return None;
        }

        let class = if request.mode == RequestMode::Navigate {
            RequestClass::Navigation
        } else if self.api_patterns.matches(&request.url) {
            RequestClass::ApiCall
        } else if request.destination.is_static_asset() {
            RequestClass::StaticAsset
        } else {
            RequestClass::Other
        };
        Some(class)
    }

    /// Handle an intercepted request.
    pub async fn handle(&self, request: Request) -> FetchOutcome {
        let Some(class) = self.classify(&request) else {
            trace!(url = %request.url, "Not intercepting non-HTTP request");
            return FetchOutcome::Passthrough;
        };

        trace!(url = %request.url, ?class, "Routing request");

        match class {
            RequestClass::Navigation => self.stale_while_revalidate(request).await,
            RequestClass::ApiCall => self.network_first_api(request).await,
            RequestClass::StaticAsset => self.cache_first(request).await,
            RequestClass::Other => self.network_first(request).await,
        }
    }

    /// Wait for all background revalidation to finish.
    pub async fn settle(&self) {
        self.tasks.settle().await;
    }

    async fn stale_while_revalidate(&self, request: Request) -> FetchOutcome {
        let cached = self.caches.read().await.match_request(&request);

        if let Some(cached) = cached {
            debug!(url = %request.url, "Serving navigation from cache, revalidating");
            self.revalidate(request);
            return FetchOutcome::Respond(cached);
        }

        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.status == StatusCode::OK {
                    put(&self.caches, &self.static_bucket, &request, &response).await;
                }
                FetchOutcome::Respond(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation failed, serving offline page");
                let root = self.caches.read().await.match_path(&request.url, "/");
                FetchOutcome::Respond(root.unwrap_or_else(|| {
                    Response::synthesized_text(
                        request.url.clone(),
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Offline",
                    )
                }))
            }
        }
    }

    fn revalidate(&self, request: Request) {
        let caches = self.caches.clone();
        let fetcher = self.fetcher.clone();
        let bucket = self.static_bucket.clone();

        self.tasks.spawn(async move {
            match fetcher.fetch(request.clone()).await {
                Ok(response) if response.status == StatusCode::OK => {
                    put(&caches, &bucket, &request, &response).await;
                }
                Ok(response) => {
                    trace!(url = %request.url, status = %response.status, "Revalidation not stored");
                }
                Err(e) => {
                    trace!(url = %request.url, error = %e, "Revalidation failed");
                }
            }
        });
    }

    async fn network_first_api(&self, request: Request) -> FetchOutcome {
        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.status == StatusCode::OK {
                    put(&self.caches, &self.dynamic_bucket, &request, &response).await;
                }
                FetchOutcome::Respond(response)
            }
            Err(e) => {
                let cached = self.caches.read().await.match_request(&request);
                match cached {
                    Some(cached) => {
                        debug!(url = %request.url, error = %e, "API request failed, serving cached copy");
                        FetchOutcome::Respond(cached)
                    }
                    None => {
                        debug!(url = %request.url, error = %e, "API request failed, nothing cached");
                        FetchOutcome::Respond(Response::synthesized_json(
                            request.url,
                            StatusCode::SERVICE_UNAVAILABLE,
                            &serde_json::json!({
                                "error": "Offline",
                                "message": "This data is not available offline",
                            }),
                        ))
                    }
                }
            }
        }
    }

    async fn cache_first(&self, request: Request) -> FetchOutcome {
        let cached = self.caches.read().await.match_request(&request);
        if let Some(cached) = cached {
            trace!(url = %request.url, "Static asset served from cache");
            return FetchOutcome::Respond(cached);
        }

        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.status == StatusCode::OK {
                    put(&self.caches, &self.static_bucket, &request, &response).await;
                }
                FetchOutcome::Respond(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Static asset unavailable");
                FetchOutcome::Failed(e)
            }
        }
    }

    async fn network_first(&self, request: Request) -> FetchOutcome {
        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.status == StatusCode::OK {
                    put(&self.caches, &self.dynamic_bucket, &request, &response).await;
                }
                FetchOutcome::Respond(response)
            }
            Err(e) => {
                let cached = self.caches.read().await.match_request(&request);
                debug!(url = %request.url, error = %e, hit = cached.is_some(), "Request failed, trying cache");
                match cached {
                    Some(cached) => FetchOutcome::Respond(cached),
                    None => FetchOutcome::Empty,
                }
            }
        }
    }
}

async fn put(caches: &RwLock<CacheStorage>, bucket: &str, request: &Request, response: &Response) {
    let mut caches = caches.write().await;
    if let Err(e) = caches.open(bucket).put(request, response) {
        warn!(cache = bucket, url = %request.url, error = %e, "Failed to cache response");
    }
}
