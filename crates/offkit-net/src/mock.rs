//! In-process [`Fetcher`] with scripted answers.
//!
//! Used by the strategy tests across the workspace and by the smoke harness
//! to simulate a dead network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::sync::watch;
use tracing::trace;
use url::Url;

use crate::{cache_key_for, Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum Script {
    Respond {
        status: StatusCode,
        content_type: &'static str,
        body: Bytes,
    },
    Fail,
}

/// Answers requests from a table keyed by URL.
///
/// Unscripted URLs get a `404`. While [`hold`](Self::hold) is in effect every
/// fetch parks until [`release`](Self::release).
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
    gate: watch::Sender<bool>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            gate: watch::Sender::new(true),
        }
    }

    fn script(&self, url: &str, script: Script) {
        let key = Url::parse(url)
            .map(|u| cache_key_for(&u))
            .unwrap_or_else(|_| url.to_string());
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, script);
    }

    /// Answer `url` with a text body.
    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.script(
            url,
            Script::Respond {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
                content_type: "text/html; charset=utf-8",
                body: Bytes::copy_from_slice(body.as_bytes()),
            },
        );
    }

    /// Answer `url` with a JSON body.
    pub fn respond_json(&self, url: &str, status: u16, body: &serde_json::Value) {
        self.script(
            url,
            Script::Respond {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
                content_type: "application/json",
                body: Bytes::from(body.to_string()),
            },
        );
    }

    /// Fail every request for `url` with a connection error.
    pub fn fail(&self, url: &str) {
        self.script(url, Script::Fail);
    }

    /// Fail every request regardless of the script.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Park new and in-flight fetches until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Let parked fetches continue.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// URLs fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of fetches issued for `url`.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == url).count()
    }

    async fn answer(&self, request: Request) -> Result<Response, NetError> {
        let key = request.cache_key();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.clone());

        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = gate.wait_for(|open| *open).await;

        if self.offline.load(Ordering::SeqCst) {
            trace!(url = %key, "Scripted fetch failed: offline");
            return Err(NetError::Connect("network is offline".to_string()));
        }

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();

        match script {
            Some(Script::Respond {
                status,
                content_type,
                body,
            }) => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static(content_type),
                );
                Ok(Response::new(request.url, status, headers, body))
            }
            Some(Script::Fail) => Err(NetError::Connect(format!("connection refused: {key}"))),
            None => Ok(Response::new(
                request.url,
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                Bytes::new(),
            )),
        }
    }
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        Box::pin(self.answer(request))
    }
}
