//! Background sync and push extension points.

use bytes::Bytes;
use futures::future::BoxFuture;
use offkit_common::{retry_with_backoff, RetryPolicy};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::ServiceWorkerError;

/// Work to run when a sync tag fires.
pub trait SyncHandler: Send + Sync {
    fn sync<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<(), ServiceWorkerError>>;
}

/// Default handler: logs and succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSyncHandler;

impl SyncHandler for LoggingSyncHandler {
    fn sync<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<(), ServiceWorkerError>> {
        Box::pin(async move {
            info!(tag, "Syncing offline data");
            Ok(())
        })
    }
}

/// Receives push messages.
pub trait PushHandler: Send + Sync {
    fn push(&self, payload: Option<Bytes>) -> BoxFuture<'_, ()>;
}

/// Default handler: logs the message size.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPushHandler;

impl PushHandler for LoggingPushHandler {
    fn push(&self, payload: Option<Bytes>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!(bytes = payload.map(|p| p.len()).unwrap_or(0), "Push message received");
        })
    }
}

/// Outcome of one dispatch round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub dropped: Vec<String>,
}

/// Queue of pending sync tags.
///
/// Only the configured tag has work attached; any other tag is dropped when
/// dispatched. A failing tag stays queued for the next round.
pub struct SyncManager {
    tag: String,
    pending: Mutex<Vec<String>>,
    handler: Arc<dyn SyncHandler>,
    policy: RetryPolicy,
}

impl SyncManager {
    pub fn new(tag: impl Into<String>, handler: Arc<dyn SyncHandler>) -> Self {
        Self {
            tag: tag.into(),
            pending: Mutex::new(Vec::new()),
            handler,
            policy: RetryPolicy::default(),
        }
    }

    /// Override the retry policy used per dispatch.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The tag this manager does work for.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Queue a tag. Registering a queued tag again is a no-op.
    pub fn register(&self, tag: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if !pending.iter().any(|t| t == tag) {
            debug!(tag, "Sync registered");
            pending.push(tag.to_string());
        }
    }

    /// Tags waiting to run, in registration order.
    pub fn pending(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run every queued tag.
    pub async fn dispatch(&self) -> SyncReport {
        let tags = self.pending();
        let mut report = SyncReport::default();

        for tag in tags {
            if tag != self.tag {
                debug!(tag = %tag, "No handler for sync tag, dropping");
                self.remove(&tag);
                report.dropped.push(tag);
                continue;
            }

            let handler = &self.handler;
            let tag_ref = tag.as_str();
            let result =
                retry_with_backoff(&self.policy, "background-sync", || handler.sync(tag_ref)).await;

            match result {
                Ok(()) => {
                    info!(tag = %tag, "Background sync completed");
                    self.remove(&tag);
                    report.completed.push(tag);
                }
                Err(e) => {
                    warn!(tag = %tag, error = %e, "Background sync failed, keeping queued");
                    report.failed.push(tag);
                }
            }
        }

        report
    }

    fn remove(&self, tag: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| t != tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TAG: &str = "background-sync-matrix-data";

    struct FlakyHandler {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl SyncHandler for FlakyHandler {
        fn sync<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<(), ServiceWorkerError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let left = self.failures_left.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                    return Err(ServiceWorkerError::SyncFailed {
                        tag: tag.to_string(),
                        message: "server unreachable".to_string(),
                    });
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_register_dedupes() {
        let manager = SyncManager::new(TAG, Arc::new(LoggingSyncHandler));
        manager.register(TAG);
        manager.register(TAG);
        assert_eq!(manager.pending(), vec![TAG.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_retries_then_completes() {
        let handler = Arc::new(FlakyHandler::new(2));
        let manager = SyncManager::new(TAG, handler.clone());
        manager.register(TAG);

        let report = manager.dispatch().await;
        assert_eq!(report.completed, vec![TAG.to_string()]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(manager.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tag_stays_queued() {
        let handler = Arc::new(FlakyHandler::new(10));
        let manager = SyncManager::new(TAG, handler.clone()).with_policy(RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        });
        manager.register(TAG);

        let report = manager.dispatch().await;
        assert_eq!(report.failed, vec![TAG.to_string()]);
        assert_eq!(manager.pending(), vec![TAG.to_string()]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_tag_dropped() {
        let handler = Arc::new(FlakyHandler::new(0));
        let manager = SyncManager::new(TAG, handler.clone());
        manager.register("outbox");

        let report = manager.dispatch().await;
        assert_eq!(report.dropped, vec!["outbox".to_string()]);
        assert!(manager.pending().is_empty());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_logging_push_handler() {
        LoggingPushHandler
            .push(Some(Bytes::from_static(b"{\"title\":\"hi\"}")))
            .await;
        LoggingPushHandler.push(None).await;
    }
}
