//! Worker registration, install/activate lifecycle and controlled clients.

use bytes::Bytes;
use futures::future::try_join_all;
use hashbrown::HashMap;
use offkit_common::WorkerConfig;
use offkit_net::{Fetcher, Request, Response, Url};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::sync::{
    LoggingPushHandler, LoggingSyncHandler, PushHandler, SyncHandler, SyncManager, SyncReport,
};
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Pre-warming the static bucket.
    Installing,
    /// Installed, waiting to take over.
    Installed,
    /// Evicting stale buckets.
    Activating,
    /// Controlling clients.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// A worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub script_url: Url,
    pub state: WorkerState,
    /// Take over as soon as installed instead of waiting for clients to close.
    pub skip_waiting: bool,
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: WorkerState::Parsed,
            skip_waiting: false,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

// ==================== Registration ====================

/// The installing / waiting / active slots for one scope.
#[derive(Debug)]
pub struct Registration {
    pub scope: Url,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
    pub last_update_check: Option<Instant>,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update_check: None,
        }
    }

    /// Start installing a new worker. A worker already installing is
    /// superseded.
    pub fn update(&mut self, script_url: Url) -> ServiceWorkerId {
        if let Some(mut previous) = self.installing.take() {
            previous.set_state(WorkerState::Redundant);
        }

        let mut worker = ServiceWorker::new(script_url);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        self.last_update_check = Some(Instant::now());
        id
    }

    fn is_installing(&self, id: ServiceWorkerId) -> bool {
        self.installing.as_ref().is_some_and(|w| w.id == id)
    }

    /// Transition the installing worker `id` to waiting. `false` when `id`
    /// is no longer the installing worker.
    pub fn install_complete(&mut self, id: ServiceWorkerId) -> bool {
        if !self.is_installing(id) {
            return false;
        }
        let Some(mut worker) = self.installing.take() else {
            return false;
        };
        worker.set_state(WorkerState::Installed);
        worker.skip_waiting = true;
        if let Some(mut superseded) = self.waiting.replace(worker) {
            superseded.set_state(WorkerState::Redundant);
        }
        true
    }

    /// Discard the installing worker `id`. `false` when it was already
    /// superseded.
    pub fn install_failed(&mut self, id: ServiceWorkerId) -> bool {
        if !self.is_installing(id) {
            return false;
        }
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(WorkerState::Redundant);
        }
        true
    }

    /// Promote the waiting worker. Returns the new and the replaced worker.
    pub fn activate(&mut self) -> Option<(ServiceWorkerId, Option<ServiceWorkerId>)> {
        let mut worker = self.waiting.take()?;
        worker.set_state(WorkerState::Activating);

        let replaced = self.active.take().map(|mut old| {
            old.set_state(WorkerState::Redundant);
            old.id
        });

        worker.set_state(WorkerState::Activated);
        let id = worker.id;
        self.active = Some(worker);
        Some((id, replaced))
    }

    /// The active worker, if any.
    pub fn controller(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }
}

// ==================== Clients ====================

/// A page the worker may control.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub controller: Option<ServiceWorkerId>,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened page.
    pub fn add(&mut self, url: Url) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        self.clients.insert(
            id.clone(),
            Client {
                id: id.clone(),
                url,
                controller: None,
            },
        );
        id
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Put every client under `worker`. Returns the ids whose controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }
}

// ==================== Events ====================

/// Worker events, observed by the page context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A worker changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        state: WorkerState,
    },
    /// A new worker installed while another one controls the page.
    UpdateAvailable { scope: String },
    /// A client is now controlled by a different worker.
    ControllerChange { client_id: String },
}

// ==================== Lifecycle ====================

/// Drives install and activation for one scope and owns the worker-side
/// extension points.
pub struct WorkerLifecycle {
    config: WorkerConfig,
    caches: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
    registration: RwLock<Registration>,
    clients: RwLock<Clients>,
    sync: SyncManager,
    push: Arc<dyn PushHandler>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerLifecycle {
    /// Create a lifecycle for `scope`. The receiver yields [`WorkerEvent`]s.
    pub fn new(
        config: WorkerConfig,
        scope: Url,
        caches: Arc<RwLock<CacheStorage>>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let sync = SyncManager::new(config.sync_tag.clone(), Arc::new(LoggingSyncHandler));

        (
            Self {
                config,
                caches,
                fetcher,
                registration: RwLock::new(Registration::new(scope)),
                clients: RwLock::new(Clients::new()),
                sync,
                push: Arc::new(LoggingPushHandler),
                event_tx,
            },
            event_rx,
        )
    }

    /// Replace the background sync handler.
    pub fn with_sync_handler(mut self, handler: Arc<dyn SyncHandler>) -> Self {
        self.sync = SyncManager::new(self.config.sync_tag.clone(), handler);
        self
    }

    /// Replace the push handler.
    pub fn with_push_handler(mut self, handler: Arc<dyn PushHandler>) -> Self {
        self.push = handler;
        self
    }

    pub fn caches(&self) -> &Arc<RwLock<CacheStorage>> {
        &self.caches
    }

    pub fn sync_manager(&self) -> &SyncManager {
        &self.sync
    }

    /// Install a new worker from `script_url` (absolute, or relative to the scope).
    ///
    /// The manifest is fetched in full before anything is written: one
    /// failed or non-OK entry leaves the static bucket untouched and the
    /// worker redundant.
    pub async fn install(&self, script_url: &str) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let (scope, id) = {
            let mut registration = self.registration.write().await;
            let resolved = registration
                .scope
                .join(script_url)
                .map_err(|e| ServiceWorkerError::RegistrationFailed(format!("{script_url}: {e}")))?;
            let id = registration.update(resolved);
            (registration.scope.clone(), id)
        };

        info!(worker = ?id, scope = %scope, "Installing worker");
        self.emit(WorkerEvent::StateChange {
            worker_id: id,
            state: WorkerState::Installing,
        });

        let entries = match self.fetch_manifest(&scope).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(worker = ?id, error = %e, "Install failed");
                self.registration.write().await.install_failed(id);
                self.emit(WorkerEvent::StateChange {
                    worker_id: id,
                    state: WorkerState::Redundant,
                });
                return Err(e);
            }
        };

        if !self.registration.read().await.is_installing(id) {
            return Err(self.superseded(id));
        }

        {
            let bucket = self.config.static_bucket();
            let mut caches = self.caches.write().await;
            let cache = caches.open(&bucket);
            for (request, response) in &entries {
                cache.put(request, response)?;
            }
            info!(cache = %bucket, entries = entries.len(), "Pre-warmed static cache");
        }

        let has_controller = {
            let mut registration = self.registration.write().await;
            if !registration.install_complete(id) {
                drop(registration);
                return Err(self.superseded(id));
            }
            registration.controller().is_some()
        };

        self.emit(WorkerEvent::StateChange {
            worker_id: id,
            state: WorkerState::Installed,
        });

        if has_controller {
            info!(scope = %scope, "New worker installed, update available");
            self.emit(WorkerEvent::UpdateAvailable {
                scope: scope.to_string(),
            });
        }

        Ok(id)
    }

    fn superseded(&self, id: ServiceWorkerId) -> ServiceWorkerError {
        info!(worker = ?id, "Install superseded by a newer worker");
        self.emit(WorkerEvent::StateChange {
            worker_id: id,
            state: WorkerState::Redundant,
        });
        ServiceWorkerError::Superseded(id)
    }

    async fn fetch_manifest(
        &self,
        scope: &Url,
    ) -> Result<Vec<(Request, Response)>, ServiceWorkerError> {
        let requests = self
            .config
            .precache
            .iter()
            .map(|path| {
                scope
                    .join(path)
                    .map(Request::get)
                    .map_err(|e| ServiceWorkerError::InstallFailed(format!("{path}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        try_join_all(requests.into_iter().map(|request| async move {
            let response = self.fetcher.fetch(request.clone()).await?;
            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed(format!(
                    "{} returned {}",
                    request.url, response.status
                )));
            }
            debug!(url = %request.url, "Fetched precache entry");
            Ok::<_, ServiceWorkerError>((request, response))
        }))
        .await
    }

    /// Activate the waiting worker: evict stale buckets, take over from the
    /// previous worker and claim every client.
    pub async fn activate(&self) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let id = {
            let mut registration = self.registration.write().await;
            let waiting = registration.waiting.as_mut().ok_or_else(|| {
                ServiceWorkerError::StateError("No waiting worker to activate".to_string())
            })?;
            waiting.set_state(WorkerState::Activating);
            waiting.id
        };

        info!(worker = ?id, "Activating worker");
        self.emit(WorkerEvent::StateChange {
            worker_id: id,
            state: WorkerState::Activating,
        });

        let evicted = self.evict_stale_buckets().await;
        if !evicted.is_empty() {
            info!(?evicted, "Evicted stale caches");
        }

        let replaced = self
            .registration
            .write()
            .await
            .activate()
            .and_then(|(_, replaced)| replaced);

        if let Some(old) = replaced {
            self.emit(WorkerEvent::StateChange {
                worker_id: old,
                state: WorkerState::Redundant,
            });
        }
        self.emit(WorkerEvent::StateChange {
            worker_id: id,
            state: WorkerState::Activated,
        });

        let claimed = self.clients.write().await.claim(id);
        debug!(worker = ?id, clients = claimed.len(), "Claimed clients");
        for client_id in claimed {
            self.emit(WorkerEvent::ControllerChange { client_id });
        }

        Ok(id)
    }

    async fn evict_stale_buckets(&self) -> Vec<String> {
        let current = self.config.current_buckets();
        let mut caches = self.caches.write().await;

        let stale: Vec<String> = caches
            .keys()
            .into_iter()
            .filter(|name| !current.contains(name))
            .collect();

        for name in &stale {
            debug!(cache = %name, "Deleting old cache");
            caches.delete(name);
        }
        stale
    }

    /// Install and immediately activate.
    pub async fn register(&self, script_url: &str) -> Result<ServiceWorkerId, ServiceWorkerError> {
        self.install(script_url).await?;
        self.activate().await
    }

    /// Track a page opened in this scope. Returns its client id.
    pub async fn open_client(&self, url: Url) -> String {
        let mut clients = self.clients.write().await;
        let id = clients.add(url);
        if let Some(active) = self.registration.read().await.controller() {
            let _ = clients.claim(active.id);
        }
        id
    }

    /// Controller of a client.
    pub async fn client_controller(&self, client_id: &str) -> Option<ServiceWorkerId> {
        self.clients
            .read()
            .await
            .get(client_id)
            .and_then(|c| c.controller)
    }

    /// The active worker.
    pub async fn controller(&self) -> Option<ServiceWorker> {
        self.registration.read().await.controller().cloned()
    }

    /// The installed worker waiting to activate.
    pub async fn waiting(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    /// Queue a background sync tag.
    pub fn register_sync(&self, tag: &str) {
        self.sync.register(tag);
    }

    /// Run queued sync tags; call when connectivity returns.
    pub async fn dispatch_sync(&self) -> SyncReport {
        self.sync.dispatch().await
    }

    /// Deliver a push message.
    pub async fn handle_push(&self, payload: Option<Bytes>) {
        self.push.push(payload).await;
    }

    fn emit(&self, event: WorkerEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Worker event dropped, no listener");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_worker_creation() {
        let worker = ServiceWorker::new(url("https://app.test/sw.js"));
        assert_eq!(worker.state, WorkerState::Parsed);
        assert!(!worker.is_active());
        assert!(!worker.skip_waiting);
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut registration = Registration::new(url("https://app.test/"));
        let id = registration.update(url("https://app.test/sw.js"));
        assert_eq!(
            registration.installing.as_ref().unwrap().state,
            WorkerState::Installing
        );

        assert!(registration.install_complete(id));
        assert!(registration.installing.is_none());
        assert!(registration.waiting.as_ref().unwrap().skip_waiting);

        let (active, replaced) = registration.activate().unwrap();
        assert_eq!(active, id);
        assert_eq!(replaced, None);
        assert!(registration.controller().unwrap().is_active());
        assert!(registration.waiting.is_none());
    }

    #[test]
    fn test_activation_replaces_old_worker() {
        let mut registration = Registration::new(url("https://app.test/"));
        let first = registration.update(url("https://app.test/sw.js"));
        registration.install_complete(first);
        registration.activate();

        let second = registration.update(url("https://app.test/sw.js?v=2"));
        registration.install_complete(second);
        let (active, replaced) = registration.activate().unwrap();

        assert_eq!(active, second);
        assert_eq!(replaced, Some(first));
    }

    #[test]
    fn test_install_failed() {
        let mut registration = Registration::new(url("https://app.test/"));
        let id = registration.update(url("https://app.test/sw.js"));
        assert!(registration.install_failed(id));
        assert!(registration.installing.is_none());
        assert!(registration.waiting.is_none());
        assert!(registration.activate().is_none());
    }

    #[test]
    fn test_stale_install_cannot_promote_newer_worker() {
        let mut registration = Registration::new(url("https://app.test/"));
        let first = registration.update(url("https://app.test/sw.js"));
        let second = registration.update(url("https://app.test/sw.js?v=2"));

        assert!(!registration.install_complete(first));
        assert!(!registration.install_failed(first));
        assert_eq!(registration.installing.as_ref().unwrap().id, second);

        assert!(registration.install_complete(second));
        assert_eq!(registration.waiting.as_ref().unwrap().id, second);
    }

    #[test]
    fn test_clients_claim() {
        let mut clients = Clients::new();
        let a = clients.add(url("https://app.test/"));
        let b = clients.add(url("https://app.test/matrix"));
        let worker = ServiceWorkerId::new();

        let mut expected = vec![a.clone(), b];
        expected.sort();
        assert_eq!(clients.claim(worker), expected);
        assert!(clients.claim(worker).is_empty());
        assert_eq!(clients.get(&a).unwrap().controller, Some(worker));
    }
}
