//! Connectivity state and transition callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Whether the platform currently reports network access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Tracks connectivity and notifies registered callbacks on each transition.
///
/// State is written only through [`handle_signal`](Self::handle_signal);
/// everything else reads it.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    on_online: Mutex<Vec<Callback>>,
    on_offline: Mutex<Vec<Callback>>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        Self {
            online: AtomicBool::new(initial.is_online()),
            on_online: Mutex::new(Vec::new()),
            on_offline: Mutex::new(Vec::new()),
        }
    }

    /// Last observed state.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectivityState {
        if self.is_online() {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    /// Run `callback` on every transition to online.
    pub fn on_online<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_online
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    /// Run `callback` on every transition to offline.
    pub fn on_offline<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_offline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    /// Apply a platform signal. Returns `true` if the state changed.
    ///
    /// Callbacks run in registration order, outside the registry lock, so a
    /// callback may register further callbacks.
    pub fn handle_signal(&self, state: ConnectivityState) -> bool {
        let was_online = self.online.swap(state.is_online(), Ordering::SeqCst);
        if was_online == state.is_online() {
            debug!(?state, "Connectivity unchanged");
            return false;
        }

        info!(?state, "Connectivity changed");

        let registry = match state {
            ConnectivityState::Online => &self.on_online,
            ConnectivityState::Offline => &self.on_offline,
        };
        let callbacks: Vec<Callback> = registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for callback in callbacks {
            callback();
        }
        true
    }

    /// Apply every signal received on `signals` until the channel closes.
    pub fn listen(self: &Arc<Self>, mut signals: mpsc::Receiver<ConnectivityState>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            while let Some(state) = signals.recv().await {
                monitor.handle_signal(state);
            }
            debug!("Connectivity signal source closed");
        })
    }
}
