//! Root of the page context.

use offkit_common::{OfflineConfig, Result};
use offkit_net::{Fetcher, Url};
use offkit_store::OfflineStore;
use offkit_sw::WorkerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::gateway::FetchGateway;
use crate::indicator::StatusIndicator;
use crate::probe::NetworkProbe;
use crate::update::UpdatePrompt;

const SIGNAL_BUFFER: usize = 16;

/// Owns the page-side components and hands out shared handles to them.
pub struct PageContext {
    config: OfflineConfig,
    origin: Url,
    monitor: Arc<ConnectivityMonitor>,
    indicator: Arc<StatusIndicator>,
    store: Arc<OfflineStore>,
    gateway: Arc<FetchGateway>,
    signals: mpsc::Sender<ConnectivityState>,
    tasks: Vec<JoinHandle<()>>,
}

impl PageContext {
    /// Build every component from `config`. Must run inside a tokio runtime.
    pub fn new(config: OfflineConfig, origin: Url, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        config.validate()?;

        let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityState::Online));
        let indicator = StatusIndicator::attach(&monitor)?;
        let store = Arc::new(OfflineStore::open(&config.store)?);
        let gateway = Arc::new(FetchGateway::new(
            origin.clone(),
            fetcher.clone(),
            monitor.clone(),
            store.clone(),
            config.gateway.clone(),
        ));

        let (signals, rx) = mpsc::channel(SIGNAL_BUFFER);
        let mut tasks = vec![monitor.listen(rx)];

        if let Some(probe) = NetworkProbe::from_config(&config.probe, &origin, fetcher)? {
            tasks.push(probe.spawn(signals.clone()));
        }

        info!(origin = %origin, "Page context ready");

        Ok(Self {
            config,
            origin,
            monitor,
            indicator,
            store,
            gateway,
            signals,
            tasks,
        })
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn monitor(&self) -> Arc<ConnectivityMonitor> {
        self.monitor.clone()
    }

    pub fn indicator(&self) -> Arc<StatusIndicator> {
        self.indicator.clone()
    }

    pub fn store(&self) -> Arc<OfflineStore> {
        self.store.clone()
    }

    pub fn gateway(&self) -> Arc<FetchGateway> {
        self.gateway.clone()
    }

    /// Sender for platform connectivity signals.
    pub fn signals(&self) -> mpsc::Sender<ConnectivityState> {
        self.signals.clone()
    }

    /// Show an update prompt for events coming from the worker.
    pub fn watch_updates<F>(
        &mut self,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        reload: F,
    ) -> Arc<UpdatePrompt>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let prompt = UpdatePrompt::new(reload);
        self.tasks.push(prompt.listen(events));
        prompt
    }
}

impl Drop for PageContext {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
