//! Periodic reachability probe feeding the connectivity monitor.

use http::Method;
use offkit_common::{with_timeout, ProbeConfig};
use offkit_net::{Fetcher, NetError, Request, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connectivity::ConnectivityState;

/// Issues `HEAD` requests to a health URL and reports what it sees.
///
/// Any response, whatever its status, counts as online.
pub struct NetworkProbe {
    fetcher: Arc<dyn Fetcher>,
    url: Url,
    interval: Duration,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(fetcher: Arc<dyn Fetcher>, url: Url, interval: Duration, timeout: Duration) -> Self {
        Self {
            fetcher,
            url,
            interval,
            timeout,
        }
    }

    /// Build from configuration. `None` when no health URL is configured.
    pub fn from_config(
        config: &ProbeConfig,
        origin: &Url,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Option<Self>, NetError> {
        let Some(health_url) = config.health_url.as_deref() else {
            return Ok(None);
        };
        let url = origin
            .join(health_url)
            .map_err(|e| NetError::InvalidUrl(format!("{health_url}: {e}")))?;
        Ok(Some(Self::new(fetcher, url, config.interval(), config.timeout())))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Probe once.
    pub async fn check(&self) -> ConnectivityState {
        let request = Request::new(Method::HEAD, self.url.clone()).timeout(self.timeout);
        match with_timeout(self.timeout, self.fetcher.fetch(request)).await {
            Ok(Ok(response)) => {
                debug!(url = %self.url, status = %response.status, "Probe succeeded");
                ConnectivityState::Online
            }
            Ok(Err(e)) => {
                debug!(url = %self.url, error = %e, "Probe failed");
                ConnectivityState::Offline
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Probe timed out");
                ConnectivityState::Offline
            }
        }
    }

    /// Probe every interval, sending each observation to `signals`. Stops
    /// when the receiver is dropped.
    pub fn spawn(self, signals: mpsc::Sender<ConnectivityState>) -> JoinHandle<()> {
        info!(url = %self.url, interval = ?self.interval, "Starting network probe");
        tokio::spawn(async move {
            loop {
                let state = self.check().await;
                if signals.send(state).await.is_err() {
                    debug!("Probe receiver closed, stopping");
                    break;
                }
                tokio::time::sleep(self.interval).await;
            }
        })
    }
}
