//! Connection status indicator view model.

use offkit_common::{OffkitError, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::trace;

use crate::connectivity::ConnectivityMonitor;

/// How long "Back online" stays fully visible.
pub const ONLINE_DISPLAY: Duration = Duration::from_secs(3);

/// Fade-out time before the indicator is removed.
pub const FADE_OUT: Duration = Duration::from_millis(300);

/// What the UI should draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorView {
    Hidden,
    BackOnline { fading: bool },
    Offline,
}

impl IndicatorView {
    pub fn label(&self) -> Option<&'static str> {
        match self {
            IndicatorView::Hidden => None,
            IndicatorView::BackOnline { .. } => Some("Back online"),
            IndicatorView::Offline => Some("Offline mode"),
        }
    }
}

#[derive(Debug)]
struct IndicatorState {
    view: IndicatorView,
    generation: u64,
}

/// Status indicator driven by monitor callbacks.
///
/// Each transition bumps a generation counter; a pending fade or removal
/// only applies if no newer transition happened in the meantime.
#[derive(Debug)]
pub struct StatusIndicator {
    state: Mutex<IndicatorState>,
    runtime: Handle,
}

impl StatusIndicator {
    /// Register with `monitor`. Must be called from within a tokio runtime.
    pub fn attach(monitor: &ConnectivityMonitor) -> Result<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| OffkitError::internal(format!("status indicator needs a runtime: {e}")))?;

        let indicator = Arc::new(Self {
            state: Mutex::new(IndicatorState {
                view: IndicatorView::Hidden,
                generation: 0,
            }),
            runtime,
        });

        {
            let indicator = indicator.clone();
            monitor.on_online(move || indicator.show_online());
        }
        {
            let indicator = indicator.clone();
            monitor.on_offline(move || indicator.show_offline());
        }

        Ok(indicator)
    }

    /// Current view.
    pub fn current(&self) -> IndicatorView {
        self.lock().view
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndicatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, view: IndicatorView) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.view = view;
        trace!(?view, generation = state.generation, "Indicator updated");
        state.generation
    }

    fn set_if_current(&self, generation: u64, view: IndicatorView) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.view = view;
        true
    }

    fn show_online(self: &Arc<Self>) {
        let generation = self.transition(IndicatorView::BackOnline { fading: false });
        let indicator = self.clone();

        self.runtime.spawn(async move {
            tokio::time::sleep(ONLINE_DISPLAY).await;
            if !indicator.set_if_current(generation, IndicatorView::BackOnline { fading: true }) {
                return;
            }
            tokio::time::sleep(FADE_OUT).await;
            indicator.set_if_current(generation, IndicatorView::Hidden);
        });
    }

    fn show_offline(&self) {
        self.transition(IndicatorView::Offline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityState;
    use tokio::time::sleep;

    fn setup() -> (ConnectivityMonitor, Arc<StatusIndicator>) {
        let monitor = ConnectivityMonitor::new(ConnectivityState::Online);
        let indicator = StatusIndicator::attach(&monitor).unwrap();
        (monitor, indicator)
    }

    #[test]
    fn test_attach_outside_runtime_fails() {
        let monitor = ConnectivityMonitor::new(ConnectivityState::Online);
        assert!(StatusIndicator::attach(&monitor).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_is_persistent() {
        let (monitor, indicator) = setup();
        assert_eq!(indicator.current(), IndicatorView::Hidden);

        monitor.handle_signal(ConnectivityState::Offline);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(indicator.current(), IndicatorView::Offline);
        assert_eq!(indicator.current().label(), Some("Offline mode"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_online_fades_then_hides() {
        let (monitor, indicator) = setup();
        monitor.handle_signal(ConnectivityState::Offline);
        monitor.handle_signal(ConnectivityState::Online);
        assert_eq!(
            indicator.current(),
            IndicatorView::BackOnline { fading: false }
        );

        sleep(Duration::from_millis(2_999)).await;
        assert_eq!(
            indicator.current(),
            IndicatorView::BackOnline { fading: false }
        );

        sleep(Duration::from_millis(2)).await;
        assert_eq!(
            indicator.current(),
            IndicatorView::BackOnline { fading: true }
        );

        sleep(Duration::from_millis(300)).await;
        assert_eq!(indicator.current(), IndicatorView::Hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_going_offline_cancels_pending_fade() {
        let (monitor, indicator) = setup();
        monitor.handle_signal(ConnectivityState::Offline);
        monitor.handle_signal(ConnectivityState::Online);

        sleep(Duration::from_secs(2)).await;
        monitor.handle_signal(ConnectivityState::Offline);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(indicator.current(), IndicatorView::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_online_restarts_timer() {
        let (monitor, indicator) = setup();
        monitor.handle_signal(ConnectivityState::Offline);
        monitor.handle_signal(ConnectivityState::Online);
        sleep(Duration::from_secs(2)).await;
        monitor.handle_signal(ConnectivityState::Offline);
        monitor.handle_signal(ConnectivityState::Online);

        // First timer expires at 3s but belongs to an older transition.
        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(
            indicator.current(),
            IndicatorView::BackOnline { fading: false }
        );

        sleep(Duration::from_millis(1_600)).await;
        assert_eq!(
            indicator.current(),
            IndicatorView::BackOnline { fading: true }
        );
    }
}
