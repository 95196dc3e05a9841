//! "Update available" prompt driven by worker events.

use offkit_sw::WorkerEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How long the notice stays up without interaction.
pub const AUTO_DISMISS: Duration = Duration::from_secs(10);

/// The notice shown when a new worker version is waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNotice {
    pub scope: String,
    pub title: &'static str,
    pub message: &'static str,
    pub action: &'static str,
}

impl UpdateNotice {
    fn new(scope: String) -> Self {
        Self {
            scope,
            title: "Update Available",
            message: "A new version is available. Refresh to update.",
            action: "Refresh",
        }
    }
}

#[derive(Debug, Default)]
struct PromptState {
    notice: Option<UpdateNotice>,
    generation: u64,
}

type ReloadAction = Arc<dyn Fn() + Send + Sync>;

/// Shows an [`UpdateNotice`] for each `UpdateAvailable` event and runs the
/// reload action when the user accepts it.
pub struct UpdatePrompt {
    state: Mutex<PromptState>,
    reload: ReloadAction,
}

impl UpdatePrompt {
    pub fn new<F>(reload: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Self {
            state: Mutex::new(PromptState::default()),
            reload: Arc::new(reload),
        })
    }

    /// Consume worker events until the channel closes.
    pub fn listen(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<WorkerEvent>) -> JoinHandle<()> {
        let prompt = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let WorkerEvent::UpdateAvailable { scope } = event {
                    prompt.show(scope);
                }
            }
            debug!("Worker event stream closed");
        })
    }

    /// Show the notice and schedule its dismissal.
    pub fn show(self: &Arc<Self>, scope: String) {
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            state.notice = Some(UpdateNotice::new(scope));
            state.generation
        };
        info!("Update available, prompting for refresh");

        let prompt = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(AUTO_DISMISS).await;
            let mut state = prompt.lock();
            if state.generation == generation {
                state.notice = None;
                debug!("Update notice auto-dismissed");
            }
        });
    }

    /// The notice currently shown.
    pub fn current(&self) -> Option<UpdateNotice> {
        self.lock().notice.clone()
    }

    /// Accept the refresh action. Returns `false` if no notice was shown.
    pub fn accept(&self) -> bool {
        let accepted = self.lock().notice.take().is_some();
        if accepted {
            info!("Refreshing to activate update");
            (self.reload)();
        }
        accepted
    }

    /// Close the notice without reloading.
    pub fn dismiss(&self) {
        self.lock().notice = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PromptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn prompt() -> (Arc<UpdatePrompt>, Arc<AtomicUsize>) {
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = reloads.clone();
        let prompt = UpdatePrompt::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (prompt, reloads)
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_reloads() {
        let (prompt, reloads) = prompt();
        assert!(!prompt.accept());

        prompt.show("https://app.test/".to_string());
        assert_eq!(prompt.current().unwrap().title, "Update Available");

        assert!(prompt.accept());
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
        assert!(prompt.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_dismiss() {
        let (prompt, reloads) = prompt();
        prompt.show("https://app.test/".to_string());

        sleep(Duration::from_millis(9_999)).await;
        assert!(prompt.current().is_some());

        sleep(Duration::from_millis(2)).await;
        assert!(prompt.current().is_none());
        assert!(!prompt.accept());
        assert_eq!(reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_ignores_other_events() {
        let (prompt, _) = prompt();
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = prompt.listen(rx);

        tx.send(WorkerEvent::ControllerChange {
            client_id: "client-1".to_string(),
        })
        .unwrap();
        tx.send(WorkerEvent::UpdateAvailable {
            scope: "https://app.test/".to_string(),
        })
        .unwrap();
        drop(tx);
        listener.await.unwrap();

        assert_eq!(prompt.current().unwrap().scope, "https://app.test/");
    }
}
