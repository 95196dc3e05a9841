//! Detached background work.

use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{trace, warn};

/// Tracks fire-and-forget tasks so they can be awaited on shutdown.
///
/// Tasks are never cancelled; [`settle`](Self::settle) is the `waitUntil`
/// equivalent and waits until nothing is left running.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task on the current runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(done) = set.try_join_next() {
            log_join(done);
        }
        set.spawn(task);
        trace!(pending = set.len(), "Spawned background task");
    }

    /// Number of tasks not yet reaped.
    pub fn pending(&self) -> usize {
        self.set.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait for every spawned task, including ones spawned while waiting.
    pub async fn settle(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.set.lock().unwrap_or_else(|e| e.into_inner()));
            if set.is_empty() {
                return;
            }
            while let Some(done) = set.join_next().await {
                log_join(done);
            }
        }
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "Background task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_for_all() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let done = done.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10 * (i + 1))).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        tasks.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_poison_settle() {
        let tasks = BackgroundTasks::new();
        tasks.spawn(async { panic!("boom") });
        tasks.settle().await;
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_settle_with_nothing_pending() {
        BackgroundTasks::new().settle().await;
    }
}
