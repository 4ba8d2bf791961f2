//! Periodic background tasks with deterministic shutdown.
//!
//! Cache sweeps, metric pruning and pool health checks all run as named
//! periodic tasks owned by one scheduler. Shutdown cancels the shared token
//! and joins every task, so teardown never depends on process exit.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct TaskScheduler {
    token: CancellationToken,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a task running `work` every `interval` until shutdown. The
    /// first run happens one interval after spawning, not immediately.
    pub fn spawn_periodic<F, Fut>(&self, name: &str, interval: Duration, work: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = self.token.child_token();
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick completes immediately; swallow it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => work().await,
                }
            }
            debug!("periodic task {task_name} stopped");
        });
        self.handles.lock().push((name.to_string(), handle));
    }

    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Cancel everything and wait for the tasks to wind down.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handles: Vec<(String, JoinHandle<()>)> = self.handles.lock().drain(..).collect();
        for (name, handle) in handles {
            if let Err(err) = handle.await {
                // a panicked task is worth surfacing, an aborted one is not
                if !err.is_cancelled() {
                    tracing::warn!("periodic task {name} ended abnormally: {err}");
                }
            }
        }
        info!("task scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_runs_on_interval() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        scheduler.spawn_periodic("counter", Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_tasks() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        scheduler.spawn_periodic("counter", Duration::from_secs(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await;
        let after_shutdown = runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
        assert_eq!(scheduler.task_count(), 0);
    }
}
