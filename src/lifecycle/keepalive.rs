//! Registry of in-flight work the host must not recycle the context under.
//!
//! Population, activation, invalidation and background revalidation are all
//! spawned through [`KeepAlive`]; shutdown waits for every registered task.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::trace;

#[derive(Clone, Default)]
pub struct KeepAlive {
    tracker: TaskTracker,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` and keep the context alive until it settles.
    pub fn spawn<F>(&self, label: &'static str, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        trace!(label, pending = self.tracker.len() + 1, "Registered pending work");
        self.tracker.spawn(work)
    }

    /// Number of registered tasks that have not finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for everything registered so far. New work may still be added.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting the notion of "more to come" and wait for all work.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_settle_waits_for_spawned_work() {
        let keep_alive = KeepAlive::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            keep_alive.spawn("test", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        keep_alive.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(keep_alive.pending(), 0);
    }

    #[tokio::test]
    async fn test_panicking_work_does_not_escape() {
        let keep_alive = KeepAlive::new();
        let handle = keep_alive.spawn("boom", async { panic!("revalidation exploded") });
        keep_alive.settle().await;
        assert!(handle.await.unwrap_err().is_panic());
    }

    #[tokio::test]
    async fn test_spawn_returns_output() {
        let keep_alive = KeepAlive::new();
        let out = keep_alive.spawn("value", async { 41 + 1 }).await.unwrap();
        assert_eq!(out, 42);
        keep_alive.shutdown().await;
    }
}
