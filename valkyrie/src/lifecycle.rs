//! Ownership of background tasks and graceful shutdown.

use std::{future::Future, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Root cancellation token plus a tracker for every task spawned under it.
///
/// Clones share the same token and tracker.
#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The root token. Cancelled once by [`Lifecycle::shutdown`].
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A token cancelled together with the root, or on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn a task that shutdown waits for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Number of tracked tasks still running.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel the root token and wait up to `timeout` for tracked tasks.
    ///
    /// Returns `false` if tasks were still running when the timeout
    /// elapsed; they are left to the runtime.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("all background tasks stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    timeout_ms = timeout.as_millis() as u64,
                    "graceful shutdown timed out"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_waits_for_cooperative_tasks() {
        let lifecycle = Lifecycle::new();
        let token = lifecycle.child_token();
        lifecycle.spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        });
        assert_eq!(lifecycle.running(), 1);
        assert!(lifecycle.shutdown(Duration::from_secs(2)).await);
        assert_eq!(lifecycle.running(), 0);
        assert!(lifecycle.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_on_stuck_tasks() {
        let lifecycle = Lifecycle::new();
        lifecycle.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let started = std::time::Instant::now();
        assert!(!lifecycle.shutdown(Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_child_tokens_follow_root() {
        let lifecycle = Lifecycle::new();
        let a = lifecycle.child_token();
        let b = lifecycle.clone().child_token();
        a.cancel();
        assert!(!b.is_cancelled());
        lifecycle.shutdown(Duration::from_millis(10)).await;
        assert!(b.is_cancelled());
    }
}
