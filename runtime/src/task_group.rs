//! Supervised task group.
//!
//! Owns one cancellation handle per launched task and a shared completion
//! counter. Shutdown cancels every handle, then joins against a deadline.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A group of named, individually cancellable tasks with a shared join point.
#[derive(Debug)]
pub struct TaskGroup {
    members: Vec<(String, CancellationToken)>,
    active: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        let (notifier, _) = watch::channel(());
        Self {
            members: Vec::new(),
            active: Arc::new(AtomicUsize::new(0)),
            notifier,
        }
    }

    /// Launch a task bound to a child scope of `parent`.
    ///
    /// The counter is incremented before the task is spawned and decremented
    /// when the task's future returns or unwinds.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, parent: &CancellationToken, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        self.members.push((name.into(), token.clone()));
        self.active.fetch_add(1, Ordering::SeqCst);

        let guard = CompletionGuard {
            active: Arc::clone(&self.active),
            notifier: self.notifier.clone(),
        };
        let fut = task(token);

        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }

    /// Cancel every task in the group. Safe to call more than once.
    pub fn cancel_all(&self) {
        for (name, token) in &self.members {
            tracing::debug!(task = %name, "Cancelling task");
            token.cancel();
        }
    }

    /// Number of tasks that have not returned yet.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Names of every task launched in this group, in launch order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(name, _)| name.as_str())
    }

    /// Wait until every task has returned.
    pub async fn wait(&self) {
        let mut completion = self.notifier.subscribe();
        while self.active.load(Ordering::SeqCst) > 0 {
            if completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait until every task has returned, or until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns the number of tasks still running if the deadline elapsed first.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> Result<(), usize> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| self.active())
    }
}

/// Decrements the group's counter on drop, waking waiters at zero.
struct CompletionGuard {
    active: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notifier.send_replace(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_group_is_drained() {
        let group = TaskGroup::new();
        assert_eq!(group.active(), 0);
        assert_eq!(group.wait_with_timeout(Duration::from_millis(10)).await, Ok(()));
    }

    #[tokio::test]
    async fn cancel_all_drains_group() {
        let root = CancellationToken::new();
        let mut group = TaskGroup::new();

        for name in ["a", "b"] {
            group.spawn(name, &root, |token| async move {
                token.cancelled().await;
            });
        }
        assert_eq!(group.active(), 2);
        assert_eq!(group.names().collect::<Vec<_>>(), vec!["a", "b"]);

        group.cancel_all();
        assert_eq!(group.wait_with_timeout(Duration::from_secs(1)).await, Ok(()));
        assert_eq!(group.active(), 0);
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_children() {
        let root = CancellationToken::new();
        let mut group = TaskGroup::new();
        group.spawn("child", &root, |token| async move {
            token.cancelled().await;
        });

        root.cancel();
        assert_eq!(group.wait_with_timeout(Duration::from_secs(1)).await, Ok(()));
    }

    #[tokio::test]
    async fn timeout_reports_pending_tasks() {
        let root = CancellationToken::new();
        let mut group = TaskGroup::new();
        group.spawn("stubborn", &root, |_token| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        group.cancel_all();
        let result = group.wait_with_timeout(Duration::from_millis(20)).await;
        assert_eq!(result, Err(1));
    }

    #[tokio::test]
    async fn panicking_task_still_counts_down() {
        let root = CancellationToken::new();
        let mut group = TaskGroup::new();
        group.spawn("faulty", &root, |_token| async move {
            #[allow(clippy::panic)]
            {
                panic!("task failure");
            }
        });

        assert_eq!(group.wait_with_timeout(Duration::from_secs(1)).await, Ok(()));
    }
}
