//! Task spawning on top of a `tokio` runtime handle, with per-kind metrics
//! and critical-task panic propagation.
//!
//! "Critical" tasks are ones whose death should bring the process down
//! rather than silently stop doing work (the heartbeat loop, the
//! persist/reset/cap-check loops in `ContractManager`); "regular" tasks
//! are fire-and-forget background work.

mod metrics;

pub use metrics::IncCounterOnDrop;

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use metrics::TaskExecutorMetrics;

/// A name plus the panic payload a critical task died with.
#[derive(Debug)]
pub struct PanickedTaskError {
    /// The name passed to [`TaskExecutor::spawn_critical`].
    pub task_name: &'static str,
}

impl std::fmt::Display for PanickedTaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "critical task `{}` panicked", self.task_name)
    }
}

impl std::error::Error for PanickedTaskError {}

/// Spawns tasks onto a captured `tokio` runtime handle, tracking
/// per-kind counts via [`TaskExecutorMetrics`].
#[derive(Clone)]
pub struct TaskExecutor {
    handle: Handle,
    metrics: Arc<TaskExecutorMetrics>,
    panicked_tasks_tx: mpsc::UnboundedSender<PanickedTaskError>,
}

impl TaskExecutor {
    /// Captures the calling thread's runtime handle. Panics outside of a
    /// `tokio` runtime, same as [`Handle::current`].
    pub fn current() -> (Self, mpsc::UnboundedReceiver<PanickedTaskError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { handle: Handle::current(), metrics: Arc::new(TaskExecutorMetrics::default()), panicked_tasks_tx: tx }, rx)
    }

    /// The underlying runtime handle, for callers that need to spawn
    /// outside this executor's metrics/panic tracking (e.g. `tokio::spawn`
    /// call sites already established before this executor existed).
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns a fire-and-forget task. Its completion (success or panic) is
    /// recorded in `executor.spawn.finished_regular_tasks_total`
    /// regardless of which.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.metrics.inc_regular_tasks();
        let guard = IncCounterOnDrop::new(self.metrics.finished_regular_tasks_total.clone());
        self.handle.spawn(async move {
            let out = fut.await;
            drop(guard);
            out
        })
    }

    /// Spawns a blocking task via [`Handle::spawn_blocking`].
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.metrics.inc_regular_blocking_tasks();
        let guard = IncCounterOnDrop::new(self.metrics.finished_regular_blocking_tasks_total.clone());
        self.handle.spawn_blocking(move || {
            let out = f();
            drop(guard);
            out
        })
    }

    /// Spawns a task the relay cannot run without. If it panics, a
    /// [`PanickedTaskError`] is sent on the channel returned from
    /// [`Self::current`]; the caller's signal loop should treat a receive
    /// there as cause for immediate shutdown.
    pub fn spawn_critical<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.metrics.inc_critical_tasks();
        let guard = IncCounterOnDrop::new(self.metrics.finished_critical_tasks_total.clone());
        let tx = self.panicked_tasks_tx.clone();
        self.handle.spawn(async move {
            let result = futures_util::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(fut)).await;
            drop(guard);
            if result.is_err() {
                tracing::error!(task = name, "critical task panicked");
                let _ = tx.send(PanickedTaskError { task_name: name });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_runs_the_future() {
        let (executor, _rx) = TaskExecutor::current();
        let handle = executor.spawn(async { 1 + 1 });
        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn critical_panic_is_reported_on_the_channel() {
        let (executor, mut rx) = TaskExecutor::current();
        executor.spawn_critical("doomed", async { panic!("boom") });
        let reported = rx.recv().await.unwrap();
        assert_eq!(reported.task_name, "doomed");
    }

    #[tokio::test]
    async fn critical_task_completing_normally_reports_nothing() {
        let (executor, mut rx) = TaskExecutor::current();
        let handle = executor.spawn_critical("fine", async {});
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
