//! Per-contract cancellation context.
//!
//! `tokio` has no `context.Context` equivalent, so this reproduces the
//! observable behavior (cancel once, observed by arbitrarily many
//! waiters) with an `AtomicBool` plus a `Notify`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cheaply cloneable cancellation handle. Created on successful enroll,
/// canceled on disable; in-flight work observes cancellation via
/// [`CancelCtx::cancelled`].
#[derive(Clone)]
pub struct CancelCtx(Arc<Inner>);

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Default for CancelCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelCtx {
    /// Creates a fresh, not-yet-cancelled context.
    pub fn new() -> Self {
        Self(Arc::new(Inner { cancelled: AtomicBool::new(false), notify: Notify::new() }))
    }

    /// Cancels the context, waking every current and future waiter.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    /// Whether [`Self::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the context is cancelled. Safe to call before or
    /// after cancellation; a context cancelled before this is called
    /// resolves immediately.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            // `Notified::enable` registers this waiter with the `Notify`
            // before the final `is_cancelled` check below, so a `cancel()`
            // landing between that check and the `.await` still wakes it
            // (a bare `notified().await` would miss a `notify_waiters()`
            // that fires before the first poll and hang forever).
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let ctx = CancelCtx::new();
        assert!(!ctx.is_cancelled());

        let waiter = ctx.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        ctx.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_before_wait_resolves_immediately() {
        let ctx = CancelCtx::new();
        ctx.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(50), ctx.cancelled()).await.unwrap();
    }
}
