//! Share-token submission scheduler (§4.E): a time-bucketed retry queue
//! keyed by `settlementOpen + 1`.

mod error;

pub use error::SubmitError;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::sharetoken::ShareToken;

/// `submit(token)` as supplied at construction — calls the contract's
/// `/submit` endpoint. Boxed so the scheduler stays agnostic of the real
/// HTTP client (the "closures-as-strategy" pattern, `SPEC_FULL.md` §9).
pub type SubmitFn =
    Arc<dyn Fn(Arc<dyn ShareToken>) -> Pin<Box<dyn Future<Output = Result<(), SubmitError>> + Send>> + Send + Sync>;

struct Inner {
    buckets: Mutex<BTreeMap<i64, Vec<Arc<dyn ShareToken>>>>,
    submit: SubmitFn,
    submit_interval: Duration,
}

/// The scheduler handle. Cheaply cloneable; `schedule` is synchronous and
/// lock-only, `run` drives the periodic submission ticker.
#[derive(Clone)]
pub struct ShareTokenScheduler {
    inner: Arc<Inner>,
}

impl ShareTokenScheduler {
    /// Builds a scheduler that calls `submit` for each due token, retrying
    /// every `submit_interval` on failure until the token's settlement
    /// window closes.
    pub fn new(submit_interval: Duration, submit: SubmitFn) -> Self {
        Self { inner: Arc::new(Inner { buckets: Mutex::new(BTreeMap::new()), submit, submit_interval }) }
    }

    /// Appends `token` to the bucket for `token.settlement_open() + 1`.
    pub fn schedule(&self, token: Arc<dyn ShareToken>) {
        let when = token.settlement_open() + 1;
        self.inner.buckets.lock().entry(when).or_default().push(token);
    }

    /// Number of tokens currently queued, across every bucket. Test use.
    pub fn pending_count(&self) -> usize {
        self.inner.buckets.lock().values().map(Vec::len).sum()
    }

    /// Drains and submits every bucket due at or before `now` (epoch-s).
    /// Exposed directly so scenario tests can drive the scheduler without
    /// waiting on a real ticker; [`Self::run`] calls this on each tick.
    pub async fn tick_once(&self, now: i64) {
        let due: Vec<i64> = {
            let buckets = self.inner.buckets.lock();
            buckets.keys().filter(|&&t0| t0 <= now).copied().collect()
        };

        for t0 in due {
            let tokens = self.inner.buckets.lock().remove(&t0).unwrap_or_default();
            for token in tokens {
                self.submit_one(token, now).await;
            }
        }
    }

    async fn submit_one(&self, token: Arc<dyn ShareToken>, now: i64) {
        match (self.inner.submit)(token.clone()).await {
            Ok(()) => {
                info!(contract = token.contract_id(), "share-token submitted");
            }
            Err(err) => {
                let next_attempt = now + self.inner.submit_interval.as_secs() as i64;
                if next_attempt > token.settlement_close() {
                    warn!(contract = token.contract_id(), %err, "share-token past submission window, dropping");
                } else {
                    warn!(contract = token.contract_id(), %err, "share-token submission failed, rescheduling");
                    self.inner.buckets.lock().entry(next_attempt).or_default().push(token);
                }
            }
        }
    }

    /// Runs the periodic ticker until the process exits. Intended to be
    /// spawned as a background task.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.inner.submit_interval);
        loop {
            ticker.tick().await;
            let now = crate::time::now_epoch_s();
            self.tick_once(now).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharetoken::MockShareToken;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn always_fails() -> (SubmitFn, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let f: SubmitFn = Arc::new(move |_token| {
            counted.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(SubmitError::Network("connection refused".to_string())) })
        });
        (f, calls)
    }

    #[tokio::test]
    async fn share_token_retry_s4() {
        let (submit, calls) = always_fails();
        let submit_interval = Duration::from_secs(60);
        let scheduler = ShareTokenScheduler::new(submit_interval, submit);

        let now = 1_000_000i64;
        let token: Arc<dyn ShareToken> = Arc::new(MockShareToken {
            contract_id: "contract-a".to_string(),
            relay_pubkey: "relay-1".to_string(),
            settlement_open: now - 10,
            settlement_close: now + 65,
            signature_valid: true,
        });
        scheduler.schedule(token);

        // First tick: submit fails, reschedules to now+60.
        scheduler.tick_once(now).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 1);

        // Second tick: now+60+epsilon > settlement_close (now+65 is close,
        // next_attempt computed from now+60 would be now+120, past close).
        scheduler.tick_once(now + 60).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.pending_count(), 0, "buckets end empty after terminal expiry");
    }

    #[tokio::test]
    async fn successful_submit_drops_token() {
        let submit: SubmitFn = Arc::new(|_| Box::pin(async { Ok(()) }));
        let scheduler = ShareTokenScheduler::new(Duration::from_secs(5), submit);

        let token: Arc<dyn ShareToken> = Arc::new(MockShareToken {
            contract_id: "contract-a".to_string(),
            relay_pubkey: "relay-1".to_string(),
            settlement_open: 0,
            settlement_close: 1_000,
            signature_valid: true,
        });
        scheduler.schedule(token);
        scheduler.tick_once(1).await;
        assert_eq!(scheduler.pending_count(), 0);
    }
}
