//! Bidirectional splice boundary (§4.I step 6).

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use super::dialer::TunnelStream;

/// Errors from [`Splicer::splice`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpliceError {
    /// The splice ran past its configured maximum duration.
    #[error("splice timed out")]
    Timeout,
    /// One side of the splice returned an I/O error.
    #[error("splice failed: {0}")]
    Failed(String),
}

/// Copies bytes bidirectionally between `a` and `b` until either side
/// closes or `max_duration` elapses.
pub trait Splicer: Send + Sync {
    fn splice<'a>(
        &'a self,
        a: &'a mut dyn TunnelStream,
        b: &'a mut dyn TunnelStream,
        max_duration: Duration,
    ) -> BoxFuture<'a, Result<(), SpliceError>>;
}

/// The production splicer: `tokio::io::copy_bidirectional` under a
/// `tokio::time::timeout`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealSplicer;

impl Splicer for RealSplicer {
    fn splice<'a>(
        &'a self,
        a: &'a mut dyn TunnelStream,
        b: &'a mut dyn TunnelStream,
        max_duration: Duration,
    ) -> BoxFuture<'a, Result<(), SpliceError>> {
        Box::pin(async move {
            match tokio::time::timeout(max_duration, tokio::io::copy_bidirectional(a, b)).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(err)) => Err(SpliceError::Failed(err.to_string())),
                Err(_) => Err(SpliceError::Timeout),
            }
        })
    }
}

/// A scripted [`Splicer`] for tests: copies a fixed number of bytes through
/// `tokio::io::copy_bidirectional` (so byte-metering tests still see real
/// reads) but can be told to report a timeout or failure instead.
#[derive(Default)]
pub struct MockSplicer {
    force_timeout: std::sync::atomic::AtomicBool,
    force_failure: parking_lot::Mutex<Option<String>>,
}

impl MockSplicer {
    /// The next (and every subsequent) call reports a timeout instead of
    /// actually splicing.
    pub fn force_timeout(&self) {
        self.force_timeout.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// The next (and every subsequent) call reports `message` as a failure
    /// instead of actually splicing.
    pub fn force_failure(&self, message: impl Into<String>) {
        *self.force_failure.lock() = Some(message.into());
    }
}

impl Splicer for MockSplicer {
    fn splice<'a>(
        &'a self,
        a: &'a mut dyn TunnelStream,
        b: &'a mut dyn TunnelStream,
        max_duration: Duration,
    ) -> BoxFuture<'a, Result<(), SpliceError>> {
        Box::pin(async move {
            if self.force_timeout.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(SpliceError::Timeout);
            }
            if let Some(message) = self.force_failure.lock().clone() {
                return Err(SpliceError::Failed(message));
            }
            match tokio::time::timeout(max_duration, tokio::io::copy_bidirectional(a, b)).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(err)) => Err(SpliceError::Failed(err.to_string())),
                Err(_) => Err(SpliceError::Timeout),
            }
        })
    }
}
