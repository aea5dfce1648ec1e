//! Next-hop dialing boundary (§4.I step 5). The concrete transport (TCP,
//! TLS, SOCKS) a production relay dials through is an external collaborator
//! — this models only the narrow surface the handler drives.

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// The minimal stream surface the splicer needs: duplex, unpin, sendable
/// across an await point. Blanket-implemented for anything that qualifies.
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> TunnelStream for T {}

/// A dialed connection, boxed so [`Dialer`] stays object-safe across
/// transport implementations.
pub type DialedStream = Box<dyn TunnelStream>;

/// Errors from [`Dialer::dial`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    /// The dial attempt did not complete within the configured timeout.
    #[error("dial to {0} timed out")]
    Timeout(String),
    /// The dial attempt failed for a non-timeout reason.
    #[error("dial to {0} failed: {1}")]
    Failed(String, String),
}

/// Reaches a tunnel's next hop. `timeout` bounds the whole dial attempt.
pub trait Dialer: Send + Sync {
    fn dial<'a>(&'a self, target: &'a str, timeout: Duration) -> BoxFuture<'a, Result<DialedStream, DialError>>;
}

/// Scripted outcome for [`MockDialer::dial`].
pub enum MockOutcome {
    /// Succeeds, handing back one half of an in-memory duplex pipe; the
    /// test keeps the other half to drive the spliced bytes.
    Succeed(tokio::io::DuplexStream),
    /// Fails as if the dial attempt timed out.
    Timeout,
    /// Fails for a non-timeout reason.
    Failed(String),
}

/// An in-memory [`Dialer`] for tests: one scripted outcome per call, in
/// order; panics if exhausted.
#[derive(Default)]
pub struct MockDialer {
    outcomes: parking_lot::Mutex<std::collections::VecDeque<MockOutcome>>,
}

impl MockDialer {
    /// Queues `outcome` to be returned by the next [`Dialer::dial`] call.
    pub fn push(&self, outcome: MockOutcome) {
        self.outcomes.lock().push_back(outcome);
    }
}

impl Dialer for MockDialer {
    fn dial<'a>(&'a self, target: &'a str, _timeout: Duration) -> BoxFuture<'a, Result<DialedStream, DialError>> {
        Box::pin(async move {
            let outcome = self.outcomes.lock().pop_front().expect("MockDialer exhausted");
            match outcome {
                MockOutcome::Succeed(stream) => Ok(Box::new(stream) as DialedStream),
                MockOutcome::Timeout => Err(DialError::Timeout(target.to_string())),
                MockOutcome::Failed(message) => Err(DialError::Failed(target.to_string(), message)),
            }
        })
    }
}
