//! Directory HTTP client boundary (out of scope per `SPEC_FULL.md` §1: the
//! enrollment handshake's wire encoding lives outside the hard core).

use futures::future::BoxFuture;
use thiserror::Error;

use crate::config::RelayEntry;

/// A transport-level failure talking to a contract's directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("directory request to {endpoint} failed: {message}")]
pub struct TransportError {
    /// The directory URL that was being called.
    pub endpoint: String,
    /// Human-readable failure detail.
    pub message: String,
}

/// One enroll/heartbeat request.
#[derive(Debug, Clone)]
pub struct EnrollRequest {
    /// The directory endpoint to POST/DELETE against.
    pub directory_url: String,
    /// The relay entry payload.
    pub relay: RelayEntry,
    /// This binary's own semver, always attached as the `Version` header.
    pub software_version: String,
    /// Whether this is the initial enroll (carries the version-negotiation
    /// header) or a heartbeat (header omitted, see §6).
    pub initial: bool,
}

/// Result of a successful enroll/heartbeat call.
#[derive(Debug, Clone, Default)]
pub struct EnrollOutcome {
    /// Set if the directory signaled a newer version is available.
    pub upgrade_available: Option<String>,
}

/// The directory/contract HTTP client, as a narrow trait boundary so the
/// relay-status state machine is fully testable without real transport.
pub trait DirectoryClient: Send + Sync {
    /// `POST` the enroll/heartbeat payload.
    fn enroll<'a>(&'a self, req: &'a EnrollRequest) -> BoxFuture<'a, Result<EnrollOutcome, TransportError>>;

    /// `DELETE` to leave the directory.
    fn disenroll<'a>(&'a self, req: &'a EnrollRequest) -> BoxFuture<'a, Result<(), TransportError>>;
}

/// An in-memory [`DirectoryClient`] for tests: programmable success/failure
/// per call, records every request it receives.
#[derive(Default)]
pub struct MockDirectoryClient {
    /// If set, `enroll` returns this error instead of succeeding.
    pub enroll_error: parking_lot::Mutex<Option<String>>,
    /// If set, `disenroll` returns this error instead of succeeding.
    pub disenroll_error: parking_lot::Mutex<Option<String>>,
    /// Set on a successful enroll/heartbeat to simulate an upgrade signal.
    pub upgrade_available: parking_lot::Mutex<Option<String>>,
    /// Every enroll request received, in order.
    pub enroll_calls: parking_lot::Mutex<Vec<EnrollRequest>>,
    /// Every disenroll request received, in order.
    pub disenroll_calls: parking_lot::Mutex<Vec<EnrollRequest>>,
}

impl DirectoryClient for MockDirectoryClient {
    fn enroll<'a>(&'a self, req: &'a EnrollRequest) -> BoxFuture<'a, Result<EnrollOutcome, TransportError>> {
        Box::pin(async move {
            self.enroll_calls.lock().push(req.clone());
            if let Some(message) = self.enroll_error.lock().clone() {
                return Err(TransportError { endpoint: req.directory_url.clone(), message });
            }
            Ok(EnrollOutcome { upgrade_available: self.upgrade_available.lock().clone() })
        })
    }

    fn disenroll<'a>(&'a self, req: &'a EnrollRequest) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.disenroll_calls.lock().push(req.clone());
            if let Some(message) = self.disenroll_error.lock().clone() {
                return Err(TransportError { endpoint: req.directory_url.clone(), message });
            }
            Ok(())
        })
    }
}
