//! Connection-handler errors, each mapped to the reply status §4.I
//! specifies.

use thiserror::Error;

use crate::controller::ControllerError;
use crate::sharetoken::AdmissionError;

use super::dialer::DialError;
use super::splicer::SpliceError;

/// An error from [`super::ConnHandler::handle`], carrying enough
/// information to map onto the reply status §4.I specifies for each step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnError {
    /// Step 2: the controller rejected admission (unknown or unavailable
    /// contract).
    #[error(transparent)]
    Admission(#[from] ControllerError),
    /// Step 3: the share-token failed local policy validation.
    #[error(transparent)]
    Token(#[from] AdmissionError),
    /// Step 4: the target is a loopback address and loopback dialing is
    /// not permitted.
    #[error("loopback target rejected")]
    LoopbackRejected,
    /// The contract was disabled while the dial was still in flight.
    #[error("contract disabled before the dial completed")]
    ContractDisabled,
    /// Step 5: dial did not complete within the configured timeout.
    #[error("dial timed out")]
    DialTimeout,
    /// Step 5: dial failed for a non-timeout reason.
    #[error("dial failed: {0}")]
    DialFailed(String),
    /// Step 6: the splice ran past its maximum duration.
    #[error("splice timed out")]
    SpliceTimeout,
    /// Step 6: the splice failed for a non-timeout reason.
    #[error("splice failed: {0}")]
    SpliceFailed(String),
}

impl ConnError {
    /// The reply status §4.I assigns to this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ConnError::Admission(_) | ConnError::Token(_) | ConnError::LoopbackRejected => 400,
            ConnError::DialTimeout | ConnError::SpliceTimeout => 408,
            ConnError::DialFailed(_) => 502,
            ConnError::ContractDisabled | ConnError::SpliceFailed(_) => 410,
        }
    }

    /// The `reason` label recorded against `relay_connection_error_count`.
    pub fn metric_reason(&self) -> &'static str {
        match self {
            ConnError::Admission(_) => "admission",
            ConnError::Token(_) => "token",
            ConnError::LoopbackRejected => "loopback_rejected",
            ConnError::ContractDisabled => "contract_disabled",
            ConnError::DialTimeout => "dial_timeout",
            ConnError::DialFailed(_) => "dial_failed",
            ConnError::SpliceTimeout => "splice_timeout",
            ConnError::SpliceFailed(_) => "splice_failed",
        }
    }
}

impl From<DialError> for ConnError {
    fn from(err: DialError) -> Self {
        match err {
            DialError::Timeout(_) => ConnError::DialTimeout,
            DialError::Failed(_, message) => ConnError::DialFailed(message),
        }
    }
}

impl From<SpliceError> for ConnError {
    fn from(err: SpliceError) -> Self {
        match err {
            SpliceError::Timeout => ConnError::SpliceTimeout,
            SpliceError::Failed(message) => ConnError::SpliceFailed(message),
        }
    }
}
