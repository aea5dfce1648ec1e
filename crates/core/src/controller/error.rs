//! Controller-level errors.

use thiserror::Error;

/// Errors from [`super::Controller`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("controller not started")]
    NotStarted,
    #[error("controller already started")]
    AlreadyStarted,
    #[error("relay contract not found: {0}")]
    ContractNotFound(String),
    #[error("relay contract not available: {0}")]
    ContractNotAvailable(String),
    #[error("disenrollment partially failed, couldn't disenroll the following contracts: {0:?}")]
    Disenroll(Vec<String>),
    #[error(transparent)]
    Transport(#[from] crate::relaystatus::TransportError),
    #[error(transparent)]
    Reload(#[from] crate::relaystatus::RelayStatusError),
}
