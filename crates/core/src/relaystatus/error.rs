//! Relay-status state-machine errors.

use thiserror::Error;

/// Errors from [`super::RelayStatus`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayStatusError {
    /// A reload attempted to change the immutable `role` field.
    #[error("forbidden change, could not apply new relay config")]
    ReloadRejected,
}
