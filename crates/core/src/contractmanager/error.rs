//! Contract-manager errors.

use thiserror::Error;

/// Errors from [`super::ContractManager`] operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The controller rejected a lifecycle or registry operation.
    #[error(transparent)]
    Controller(#[from] crate::controller::ControllerError),
    /// The usage store could not be read or written.
    #[error(transparent)]
    UsageStore(#[from] crate::usagestore::UsageStoreError),
}
