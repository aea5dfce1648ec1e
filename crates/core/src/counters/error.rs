//! Error kinds for the counter hierarchy.

use thiserror::Error;

/// Errors returned by [`super::ConnCounter`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CounterError {
    /// The counter's parent is gone: it was already closed, or never had one.
    #[error("counter has no parent (already closed)")]
    ParentMissing,
    /// The counter could not be found in its parent's child set on close.
    #[error("counter not found in parent container")]
    ContainerMissing,
}
