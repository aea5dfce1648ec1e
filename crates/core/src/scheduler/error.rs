//! Share-token submission failure taxonomy.

use thiserror::Error;

/// Why a `submit(token)` call failed. The scheduler itself only reacts to
/// expiry, never to which of these occurred — see `SPEC_FULL.md` §4.E.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    /// Transient network/5xx failure; retried until expiry.
    #[error("network error submitting share-token: {0}")]
    Network(String),
    /// The contract reported the settlement window is already closed.
    /// Discarded permanently by the calling layer, not retried.
    #[error("settlement window already closed")]
    SettlementClosed,
}
