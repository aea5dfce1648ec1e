//! Per-contract enrollment state machine (§4.F).
//!
//! One [`RelayStatus`] tracks a single contract's enrolled/disabled flags
//! and the [`CancelCtx`] bound to its current enrollment window. The cancel
//! context is only ever created when absent and only ever torn down by
//! [`RelayStatus::disable`]; enroll/beat never replace a live one.

mod cancelctx;
mod client;
mod error;

pub use cancelctx::CancelCtx;
pub use client::{DirectoryClient, EnrollOutcome, EnrollRequest, MockDirectoryClient, TransportError};
pub use error::RelayStatusError;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::RelayEntry;

/// A snapshot of a contract's enrollment state, cheap to clone for status
/// reporting.
#[derive(Debug, Clone)]
pub struct RelayStatusSnapshot {
    pub contract_id: String,
    pub contract_url: String,
    pub role: String,
    pub net_usage: u64,
    pub enrolled: bool,
}

struct Inner {
    entry: RelayEntry,
    enrolled: bool,
    ctx: Option<CancelCtx>,
}

/// One contract's enrollment state machine.
pub struct RelayStatus {
    contract_id: String,
    contract_url: String,
    directory_url: String,
    client: Arc<dyn DirectoryClient>,
    software_version: String,
    inner: RwLock<Inner>,
}

impl RelayStatus {
    pub fn new(
        contract_id: String,
        contract_url: String,
        directory_url: String,
        entry: RelayEntry,
        client: Arc<dyn DirectoryClient>,
        software_version: String,
    ) -> Self {
        Self {
            contract_id,
            contract_url,
            directory_url,
            client,
            software_version,
            inner: RwLock::new(Inner { entry, enrolled: false, ctx: None }),
        }
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    pub fn contract_url(&self) -> &str {
        &self.contract_url
    }

    pub fn role(&self) -> String {
        self.inner.read().entry.role.clone()
    }

    pub fn net_usage(&self) -> u64 {
        self.inner.read().entry.net_usage
    }

    pub fn enrolled(&self) -> bool {
        self.inner.read().enrolled
    }

    /// The cancel context bound to the current enrollment window, if any.
    /// `None` once disabled and before the next successful enroll/beat.
    pub fn context(&self) -> Option<CancelCtx> {
        self.inner.read().ctx.clone()
    }

    fn build_request(&self, initial: bool) -> EnrollRequest {
        let entry = self.inner.read().entry.clone();
        EnrollRequest {
            directory_url: self.directory_url.clone(),
            relay: entry,
            software_version: self.software_version.clone(),
            initial,
        }
    }

    /// Shared enroll/heartbeat body: on success, flags enrolled and creates
    /// a cancel context if one isn't already live. A failure never flips
    /// `enrolled` or tears down an existing context; callers judge health
    /// from the returned error, not from state (§9).
    async fn do_enroll(&self, initial: bool) -> Result<EnrollOutcome, TransportError> {
        let req = self.build_request(initial);
        let outcome = self.client.enroll(&req).await?;
        let mut inner = self.inner.write();
        inner.enrolled = true;
        if inner.ctx.is_none() {
            inner.ctx = Some(CancelCtx::new());
        }
        Ok(outcome)
    }

    /// Initial enrollment. Idempotent: calling it again while already
    /// enrolled is just another `POST` with the `initial` header set.
    pub async fn enroll(&self) -> Result<EnrollOutcome, TransportError> {
        self.do_enroll(true).await
    }

    /// Heartbeat. Identical wire shape to [`Self::enroll`] minus the
    /// version-negotiation header.
    pub async fn beat(&self) -> Result<EnrollOutcome, TransportError> {
        self.do_enroll(false).await
    }

    /// Leaves the directory. On success, clears `enrolled`; the cancel
    /// context is left untouched (only [`Self::disable`] tears it down).
    pub async fn disenroll(&self) -> Result<(), TransportError> {
        let req = self.build_request(false);
        self.client.disenroll(&req).await?;
        self.inner.write().enrolled = false;
        Ok(())
    }

    /// Best-effort disenroll used when tearing the whole relay down:
    /// always clears `enrolled` locally, but reports whether the remote
    /// side actually acknowledged it.
    pub async fn force_disenroll(&self) -> Result<(), TransportError> {
        let req = self.build_request(false);
        let result = self.client.disenroll(&req).await;
        self.inner.write().enrolled = false;
        result
    }

    /// Cancels the current cancel context (waking any in-flight connection
    /// handlers bound to it) and clears it, so the next successful
    /// enroll/beat starts a fresh one. Does not touch `enrolled`.
    pub fn disable(&self) {
        let mut inner = self.inner.write();
        if let Some(ctx) = inner.ctx.take() {
            ctx.cancel();
        }
    }

    /// Applies a configuration change. Rejects role changes; anything else
    /// (advertised address, net-usage cap, versions) is applied in place.
    pub fn reload(&self, entry: RelayEntry) -> Result<(), RelayStatusError> {
        let mut inner = self.inner.write();
        if inner.entry.changes_role(&entry) {
            return Err(RelayStatusError::ReloadRejected);
        }
        inner.entry = entry;
        Ok(())
    }

    pub fn snapshot(&self) -> RelayStatusSnapshot {
        let inner = self.inner.read();
        RelayStatusSnapshot {
            contract_id: self.contract_id.clone(),
            contract_url: self.contract_url.clone(),
            role: inner.entry.role.clone(),
            net_usage: inner.entry.net_usage,
            enrolled: inner.enrolled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> RelayEntry {
        RelayEntry {
            addr: "overlay://contract.example".to_string(),
            role: "fronting".to_string(),
            upgrade_channel: Some("default".to_string()),
            net_usage: 0,
            versions: Default::default(),
        }
    }

    fn status(client: Arc<MockDirectoryClient>) -> RelayStatus {
        RelayStatus::new(
            "cid-1".to_string(),
            "overlay://contract.example".to_string(),
            "https://directory.example/enroll".to_string(),
            entry(),
            client,
            "1.2.3".to_string(),
        )
    }

    #[tokio::test]
    async fn enroll_sets_enrolled_and_creates_context() {
        let rs = status(Arc::new(MockDirectoryClient::default()));
        assert!(!rs.enrolled());
        assert!(rs.context().is_none());

        rs.enroll().await.unwrap();
        assert!(rs.enrolled());
        assert!(rs.context().is_some());
    }

    #[tokio::test]
    async fn beat_does_not_replace_existing_context() {
        let rs = status(Arc::new(MockDirectoryClient::default()));
        rs.enroll().await.unwrap();
        let first = rs.context().unwrap();

        rs.beat().await.unwrap();
        let second = rs.context().unwrap();
        assert!(!first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn failed_enroll_does_not_flip_enrolled() {
        let client = Arc::new(MockDirectoryClient::default());
        *client.enroll_error.lock() = Some("directory unreachable".to_string());
        let rs = status(client);

        assert!(rs.enroll().await.is_err());
        assert!(!rs.enrolled());
        assert!(rs.context().is_none());
    }

    #[tokio::test]
    async fn disable_cancels_and_clears_context_without_touching_enrolled() {
        let rs = status(Arc::new(MockDirectoryClient::default()));
        rs.enroll().await.unwrap();
        let ctx = rs.context().unwrap();

        rs.disable();
        assert!(ctx.is_cancelled());
        assert!(rs.context().is_none());
        assert!(rs.enrolled());
    }

    #[tokio::test]
    async fn disable_then_enroll_creates_a_fresh_context() {
        let rs = status(Arc::new(MockDirectoryClient::default()));
        rs.enroll().await.unwrap();
        let first = rs.context().unwrap();
        rs.disable();

        rs.enroll().await.unwrap();
        let second = rs.context().unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn disenroll_clears_enrolled_but_leaves_context() {
        let rs = status(Arc::new(MockDirectoryClient::default()));
        rs.enroll().await.unwrap();
        let ctx = rs.context().unwrap();

        rs.disenroll().await.unwrap();
        assert!(!rs.enrolled());
        assert!(!ctx.is_cancelled());
        assert!(rs.context().is_some());
    }

    #[tokio::test]
    async fn force_disenroll_clears_enrolled_even_on_remote_failure() {
        let client = Arc::new(MockDirectoryClient::default());
        let rs = status(client.clone());
        rs.enroll().await.unwrap();
        *client.disenroll_error.lock() = Some("directory down".to_string());

        let result = rs.force_disenroll().await;
        assert!(result.is_err());
        assert!(!rs.enrolled());
    }

    #[test]
    fn reload_rejects_role_change() {
        let rs = status(Arc::new(MockDirectoryClient::default()));
        let mut changed = entry();
        changed.role = "backing".to_string();
        assert_eq!(rs.reload(changed), Err(RelayStatusError::ReloadRejected));
        assert_eq!(rs.role(), "fronting");
    }

    #[test]
    fn reload_applies_non_role_changes() {
        let rs = status(Arc::new(MockDirectoryClient::default()));
        let mut changed = entry();
        changed.net_usage = 4096;
        rs.reload(changed).unwrap();
        assert_eq!(rs.net_usage(), 4096);
    }
}
