//! Contract registry and enrollment heartbeat loop (§4.G).
//!
//! One [`Controller`] owns every configured contract's [`RelayStatus`] and
//! is the sole place that mutates them: `load`/`reload` keep the registry
//! in sync with configuration, `start`/`stop` drive the heartbeat ticker,
//! and `new_conn` is the admission check the connection handler calls on
//! every incoming tunnel.

mod error;
mod mailbox;
mod resolver;

pub use error::ControllerError;
pub use mailbox::UpgradeMailbox;
pub use resolver::{ContractResolver, MockContractResolver, ResolvedContract};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::config::RelayEntry;
use crate::relaystatus::{CancelCtx, DirectoryClient, RelayStatus, RelayStatusSnapshot};

/// Heartbeat period between enrollment refreshes, matching the upstream
/// directory's expected keep-alive cadence.
pub const DEFAULT_BEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct Inner {
    client: Arc<dyn DirectoryClient>,
    resolver: Arc<dyn ContractResolver>,
    software_version: String,
    beat_interval: Duration,
    relays: DashMap<String, Arc<RelayStatus>>,
    mutation: tokio::sync::Mutex<()>,
    heartbeat: RwLock<Option<JoinHandle<()>>>,
    upgrades: UpgradeMailbox,
}

/// Cheaply cloneable handle to the contract registry. Every clone shares
/// the same state.
#[derive(Clone)]
pub struct Controller(Arc<Inner>);

impl Controller {
    pub fn new(
        client: Arc<dyn DirectoryClient>,
        resolver: Arc<dyn ContractResolver>,
        software_version: impl Into<String>,
        beat_interval: Duration,
        upgrades: UpgradeMailbox,
    ) -> Self {
        Self(Arc::new(Inner {
            client,
            resolver,
            software_version: software_version.into(),
            beat_interval,
            relays: DashMap::new(),
            mutation: tokio::sync::Mutex::new(()),
            heartbeat: RwLock::new(None),
            upgrades,
        }))
    }

    pub fn upgrades(&self) -> UpgradeMailbox {
        self.0.upgrades.clone()
    }

    fn get(&self, contract_id: &str) -> Result<Arc<RelayStatus>, ControllerError> {
        self.0
            .relays
            .get(contract_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ControllerError::ContractNotFound(contract_id.to_string()))
    }

    fn snapshot_relays(&self) -> Vec<Arc<RelayStatus>> {
        self.0.relays.iter().map(|e| e.value().clone()).collect()
    }

    async fn add(&self, contract_url: &str, entry: RelayEntry) -> Result<String, ControllerError> {
        let resolved = self.0.resolver.resolve(contract_url).await?;
        let rs = RelayStatus::new(
            resolved.contract_id.clone(),
            contract_url.to_string(),
            resolved.directory_url,
            entry,
            self.0.client.clone(),
            self.0.software_version.clone(),
        );
        self.0.relays.insert(resolved.contract_id.clone(), Arc::new(rs));
        Ok(resolved.contract_id)
    }

    async fn update(&self, contract_id: &str, entry: RelayEntry) -> Result<(), ControllerError> {
        let rs = self.get(contract_id)?;
        rs.reload(entry)?;
        if self.started() && rs.enrolled() {
            rs.beat().await?;
        }
        Ok(())
    }

    async fn remove(&self, contract_id: &str) -> Result<(), ControllerError> {
        let rs = self.get(contract_id)?;
        if self.started() {
            if rs.enrolled() {
                rs.disenroll().await?;
            }
            rs.disable();
        }
        self.0.relays.remove(contract_id);
        Ok(())
    }

    /// Populates the registry from configuration. Stops at the first
    /// failure, leaving contracts already added in place.
    pub async fn load(&self, contracts: &BTreeMap<String, RelayEntry>) -> Result<(), ControllerError> {
        let _guard = self.0.mutation.lock().await;
        for (url, entry) in contracts {
            self.add(url, entry.clone()).await?;
        }
        Ok(())
    }

    /// Diffs the registry against new configuration: contracts present in
    /// both are updated, new ones are added, and ones no longer present
    /// are removed (disenrolling/disabling them first if the controller
    /// is started).
    pub async fn reload(&self, contracts: &BTreeMap<String, RelayEntry>) -> Result<(), ControllerError> {
        let _guard = self.0.mutation.lock().await;
        let mut urls: HashMap<String, String> =
            self.scs().into_iter().map(|(id, url)| (url, id)).collect();

        for (url, entry) in contracts {
            if let Some(id) = urls.remove(url) {
                self.update(&id, entry.clone()).await?;
            } else {
                self.add(url, entry.clone()).await?;
            }
        }

        for (_, id) in urls {
            self.remove(&id).await?;
        }
        Ok(())
    }

    pub async fn enroll(&self, contract_id: &str) -> Result<(), ControllerError> {
        if !self.started() {
            return Err(ControllerError::NotStarted);
        }
        let rs = self.get(contract_id)?;
        rs.enroll().await?;
        tracing::info!(contract_id, role = %rs.role(), "enrolled successfully");
        Ok(())
    }

    pub async fn enroll_all(&self) -> Result<(), ControllerError> {
        if !self.started() {
            return Err(ControllerError::NotStarted);
        }
        for rs in self.snapshot_relays() {
            if rs.enrolled() {
                continue;
            }
            rs.enroll().await?;
        }
        Ok(())
    }

    pub async fn disenroll(&self, contract_id: &str) -> Result<(), ControllerError> {
        if !self.started() {
            return Err(ControllerError::NotStarted);
        }
        let rs = self.get(contract_id)?;
        rs.disenroll().await?;
        Ok(())
    }

    pub async fn disenroll_all(&self) -> Result<(), ControllerError> {
        if !self.started() {
            return Err(ControllerError::NotStarted);
        }
        for rs in self.snapshot_relays() {
            if !rs.enrolled() {
                continue;
            }
            rs.disenroll().await?;
        }
        Ok(())
    }

    pub fn disable(&self, contract_id: &str) -> Result<(), ControllerError> {
        if !self.started() {
            return Err(ControllerError::NotStarted);
        }
        self.get(contract_id)?.disable();
        Ok(())
    }

    /// Enrolls every configured contract and starts the heartbeat loop.
    pub async fn start(&self) -> Result<(), ControllerError> {
        let ids = self.contracts();
        self.start_with_list(&ids).await
    }

    /// Enrolls only `contract_ids` (others stay `Loaded`) and starts the
    /// heartbeat loop. Used at startup to skip contracts already at their
    /// network cap (§4.H).
    pub async fn start_with_list(&self, contract_ids: &[String]) -> Result<(), ControllerError> {
        if self.started() {
            return Err(ControllerError::AlreadyStarted);
        }

        for id in contract_ids {
            let rs = self.get(id)?;
            if rs.enrolled() {
                continue;
            }
            rs.enroll().await?;
            tracing::info!(contract_id = %id, role = %rs.role(), "enrolled successfully");
        }

        let this = self.clone();
        let interval = self.0.beat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; the first heartbeat happens one interval later
            loop {
                ticker.tick().await;
                this.heartbeat_once().await;
            }
        });
        *self.0.heartbeat.write() = Some(handle);
        Ok(())
    }

    async fn heartbeat_once(&self) {
        for rs in self.snapshot_relays() {
            if !rs.enrolled() {
                continue;
            }
            match rs.beat().await {
                Ok(outcome) => {
                    if let Some(version) = outcome.upgrade_available {
                        if let Err(dropped) = self.0.upgrades.try_send(version) {
                            tracing::warn!(
                                version = %dropped,
                                "could not forward upgrade callback to the contract manager"
                            );
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(contract_id = rs.contract_id(), %err, "could not send heartbeat to directory");
                }
            }
        }
    }

    /// Stops the heartbeat loop and force-disenrolls every relay,
    /// collecting ids whose remote disenroll failed.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let handle = self.0.heartbeat.write().take();
        let Some(handle) = handle else {
            return Err(ControllerError::NotStarted);
        };
        handle.abort();

        let mut errored = Vec::new();
        for rs in self.snapshot_relays() {
            if rs.force_disenroll().await.is_err() {
                errored.push(rs.contract_id().to_string());
            }
        }

        if !errored.is_empty() {
            errored.sort();
            return Err(ControllerError::Disenroll(errored));
        }
        Ok(())
    }

    pub fn started(&self) -> bool {
        self.0.heartbeat.read().is_some()
    }

    /// Returns the current connection-admission context for `contract_id`,
    /// or `ContractNotAvailable` if it has no live context (never enrolled,
    /// disenrolled, or disabled).
    pub fn new_conn(&self, contract_id: &str) -> Result<CancelCtx, ControllerError> {
        if !self.started() {
            return Err(ControllerError::NotStarted);
        }
        let rs = self.get(contract_id)?;
        rs.context().ok_or_else(|| ControllerError::ContractNotAvailable(contract_id.to_string()))
    }

    pub fn contracts(&self) -> Vec<String> {
        self.0.relays.iter().map(|e| e.key().clone()).collect()
    }

    pub fn role(&self, contract_id: &str) -> Result<String, ControllerError> {
        Ok(self.get(contract_id)?.role())
    }

    pub fn status(&self) -> HashMap<String, RelayStatusSnapshot> {
        self.0.relays.iter().map(|e| (e.key().clone(), e.value().snapshot())).collect()
    }

    /// Contract ids mapped to their configured endpoint URL.
    pub fn scs(&self) -> HashMap<String, String> {
        self.0.relays.iter().map(|e| (e.key().clone(), e.value().contract_url().to_string())).collect()
    }

    /// Non-zero per-contract network-usage caps, by contract id.
    pub fn net_cap(&self) -> HashMap<String, u64> {
        self.0
            .relays
            .iter()
            .filter_map(|e| {
                let usage = e.value().net_usage();
                (usage != 0).then(|| (e.key().clone(), usage))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relaystatus::MockDirectoryClient;

    fn entry(role: &str) -> RelayEntry {
        RelayEntry {
            addr: "overlay://a.example".to_string(),
            role: role.to_string(),
            upgrade_channel: Some("default".to_string()),
            net_usage: 0,
            versions: Default::default(),
        }
    }

    fn controller_with(resolver: MockContractResolver, beat_interval: Duration) -> (Controller, Arc<MockDirectoryClient>) {
        let client = Arc::new(MockDirectoryClient::default());
        let controller =
            Controller::new(client.clone(), Arc::new(resolver), "1.0.0", beat_interval, UpgradeMailbox::new());
        (controller, client)
    }

    async fn loaded_controller() -> (Controller, Arc<MockDirectoryClient>) {
        let resolver = MockContractResolver::with("overlay://a.example", "cid-a", "https://dir-a/relays");
        let (controller, client) = controller_with(resolver, Duration::from_secs(3600));
        let mut contracts = BTreeMap::new();
        contracts.insert("overlay://a.example".to_string(), entry("fronting"));
        controller.load(&contracts).await.unwrap();
        (controller, client)
    }

    #[tokio::test]
    async fn load_populates_registry() {
        let (controller, _client) = loaded_controller().await;
        assert_eq!(controller.contracts(), vec!["cid-a".to_string()]);
        assert_eq!(controller.scs().get("cid-a").unwrap(), "overlay://a.example");
    }

    #[tokio::test]
    async fn operations_require_started_controller() {
        let (controller, _client) = loaded_controller().await;
        assert_eq!(controller.enroll("cid-a").await, Err(ControllerError::NotStarted));
        assert_eq!(controller.new_conn("cid-a"), Err(ControllerError::NotStarted));
        assert_eq!(controller.stop().await, Err(ControllerError::NotStarted));
    }

    #[tokio::test]
    async fn start_with_list_enrolls_only_listed_contracts() {
        let resolver = MockContractResolver::with("overlay://a.example", "cid-a", "https://dir-a/relays");
        resolver.add("overlay://b.example", "cid-b", "https://dir-b/relays");
        let (controller, _client) = controller_with(resolver, Duration::from_secs(3600));
        let mut contracts = BTreeMap::new();
        contracts.insert("overlay://a.example".to_string(), entry("fronting"));
        contracts.insert("overlay://b.example".to_string(), entry("backing"));
        controller.load(&contracts).await.unwrap();

        controller.start_with_list(&["cid-a".to_string()]).await.unwrap();
        assert!(controller.status()["cid-a"].enrolled);
        assert!(!controller.status()["cid-b"].enrolled);
        assert!(controller.new_conn("cid-a").is_ok());
        assert_eq!(controller.new_conn("cid-b"), Err(ControllerError::ContractNotAvailable("cid-b".to_string())));
    }

    #[tokio::test]
    async fn starting_twice_errors() {
        let (controller, _client) = loaded_controller().await;
        controller.start().await.unwrap();
        assert_eq!(controller.start().await, Err(ControllerError::AlreadyStarted));
    }

    #[tokio::test]
    async fn stop_disenrolls_everyone_and_clears_heartbeat() {
        let (controller, client) = loaded_controller().await;
        controller.start().await.unwrap();
        controller.stop().await.unwrap();

        assert!(!controller.started());
        assert!(!controller.status()["cid-a"].enrolled);
        assert_eq!(client.disenroll_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn stop_reports_contracts_that_failed_to_disenroll() {
        let (controller, client) = loaded_controller().await;
        controller.start().await.unwrap();
        *client.disenroll_error.lock() = Some("directory unreachable".to_string());

        assert_eq!(controller.stop().await, Err(ControllerError::Disenroll(vec!["cid-a".to_string()])));
        assert!(!controller.started());
    }

    #[tokio::test]
    async fn reload_adds_updates_and_removes() {
        let resolver = MockContractResolver::with("overlay://a.example", "cid-a", "https://dir-a/relays");
        resolver.add("overlay://b.example", "cid-b", "https://dir-b/relays");
        let (controller, _client) = controller_with(resolver, Duration::from_secs(3600));

        let mut contracts = BTreeMap::new();
        contracts.insert("overlay://a.example".to_string(), entry("fronting"));
        controller.load(&contracts).await.unwrap();
        controller.start().await.unwrap();

        // a: cap bump (update), b: newly added, a stays, nothing removed yet.
        let mut next = BTreeMap::new();
        let mut bumped = entry("fronting");
        bumped.net_usage = 1024;
        next.insert("overlay://a.example".to_string(), bumped);
        next.insert("overlay://b.example".to_string(), entry("backing"));
        controller.reload(&next).await.unwrap();

        assert_eq!(controller.net_cap().get("cid-a"), Some(&1024));
        assert!(controller.contracts().contains(&"cid-b".to_string()));
        assert!(!controller.status()["cid-b"].enrolled);

        // drop a entirely.
        let mut final_contracts = BTreeMap::new();
        final_contracts.insert("overlay://b.example".to_string(), entry("backing"));
        controller.reload(&final_contracts).await.unwrap();
        assert_eq!(controller.contracts(), vec!["cid-b".to_string()]);
    }

    #[tokio::test]
    async fn reload_rejects_role_change() {
        let (controller, _client) = loaded_controller().await;
        let mut next = BTreeMap::new();
        next.insert("overlay://a.example".to_string(), entry("backing"));
        assert!(controller.reload(&next).await.is_err());
    }

    #[tokio::test]
    async fn heartbeat_forwards_upgrade_signal_once_and_drops_when_full() {
        let (controller, client) = loaded_controller().await;
        controller.start().await.unwrap();

        *client.upgrade_available.lock() = Some("1.2.3".to_string());
        controller.heartbeat_once().await;
        assert_eq!(controller.upgrades().recv().await, "1.2.3");

        // Fill the mailbox, then heartbeat again: the second signal is
        // dropped (logged) rather than blocking the loop.
        controller.upgrades().try_send("9.9.9".to_string()).unwrap();
        controller.heartbeat_once().await;
        assert_eq!(controller.upgrades().recv().await, "9.9.9");
    }
}
