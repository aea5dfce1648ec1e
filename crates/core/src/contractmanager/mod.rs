//! Contract manager / network-cap control loop (§4.H).
//!
//! One [`ContractManager`] owns the [`Controller`], the usage-accounting
//! window, and (when usage metering is configured) the three background
//! tasks that persist, roll over, and cap-enforce that window. Everything
//! here is the "outer" orchestration the connection handler and the
//! `start` subcommand drive; the state machines it commands live in
//! [`crate::controller`] and [`crate::counters`].

mod cap;
mod error;
mod status;

pub use cap::CapFlag;
pub use error::ManagerError;
pub use status::{ContractStatus, GlobalCapStatus, ManagerStatus, WindowStatus};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use vertex_tasks::TaskExecutor;

use crate::config::RelayConfig;
use crate::controller::Controller;
use crate::usagestore::{next_reset, ArchiveRecord, ContractMetric, NetStats, UsageStore};

/// Resolved usage-metering configuration: the numeric knobs from
/// `network_usage` in `config.json` plus the on-disk paths the binary
/// entrypoint resolves them to (§6's `archive_dir` defaulting rules are a
/// startup-flow concern, not this crate's).
#[derive(Debug, Clone)]
pub struct NetUsageConfig {
    /// Rolling accounting period. Metering is disabled if this is zero-
    /// duration; callers should pass `None` to [`ContractManager::new`]
    /// instead of a zero timeframe.
    pub timeframe: Duration,
    /// Sum-of-all-contracts cap, bytes. `0` disables the global cap.
    pub global_limit: u64,
    /// Period between persisted-snapshot writes.
    pub write_interval: Duration,
    /// Path to the persisted usage-snapshot file.
    pub snapshot_path: PathBuf,
    /// Directory completed timeframes are archived into.
    pub archive_dir: PathBuf,
}

struct NetState {
    usage_store: UsageStore,
    net_stats: NetStats,
    legacy: Mutex<std::collections::HashMap<String, u64>>,
    cfg: NetUsageConfig,
    next_reset: AtomicI64,
    /// Coarse lock making persist, reset, and cap-check evaluation mutually
    /// exclusive (§5: "a reset cannot race a persist that reads
    /// half-drained counters").
    lock: tokio::sync::Mutex<()>,
}

struct Inner {
    relay_id: String,
    controller: Controller,
    net: Option<Arc<NetState>>,
    capped: Mutex<HashSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    upgrade_task: Mutex<Option<JoinHandle<()>>>,
    upgrades_closed: AtomicBool,
    on_upgrade: Mutex<Option<Arc<dyn Fn(String) + Send + Sync>>>,
    executor: TaskExecutor,
}

/// Owns the [`Controller`], the in-memory accounting window, and the usage
/// store; drives the persist/reset/cap-check background tasks. Cheaply
/// cloneable; every clone shares the same state.
#[derive(Clone)]
pub struct ContractManager(Arc<Inner>);

impl ContractManager {
    /// Builds a manager bound to `controller` (already [`Controller::load`]ed
    /// with its configured contracts). When `net` is `Some`, loads the usage
    /// snapshot and enables the persist/reset/cap-check tasks on [`Self::start`].
    pub fn new(
        relay_id: impl Into<String>,
        controller: Controller,
        net: Option<NetUsageConfig>,
        now_ms: i64,
        executor: TaskExecutor,
    ) -> Result<Self, ManagerError> {
        let net = net
            .map(|cfg| -> Result<Arc<NetState>, ManagerError> {
                let usage_store = UsageStore::new(cfg.snapshot_path.clone(), cfg.archive_dir.clone());
                let contract_ids = controller.contracts();
                let (net_stats, legacy) = usage_store.load(&contract_ids, now_ms)?;
                Ok(Arc::new(NetState {
                    usage_store,
                    net_stats,
                    legacy: Mutex::new(legacy),
                    cfg,
                    next_reset: AtomicI64::new(0),
                    lock: tokio::sync::Mutex::new(()),
                }))
            })
            .transpose()?;

        Ok(Self(Arc::new(Inner {
            relay_id: relay_id.into(),
            controller,
            net,
            capped: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
            upgrade_task: Mutex::new(None),
            upgrades_closed: AtomicBool::new(false),
            on_upgrade: Mutex::new(None),
            executor,
        })))
    }

    /// Installs a callback invoked for every upgrade-available signal
    /// forwarded from the controller's heartbeat loop, instead of the
    /// default log line. Should be called before [`Self::start`], though
    /// a later call still takes effect on the next forwarded signal.
    pub fn set_upgrade_callback(&self, cb: Arc<dyn Fn(String) + Send + Sync>) {
        *self.0.on_upgrade.lock() = Some(cb);
    }

    /// The underlying controller (status queries, admission checks).
    pub fn controller(&self) -> &Controller {
        &self.0.controller
    }

    /// True once usage metering is configured (regardless of whether
    /// [`Self::start`] has been called).
    pub fn metering_enabled(&self) -> bool {
        self.0.net.is_some()
    }

    /// The per-connection counter to meter a new connection's bytes into,
    /// or `None` when usage metering is not configured (§4.I step 6: the
    /// connection handler skips metered wrapping entirely in that case).
    pub fn counter_for(&self, contract_id: &str) -> Option<crate::counters::ConnCounter> {
        self.0.net.as_ref().map(|net| net.net_stats.counters().get_or_init(contract_id))
    }

    fn initial_enroll_list(&self) -> Vec<String> {
        let Some(net) = &self.0.net else {
            return self.0.controller.contracts();
        };
        let caps = self.0.controller.net_cap();
        self.0
            .controller
            .contracts()
            .into_iter()
            .filter(|id| {
                let limit = caps.get(id).copied().unwrap_or(0);
                let sum = net.net_stats.counters().get(id).map(|c| c.sum()).unwrap_or(0);
                matches!(cap::evaluate_contract(sum, limit), CapFlag::Ok)
            })
            .collect()
    }

    /// Starts the controller (enrolling every contract at `okCap`) and, if
    /// metering is configured, the persist/reset/cap-check tasks.
    pub async fn start(&self) -> Result<(), ManagerError> {
        let initial_ids = self.initial_enroll_list();
        self.0.controller.start_with_list(&initial_ids).await?;
        self.spawn_upgrade_forwarder();

        let Some(net) = self.0.net.clone() else {
            return Ok(());
        };

        let created_at_s = net.net_stats.created_at() / 1000;
        let now_s = crate::time::now_epoch_s();
        let timeframe_s = net.cfg.timeframe.as_secs() as i64;
        let (next_reset_s, immediate) = next_reset(created_at_s, timeframe_s, now_s);

        let next_reset_s = if immediate {
            self.do_reset(&net, now_s).await;
            now_s + timeframe_s
        } else {
            next_reset_s
        };
        net.next_reset.store(next_reset_s, Ordering::Relaxed);

        self.spawn_persist_task(net.clone());
        self.spawn_reset_task(net.clone(), next_reset_s);
        self.spawn_cap_check_task();
        Ok(())
    }

    fn spawn_upgrade_forwarder(&self) {
        let mgr = self.clone();
        let handle = self.0.executor.spawn_critical("upgrade-forwarder", async move {
            loop {
                let version = mgr.0.controller.upgrades().recv().await;
                match mgr.0.on_upgrade.lock().as_ref() {
                    Some(cb) => cb(version),
                    None => tracing::info!(version = %version, "upgrade available"),
                }
            }
        });
        *self.0.upgrade_task.lock() = Some(handle);
    }

    fn spawn_persist_task(&self, net: Arc<NetState>) {
        let mgr = self.clone();
        let handle = self.0.executor.spawn_critical("usage-persist", async move {
            let mut ticker = tokio::time::interval(net.cfg.write_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                mgr.persist_once(&net).await;
            }
        });
        self.0.tasks.lock().push(handle);
    }

    fn spawn_reset_task(&self, net: Arc<NetState>, initial_next_reset_s: i64) {
        let mgr = self.clone();
        let handle = self.0.executor.spawn_critical("usage-reset", async move {
            let mut next_reset_s = initial_next_reset_s;
            loop {
                let now_s = crate::time::now_epoch_s();
                let delay = (next_reset_s - now_s).max(0) as u64;
                tokio::time::sleep(Duration::from_secs(delay)).await;

                mgr.do_reset(&net, next_reset_s).await;

                let now_s = crate::time::now_epoch_s();
                let created_at_s = net.net_stats.created_at() / 1000;
                let timeframe_s = net.cfg.timeframe.as_secs() as i64;
                let (nr, _) = next_reset(created_at_s, timeframe_s, now_s);
                next_reset_s = nr;
                net.next_reset.store(next_reset_s, Ordering::Relaxed);
            }
        });
        self.0.tasks.lock().push(handle);
    }

    fn spawn_cap_check_task(&self) {
        let mgr = self.clone();
        let handle = self.0.executor.spawn_critical("cap-check", async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                mgr.cap_check_once().await;
            }
        });
        self.0.tasks.lock().push(handle);
    }

    /// Writes the current accounting window to the usage-snapshot file.
    /// Fatal on I/O error: the process aborts, since a failure here
    /// indicates operator misconfiguration (§7).
    async fn persist_once(&self, net: &NetState) {
        let _guard = net.lock.lock().await;
        let contract_ids = self.0.controller.contracts();
        let legacy = net.legacy.lock().clone();
        if let Err(err) = net.usage_store.save(&net.net_stats, &contract_ids, &legacy, crate::time::now_epoch_ms()) {
            tracing::error!(%err, "fatal: could not persist usage snapshot");
            std::process::exit(1);
        }
    }

    /// Drains the accounting window, archives the completed timeframe, and
    /// re-enrolls every contract whose only obstacle was a now-expired cap.
    async fn do_reset(&self, net: &NetState, new_created_at_s: i64) {
        {
            let _guard = net.lock.lock().await;
            let prior_created_at_s = net.net_stats.created_at() / 1000;
            let (totals, _) = net.net_stats.reset_with_date(new_created_at_s * 1000);

            let contract_ids = self.0.controller.contracts();
            let mut metrics: Vec<ContractMetric> = contract_ids
                .iter()
                .map(|id| ContractMetric {
                    contract: id.clone(),
                    active: true,
                    network_usage_bytes: totals.get(id).copied().unwrap_or(0),
                })
                .collect();

            let mut legacy = net.legacy.lock();
            for (id, bytes) in legacy.iter() {
                metrics.push(ContractMetric { contract: id.clone(), active: false, network_usage_bytes: *bytes });
            }
            legacy.clear();
            drop(legacy);

            let record = ArchiveRecord {
                relay_id: self.0.relay_id.clone(),
                metrics,
                start_at: prior_created_at_s,
                end_at: new_created_at_s,
                updated_at: crate::time::now_epoch_ms(),
            };

            if let Err(err) = net.usage_store.archive_add(&record) {
                tracing::error!(%err, "fatal: could not write usage archive record");
                std::process::exit(1);
            }
        }

        self.0.capped.lock().clear();
        self.reenroll_uncapped().await;
    }

    /// Evaluates soft/hard caps for every configured contract and the
    /// global cap, disenrolling/disabling as needed (§4.H "Cap evaluation").
    async fn cap_check_once(&self) {
        let Some(net) = &self.0.net else { return };

        let (sums, net_cap) = {
            let _guard = net.lock.lock().await;
            let mut sums = std::collections::HashMap::new();
            net.net_stats.counters().range(|id, counter| {
                sums.insert(id.to_string(), counter.sum());
                true
            });
            (sums, self.0.controller.net_cap())
        };
        let total: u64 = sums.values().sum();

        // Publish per-contract cap telemetry for every configured contract,
        // independent of which branch below acts on it.
        for id in self.0.controller.contracts() {
            let limit = net_cap.get(&id).copied().unwrap_or(0);
            let sum = sums.get(&id).copied().unwrap_or(0);
            let status = match cap::evaluate_contract(sum, limit) {
                CapFlag::Ok => 0u8,
                CapFlag::Soft => 1,
                CapFlag::Hard => 2,
            };
            crate::metrics::set_total_bytes(&id, sum);
            crate::metrics::set_caplimit_bytes(&id, limit);
            crate::metrics::set_caplimit_status(&id, status);
            crate::metrics::set_remaining_caplimit_bytes(&id, limit.saturating_sub(sum));
        }

        if cap::global_trip(total, net.cfg.global_limit) {
            tracing::warn!(total, limit = net.cfg.global_limit, "global network-usage cap tripped");
            let snapshot = self.0.controller.status();
            for (id, status) in snapshot {
                if status.enrolled {
                    if let Err(err) = self.0.controller.disenroll(&id).await {
                        tracing::warn!(contract_id = %id, %err, "could not disenroll contract after global cap trip");
                    }
                }
                let already_capped = self.0.capped.lock().contains(&id);
                if !already_capped {
                    if let Err(err) = self.0.controller.disable(&id) {
                        tracing::warn!(contract_id = %id, %err, "could not disable contract after global cap trip");
                    }
                    self.0.capped.lock().insert(id);
                }
            }
            return;
        }

        for (id, limit) in net_cap {
            // A contract with a configured cap but no counter yet has seen
            // no traffic this window; log and skip rather than treat it as
            // zero usage, matching the nil-counter handling elsewhere.
            let Some(sum) = sums.get(&id).copied() else {
                tracing::debug!(contract_id = %id, "no counter yet for capped contract, skipping this tick");
                continue;
            };

            match cap::evaluate_contract(sum, limit) {
                CapFlag::Ok => {}
                CapFlag::Soft => {
                    if self.0.controller.status().get(&id).is_some_and(|s| s.enrolled) {
                        if let Err(err) = self.0.controller.disenroll(&id).await {
                            tracing::warn!(contract_id = %id, %err, "could not disenroll contract at soft cap");
                        }
                    }
                    self.0.capped.lock().insert(id);
                }
                CapFlag::Hard => {
                    if self.0.controller.status().get(&id).is_some_and(|s| s.enrolled) {
                        if let Err(err) = self.0.controller.disenroll(&id).await {
                            tracing::warn!(contract_id = %id, %err, "could not disenroll contract at hard cap");
                        }
                    }
                    if let Err(err) = self.0.controller.disable(&id) {
                        tracing::warn!(contract_id = %id, %err, "could not disable contract at hard cap");
                    }
                    self.0.capped.lock().insert(id);
                }
            }
        }

        self.reenroll_uncapped().await;
    }

    async fn reenroll_uncapped(&self) {
        let capped = self.0.capped.lock().clone();
        let status = self.0.controller.status();
        for id in self.0.controller.contracts() {
            if capped.contains(&id) {
                continue;
            }
            if !status.get(&id).is_some_and(|s| s.enrolled) {
                if let Err(err) = self.0.controller.enroll(&id).await {
                    tracing::warn!(contract_id = %id, %err, "could not re-enroll contract");
                }
            }
        }
    }

    /// Validates `cfg`, refuses to toggle metering/cap subsystems at
    /// runtime (logged, ignored — a restart is required), and delegates
    /// the contract diff to the controller.
    pub async fn reload(&self, cfg: &RelayConfig) -> Result<(), ManagerError> {
        let metering_requested = cfg
            .network_usage
            .as_ref()
            .is_some_and(|n| n.timeframe != 0 && n.write_interval != 0);
        if metering_requested != self.0.net.is_some() {
            tracing::warn!(
                "enabling or disabling usage metering at runtime is not supported; restart the relay instead"
            );
        }
        self.0.controller.reload(&cfg.contracts).await?;
        Ok(())
    }

    /// Stops the controller, persists a final snapshot, and tears down the
    /// background tasks. Never returns an error (log, continue, per §4.H);
    /// any panic encountered during cleanup is rethrown once cleanup
    /// completes.
    pub async fn stop(&self) {
        let result = std::panic::AssertUnwindSafe(self.stop_inner()).catch_unwind().await;
        self.close_upgrades_once();
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }

    async fn stop_inner(&self) {
        if let Err(err) = self.0.controller.stop().await {
            tracing::warn!(%err, "controller reported errors while stopping");
        }
        if let Some(net) = &self.0.net {
            self.persist_once(net).await;
        }
        for handle in self.0.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    fn close_upgrades_once(&self) {
        if self.0.upgrades_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.0.upgrade_task.lock().take() {
            handle.abort();
        }
    }

    /// A snapshot of controller/window/cap state for operator reporting
    /// (§4.H "Status", surfaced by the REST status endpoint and `SIGUSR2`).
    pub fn status(&self) -> ManagerStatus {
        let started = self.0.controller.started();
        let relays = self.0.controller.status();
        let net_cap = self.0.controller.net_cap();

        let (window, global, sums) = match &self.0.net {
            Some(net) => {
                let mut sums = std::collections::HashMap::new();
                net.net_stats.counters().range(|id, counter| {
                    sums.insert(id.to_string(), counter.sum());
                    true
                });
                let total: u64 = sums.values().sum();
                let window = Some(WindowStatus {
                    since: net.net_stats.created_at(),
                    until: net.next_reset.load(Ordering::Relaxed),
                });
                let global = (net.cfg.global_limit != 0).then_some(GlobalCapStatus { limit: net.cfg.global_limit, usage: total });
                (window, global, sums)
            }
            None => (None, None, std::collections::HashMap::new()),
        };

        let contracts = relays
            .into_iter()
            .map(|(id, snapshot)| {
                let limit = net_cap.get(&id).copied().unwrap_or(0);
                let usage = sums.get(&id).copied().unwrap_or(0);
                ContractStatus {
                    id,
                    addr: snapshot.contract_url,
                    role: snapshot.role,
                    enrolled: snapshot.enrolled,
                    flags: cap::evaluate_contract(usage, limit),
                    net_cap: limit,
                    net_usage: usage,
                }
            })
            .collect();

        ManagerStatus { started, window, global, contracts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::UpgradeMailbox;
    use crate::relaystatus::MockDirectoryClient;
    use crate::controller::MockContractResolver;
    use crate::config::RelayEntry;
    use std::collections::BTreeMap;

    fn entry(net_usage: u64) -> RelayEntry {
        RelayEntry {
            addr: "overlay://a.example".to_string(),
            role: "fronting".to_string(),
            upgrade_channel: Some("default".to_string()),
            net_usage,
            versions: Default::default(),
        }
    }

    async fn manager_with_cap(dir: &tempfile::TempDir, global_limit: u64, per_contract: u64) -> ContractManager {
        let resolver = MockContractResolver::with("overlay://a.example", "cid-a", "https://dir-a/relays");
        let client = Arc::new(MockDirectoryClient::default());
        let controller =
            Controller::new(client, Arc::new(resolver), "1.0.0", Duration::from_secs(3600), UpgradeMailbox::new());
        let mut contracts = BTreeMap::new();
        contracts.insert("overlay://a.example".to_string(), entry(per_contract));
        controller.load(&contracts).await.unwrap();

        let net = NetUsageConfig {
            timeframe: Duration::from_secs(3600),
            global_limit,
            write_interval: Duration::from_secs(3600),
            snapshot_path: dir.path().join("stats.json"),
            archive_dir: dir.path().join("archive"),
        };
        let (executor, _panicked) = TaskExecutor::current();
        ContractManager::new("relay-1", controller, Some(net), 0, executor).unwrap()
    }

    #[tokio::test]
    async fn cap_trip_disenrolls_at_soft_and_disables_at_hard_s2() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_cap(&dir, 1000, 1000).await;
        manager.start().await.unwrap();
        assert!(manager.controller().status()["cid-a"].enrolled);

        let child = manager.0.net.as_ref().unwrap().net_stats.counters().get_or_init("cid-a");
        child.add_in(925);
        manager.cap_check_once().await;
        assert!(!manager.controller().status()["cid-a"].enrolled, "soft cap disenrolls");
        assert!(manager.controller().new_conn("cid-a").is_ok(), "soft cap alone does not disable");

        child.add_in(15); // total 940 -> hard cap
        manager.cap_check_once().await;
        assert!(manager.controller().new_conn("cid-a").is_err(), "hard cap disables");
    }

    #[tokio::test]
    async fn reset_clears_cap_and_reenrolls() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_cap(&dir, 0, 100).await;
        manager.start().await.unwrap();

        let child = manager.0.net.as_ref().unwrap().net_stats.counters().get_or_init("cid-a");
        child.add_in(95); // hard cap (93 of 100)
        manager.cap_check_once().await;
        assert!(manager.controller().new_conn("cid-a").is_err());

        let net = manager.0.net.as_ref().unwrap().clone();
        manager.do_reset(&net, crate::time::now_epoch_s() + 3600).await;
        manager.reenroll_uncapped().await;
        assert!(manager.controller().new_conn("cid-a").is_ok());
    }

    #[tokio::test]
    async fn status_reports_window_and_global_cap() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_cap(&dir, 1000, 0).await;
        manager.start().await.unwrap();

        let status = manager.status();
        assert!(status.started);
        assert!(status.window.is_some());
        assert_eq!(status.global.unwrap().limit, 1000);
        assert_eq!(status.contracts.len(), 1);
    }
}
