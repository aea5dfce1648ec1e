//! Binary entrypoint: CLI dispatch (§6) and the `start` subcommand's full
//! startup flow. Only `start` runs the in-process hard core; every other
//! subcommand either talks to a running daemon by pid/signal, operates on
//! on-disk files, or is a documented external-collaborator stub.

mod cli;
mod dialer;
mod httpclient;
mod keypair;
mod listener;
mod paths;
mod pidfile;
mod rlimit;
mod signals;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{eyre, Context, Result};
use tokio::net::TcpListener;

use vertex_observability::{init_prometheus_exporter, init_tracing, LoggingConfig};
use vertex_relay_core::config::{DangerZoneConfig, FileMode, RelayConfig, RestApiConfig};
use vertex_relay_core::connhandler::{ConnHandler, ConnHandlerConfig, RealSplicer};
use vertex_relay_core::contractmanager::{ContractManager, ManagerStatus, NetUsageConfig};
use vertex_relay_core::controller::{Controller, UpgradeMailbox, DEFAULT_BEAT_INTERVAL};
use vertex_relay_core::relaystatus::DirectoryClient;
use vertex_relay_core::scheduler::{ShareTokenScheduler, SubmitFn};
use vertex_relay_core::sharetoken::ShareToken;
use vertex_relay_core::sharetokenstore::{reschedule_all, ShareTokenStore};
use vertex_tasks::TaskExecutor;

use cli::{Cli, Command};
use dialer::TcpDialer;
use httpclient::HttpClient;
use paths::RelayPaths;

const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rough floor for the `RLIMIT_NOFILE` startup check. `config.json` has no
/// explicit connection-count knob, so this is a fixed, documented estimate
/// rather than something derived per-config.
const EXPECTED_CONNECTIONS: u64 = 4096;

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    init_tracing(&LoggingConfig { json: cli.log_json, filter: cli.log_filter.clone() }).map_err(|err| eyre!(err))?;
    if let Some(addr) = cli.metrics_addr {
        let buckets: &[(&str, &[f64])] =
            &[("relay_connection_lifetime_seconds", vertex_relay_core::metrics::LIFETIME_BUCKETS_SECONDS)];
        init_prometheus_exporter(addr, buckets).map_err(|err| eyre!(err))?;
    }

    let paths = RelayPaths::new(cli.data_dir.clone());

    match cli.command {
        Command::Version => {
            println!("vertex {SOFTWARE_VERSION}");
            Ok(())
        }
        Command::Init => cmd_init(&paths),
        Command::CheckConfig => cmd_check_config(&paths),
        Command::Migrate => cmd_migrate(&paths),
        Command::Rollback => cmd_rollback(&paths),
        Command::Stop => cmd_stop(&paths),
        Command::Restart => cmd_restart(&paths),
        Command::Reload => cmd_reload(&paths),
        Command::Status => cmd_status(&paths),
        Command::Upgrade | Command::SuperviseUpgrade | Command::Balance | Command::Withdraw => {
            Err(eyre!("not yet implemented"))
        }
        Command::Start => {
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(cmd_start(paths))
        }
    }
}

// --- disk-only subcommands -------------------------------------------------

fn cmd_init(paths: &RelayPaths) -> Result<()> {
    std::fs::create_dir_all(paths.root())?;
    keypair::ensure_keypair(paths)?;

    let config_path = paths.config();
    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "config already present, leaving it untouched");
        return Ok(());
    }

    let template = RelayConfig {
        address: "overlay://0.0.0.0:9000".to_string(),
        auto_submit_interval: 5 * 60,
        archive_dir: None,
        maxtime: 300,
        timeout: 5,
        bufsize: 4096,
        network_usage: None,
        rest_api: RestApiConfig {
            address: "file:///var/run/vertex.sock".to_string(),
            socket_umask: FileMode::new(0o600).map_err(|err| eyre!(err))?,
        },
        contracts: Default::default(),
        auto_upgrade: true,
        danger_zone: DangerZoneConfig::default(),
    };

    std::fs::write(&config_path, serde_json::to_vec_pretty(&template)?)
        .with_context(|| format!("writing {}", config_path.display()))?;
    println!("wrote {} (add at least one contract before running `start`)", config_path.display());
    Ok(())
}

fn cmd_check_config(paths: &RelayPaths) -> Result<()> {
    let mut cfg = load_config(&paths.config())?;
    cfg.validate().map_err(|err| eyre!(err)).with_context(|| "config failed validation")?;
    println!("config.json is valid ({} contract(s) configured)", cfg.contracts.len());
    Ok(())
}

/// Promotes a validated `config.json.next` over `config.json`, backing up
/// the prior file. The only "schema migration" this binary's on-disk state
/// needs, since `RelayConfig`'s shape has no versioned fields of its own.
fn cmd_migrate(paths: &RelayPaths) -> Result<()> {
    let staged = paths.config_staged();
    if !staged.exists() {
        println!("no staged {} found, nothing to migrate", staged.display());
        return Ok(());
    }

    let mut cfg = load_config(&staged)?;
    cfg.validate().map_err(|err| eyre!(err)).with_context(|| "staged config failed validation")?;

    if paths.config().exists() {
        std::fs::rename(paths.config(), backup_path(paths))?;
    }
    std::fs::rename(&staged, paths.config())?;
    println!("promoted {} to {}", staged.display(), paths.config().display());
    Ok(())
}

/// Undoes a pending or already-applied migration: restores the backup
/// `migrate` wrote, or else simply discards an unapplied `config.json.next`.
fn cmd_rollback(paths: &RelayPaths) -> Result<()> {
    let backup = backup_path(paths);
    let staged = paths.config_staged();

    if backup.exists() {
        std::fs::rename(&backup, paths.config())?;
        println!("restored {} from backup", paths.config().display());
    } else if staged.exists() {
        std::fs::remove_file(&staged)?;
        println!("discarded staged {}", staged.display());
    } else {
        println!("nothing to roll back");
    }
    Ok(())
}

fn backup_path(paths: &RelayPaths) -> PathBuf {
    paths.config().with_extension("json.bak")
}

fn load_config(path: &std::path::Path) -> Result<RelayConfig> {
    RelayConfig::load(path).map_err(|err| eyre!(err)).with_context(|| format!("loading {}", path.display()))
}

// --- daemon-dispatch subcommands -------------------------------------------

fn cmd_stop(paths: &RelayPaths) -> Result<()> {
    pidfile::send_signal(&paths.pid_file(), libc::SIGTERM).map_err(|err| eyre!(err))?;
    println!("sent SIGTERM");
    Ok(())
}

fn cmd_restart(paths: &RelayPaths) -> Result<()> {
    cmd_stop(paths)?;
    wait_for_shutdown(paths, Duration::from_secs(30))?;

    let exe = std::env::current_exe()?;
    std::process::Command::new(exe)
        .arg("--data-dir")
        .arg(paths.root())
        .arg("start")
        .spawn()
        .with_context(|| "failed to spawn a new daemon process")?;
    println!("restarted");
    Ok(())
}

fn wait_for_shutdown(paths: &RelayPaths, timeout: Duration) -> Result<()> {
    let deadline = std::time::Instant::now() + timeout;
    while paths.pid_file().exists() {
        if std::time::Instant::now() > deadline {
            return Err(eyre!("daemon did not shut down within {:?}", timeout));
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    Ok(())
}

fn cmd_reload(paths: &RelayPaths) -> Result<()> {
    pidfile::send_signal(&paths.pid_file(), libc::SIGUSR1).map_err(|err| eyre!(err))?;
    println!("sent SIGUSR1 (reload)");
    Ok(())
}

fn cmd_status(paths: &RelayPaths) -> Result<()> {
    pidfile::send_signal(&paths.pid_file(), libc::SIGUSR2).map_err(|err| eyre!(err))?;
    std::thread::sleep(Duration::from_millis(200));
    match std::fs::read_to_string(paths.status_file()) {
        Ok(body) => println!("{body}"),
        Err(_) => println!("sent SIGUSR2; status file not written yet, check the daemon's logs"),
    }
    Ok(())
}

// --- `start` ----------------------------------------------------------------

/// Everything the signal loop needs a handle to: the live config path (for
/// reload), the manager, the share-token store/scheduler, and where to
/// write the status snapshot on `SIGUSR2`.
struct RelayRuntime {
    paths: RelayPaths,
    config_path: PathBuf,
    manager: ContractManager,
    store: Arc<ShareTokenStore>,
    scheduler: Option<Arc<ShareTokenScheduler>>,
}

impl signals::SignalHandlers for RelayRuntime {
    async fn on_reload(&self) {
        let mut cfg = match load_config(&self.config_path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(%err, "reload: could not load config, keeping the running configuration");
                return;
            }
        };
        if let Err(err) = cfg.validate() {
            tracing::warn!(%err, "reload: config failed validation, keeping the running configuration");
            return;
        }
        if let Err(err) = self.manager.reload(&cfg).await {
            tracing::warn!(%err, "reload: contract manager rejected the new configuration");
        }
        if let Some(scheduler) = &self.scheduler {
            reschedule_all(&self.store, scheduler);
        }
    }

    async fn on_status(&self) {
        let status = self.manager.status();
        match serde_json::to_vec_pretty(&status_json(&status)) {
            Ok(body) => {
                if let Err(err) = std::fs::write(self.paths.status_file(), body) {
                    tracing::warn!(%err, "could not write status snapshot");
                }
            }
            Err(err) => tracing::warn!(%err, "could not serialize status snapshot"),
        }
    }
}

fn status_json(status: &ManagerStatus) -> serde_json::Value {
    serde_json::json!({
        "started": status.started,
        "window": status.window.as_ref().map(|w| serde_json::json!({"since": w.since, "until": w.until})),
        "global": status.global.as_ref().map(|g| serde_json::json!({"limit": g.limit, "usage": g.usage})),
        "contracts": status.contracts.iter().map(|c| serde_json::json!({
            "id": c.id,
            "addr": c.addr,
            "role": c.role,
            "enrolled": c.enrolled,
            "net_cap": c.net_cap,
            "net_usage": c.net_usage,
        })).collect::<Vec<_>>(),
    })
}

async fn cmd_start(paths: RelayPaths) -> Result<()> {
    rlimit::warn_if_too_low(EXPECTED_CONNECTIONS);

    keypair::ensure_keypair(&paths)?;
    let own_relay_pubkey = keypair::load_public_hex(&paths)?;

    pidfile::write(&paths.pid_file(), std::process::id()).map_err(|err| eyre!(err))?;
    let result = run_relay(&paths, own_relay_pubkey).await;
    pidfile::remove(&paths.pid_file());
    result
}

/// Promotes a staged `config.json.next` in place, then loads and validates
/// whichever file is now current.
fn load_and_promote_config(paths: &RelayPaths) -> Result<RelayConfig> {
    let staged = paths.config_staged();
    let active_path = if staged.exists() {
        std::fs::rename(&staged, paths.config()).with_context(|| "promoting staged config.json.next")?;
        tracing::info!("promoted staged config.json.next to config.json");
        paths.config()
    } else {
        paths.config()
    };

    let mut cfg = load_config(&active_path)?;
    cfg.validate().map_err(|err| eyre!(err)).with_context(|| "validating config")?;
    Ok(cfg)
}

fn net_usage_config(cfg: &RelayConfig, paths: &RelayPaths) -> Option<NetUsageConfig> {
    let net = cfg.network_usage.as_ref()?;
    if net.timeframe == 0 || net.write_interval == 0 {
        return None;
    }
    let archive_dir = net
        .archive_dir
        .clone()
        .or_else(|| cfg.archive_dir.clone())
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.default_archive_dir());

    Some(NetUsageConfig {
        timeframe: Duration::from_secs(net.timeframe),
        global_limit: net.global_limit,
        write_interval: Duration::from_secs(net.write_interval),
        snapshot_path: paths.stats(),
        archive_dir,
    })
}

async fn run_relay(paths: &RelayPaths, own_relay_pubkey: String) -> Result<()> {
    let cfg = load_and_promote_config(paths)?;

    let http_client = HttpClient::new(Duration::from_secs(cfg.timeout));
    let directory_client: Arc<dyn DirectoryClient> = Arc::new(http_client.clone());
    let resolver: Arc<dyn vertex_relay_core::controller::ContractResolver> = Arc::new(http_client.clone());

    let store = Arc::new(ShareTokenStore::open(paths.sharetokens()).map_err(|err| eyre!(err))?);

    let controller =
        Controller::new(directory_client, resolver, SOFTWARE_VERSION, DEFAULT_BEAT_INTERVAL, UpgradeMailbox::new());
    controller.load(&cfg.contracts).await.map_err(|err| eyre!(err)).with_context(|| "loading contracts")?;

    let (executor, mut panicked_tasks) = TaskExecutor::current();

    let net_cfg = net_usage_config(&cfg, paths);
    let manager = ContractManager::new(
        own_relay_pubkey.clone(),
        controller.clone(),
        net_cfg,
        vertex_relay_core::time::now_epoch_ms(),
        executor.clone(),
    )
    .map_err(|err| eyre!(err))?;

    let scheduler: Option<Arc<ShareTokenScheduler>> = if cfg.auto_submit_interval > 0 {
        let contract_endpoints: HashMap<String, String> = controller.scs();
        let submit_once = httpclient::submit_fn(http_client.clone(), contract_endpoints);
        let store_for_submit = store.clone();
        let submit: SubmitFn = Arc::new(move |token: Arc<dyn ShareToken>| {
            let submit_once = submit_once.clone();
            let store = store_for_submit.clone();
            Box::pin(async move {
                let result = submit_once(token.clone()).await;
                if result.is_ok() {
                    match store.remove(token.contract_id(), token.settlement_open()) {
                        Ok(()) => tracing::info!(contract_id = token.contract_id(), "share-token archived"),
                        Err(err) => tracing::warn!(%err, "could not remove submitted share-token from local store"),
                    }
                }
                result
            })
        });
        Some(Arc::new(ShareTokenScheduler::new(Duration::from_secs(cfg.auto_submit_interval), submit)))
    } else {
        None
    };

    if let Some(scheduler) = &scheduler {
        reschedule_all(&store, scheduler);
    }

    let handler_config = ConnHandlerConfig {
        own_relay_pubkey,
        dial_timeout: Duration::from_secs(cfg.timeout),
        max_duration: Duration::from_secs(cfg.maxtime),
        allow_loopback: cfg.danger_zone.allow_loopback,
    };
    let handler = Arc::new(ConnHandler::new(
        manager.clone(),
        scheduler.clone(),
        TcpDialer,
        RealSplicer::default(),
        handler_config,
    ));

    if let Some(scheduler) = scheduler.clone() {
        executor.spawn_critical("share-token-scheduler", async move {
            scheduler.run().await;
        });
    }

    let bind_addr = listener::bind_addr(&cfg.address).map_err(|err| eyre!(err))?;
    let tcp_listener =
        TcpListener::bind(&bind_addr).await.with_context(|| format!("binding tunnel listener on {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "tunnel listener bound");

    executor.spawn(listener::serve(tcp_listener, handler, executor.clone()));

    manager.start().await.map_err(|err| eyre!(err)).with_context(|| "starting contract manager")?;
    tracing::info!("relay started");

    let runtime = RelayRuntime {
        paths: paths.clone(),
        config_path: paths.config(),
        manager: manager.clone(),
        store,
        scheduler,
    };

    tokio::select! {
        result = signals::run_until_shutdown(&runtime) => {
            result.map_err(|err| eyre!(err)).with_context(|| "signal loop failed")?;
        }
        Some(panicked) = panicked_tasks.recv() => {
            tracing::error!(%panicked, "a critical task panicked, shutting down");
        }
    }

    manager.stop().await;
    Ok(())
}
