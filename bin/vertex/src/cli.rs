//! CLI surface (§6): `start` runs the in-process hard core; `stop`,
//! `restart`, `reload`, `status` talk to a running daemon by pid/signal or
//! status file; `init`, `check-config`, `migrate`, `rollback`, `version`
//! operate on disk without a daemon; `upgrade`, `supervise-upgrade`,
//! `balance`, `withdraw` are external-collaborator stubs.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "vertex", version, about = "Relay node for a decentralized overlay network")]
pub struct Cli {
    /// Directory holding `config.json`, the pid file, and persisted state.
    #[arg(long, global = true, default_value = "/var/lib/vertex")]
    pub data_dir: PathBuf,

    /// Emit newline-delimited JSON logs instead of the human-readable format.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// `tracing_subscriber::EnvFilter` directive string. Falls back to
    /// `RUST_LOG`, then `info`.
    #[arg(long, global = true, default_value = "")]
    pub log_filter: String,

    /// Serve Prometheus metrics on this address. Unset disables the exporter.
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a fresh `config.json` to `data_dir` if one is not already present.
    Init,
    /// Run the relay in the foreground: load config, enroll, serve tunnels.
    Start,
    /// Signal a running daemon to shut down.
    Stop,
    /// Signal a running daemon to shut down, then start a new one.
    Restart,
    /// Signal a running daemon to reload its config and share-token store.
    Reload,
    /// Signal a running daemon to print a status snapshot.
    Status,
    /// Apply a downloaded self-upgrade. Not yet implemented.
    Upgrade,
    /// Supervise a running daemon across a self-upgrade. Not yet implemented.
    SuperviseUpgrade,
    /// Migrate on-disk state to the current schema.
    Migrate,
    /// Roll a staged `config.json.next` back to the prior config.
    Rollback,
    /// Load and validate `config.json` without starting the daemon.
    CheckConfig,
    /// Query this relay's earned balance. Not yet implemented.
    Balance,
    /// Withdraw earned balance. Not yet implemented.
    Withdraw,
    /// Print this binary's version.
    Version,
}
