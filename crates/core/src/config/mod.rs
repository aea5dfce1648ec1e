//! Persisted configuration (`config.json`, §6): typed structs, `Default`s
//! matching the original's `Defaults()`, and a `validate` pass matching its
//! `Validate()` exactly. Loaded directly from JSON via `serde_json` rather
//! than layered through `figment`/TOML, since the persisted shape here is
//! fixed by the external directory/contract ecosystem (see `SPEC_FULL.md`
//! §1's ambient-stack note).

mod error;
mod filemode;
mod relayentry;

pub use error::ConfigError;
pub use filemode::{FileMode, FileModeError};
pub use relayentry::{RelayEntry, Versions, VALID_ROLES};

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The overlay-network URL scheme every contract endpoint must use.
pub const OVERLAY_SCHEME: &str = "overlay";

fn default_auto_submit_interval() -> u64 {
    5 * 60
}
fn default_timeout() -> u64 {
    5
}
fn default_bufsize() -> usize {
    4096
}
fn default_true() -> bool {
    true
}
fn default_umask() -> FileMode {
    FileMode::new(0o600).expect("0o600 is a valid mode")
}

/// Root config object, `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Overlay-scheme listener address this relay accepts tunnels on.
    pub address: String,
    /// Seconds between share-token scheduler ticks. `0` disables the
    /// scheduler entirely.
    #[serde(default = "default_auto_submit_interval")]
    pub auto_submit_interval: u64,
    /// Directory completed usage timeframes are archived into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<String>,
    /// Maximum seconds a spliced connection may stay open.
    pub maxtime: u64,
    /// Dial/request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Splice buffer size, bytes.
    #[serde(default = "default_bufsize")]
    pub bufsize: usize,
    /// Usage metering and cap configuration; absent disables metering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_usage: Option<NetworkUsageConfig>,
    /// Local REST/status API configuration.
    pub rest_api: RestApiConfig,
    /// Contracts this relay enrolls into, keyed by endpoint URL.
    pub contracts: BTreeMap<String, RelayEntry>,
    /// Whether this relay may apply self-upgrades it is notified of.
    #[serde(default = "default_true")]
    pub auto_upgrade: bool,
    /// Escape-hatch toggles an operator must opt into explicitly.
    #[serde(default)]
    pub danger_zone: DangerZoneConfig,
}

/// Usage metering and cap configuration (`network_usage`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkUsageConfig {
    /// Rolling accounting period, seconds. `0` disables metering.
    #[serde(default)]
    pub timeframe: u64,
    /// Sum-of-all-contracts cap, bytes. `0` disables the global cap.
    #[serde(default)]
    pub global_limit: u64,
    /// Seconds between persisted-snapshot writes. Metering is considered
    /// disabled if `timeframe != 0` but this is left at `0` (matches the
    /// original's "write_interval must be set" fallback).
    #[serde(default)]
    pub write_interval: u64,
    /// Directory completed timeframes are archived into; overrides the
    /// root-level `archive_dir` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<String>,
}

/// Local REST/status API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestApiConfig {
    /// `file://` (unix socket, empty host) or `http://` address.
    pub address: String,
    /// Permission bits applied to the socket file after bind.
    #[serde(default = "default_umask")]
    pub socket_umask: FileMode,
}

/// Escape-hatch configuration an operator must opt into explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DangerZoneConfig {
    /// Permit dialing loopback addresses as a tunnel's next hop.
    #[serde(default)]
    pub allow_loopback: bool,
}

impl RelayConfig {
    /// Loads and parses `config.json` from `path`. Does not validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Validates every rule in §6: required fields, the single-upgrade-
    /// channel rule (defaulting it when only one contract is configured),
    /// per-contract role/scheme checks, and the REST API address scheme.
    ///
    /// On success, any single contract with an empty `upgrade_channel` has
    /// it defaulted to `"default"` in place.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        if self.contracts.is_empty() {
            return Err(ConfigError::NoContracts);
        }

        if self.contracts.len() > 1 {
            let channel_count =
                self.contracts.values().filter(|c| c.upgrade_channel.as_deref().is_some_and(|s| !s.is_empty())).count();
            if channel_count != 1 {
                return Err(ConfigError::AmbiguousUpgradeChannel);
            }
        } else if let Some(entry) = self.contracts.values_mut().next() {
            if entry.upgrade_channel.as_deref().unwrap_or("").is_empty() {
                entry.upgrade_channel = Some("default".to_string());
            }
        }

        for entry in self.contracts.values() {
            entry.validate(OVERLAY_SCHEME)?;
        }

        self.rest_api.validate()?;
        Ok(())
    }
}

impl RestApiConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.address)
            .map_err(|_| ConfigError::InvalidRestApiAddress(self.address.clone()))?;
        match parsed.scheme() {
            "file" => {
                if !parsed.host_str().unwrap_or("").is_empty() {
                    return Err(ConfigError::InvalidRestApiAddress(self.address.clone()));
                }
                Ok(())
            }
            "http" => Ok(()),
            _ => Err(ConfigError::InvalidRestApiAddress(self.address.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_contract(role: &str, channel: Option<&str>) -> RelayEntry {
        RelayEntry {
            addr: "overlay://contract.example".to_string(),
            role: role.to_string(),
            upgrade_channel: channel.map(str::to_string),
            net_usage: 0,
            versions: Versions::default(),
        }
    }

    fn base_config() -> RelayConfig {
        RelayConfig {
            address: "overlay://relay.example:1234".to_string(),
            auto_submit_interval: default_auto_submit_interval(),
            archive_dir: None,
            maxtime: 300,
            timeout: default_timeout(),
            bufsize: default_bufsize(),
            network_usage: None,
            rest_api: RestApiConfig {
                address: "file:///var/run/relay.sock".to_string(),
                socket_umask: default_umask(),
            },
            contracts: BTreeMap::new(),
            auto_upgrade: true,
            danger_zone: DangerZoneConfig::default(),
        }
    }

    #[test]
    fn requires_address() {
        let mut cfg = base_config();
        cfg.address.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingAddress));
    }

    #[test]
    fn requires_at_least_one_contract() {
        let mut cfg = base_config();
        assert_eq!(cfg.validate(), Err(ConfigError::NoContracts));
    }

    #[test]
    fn single_contract_defaults_upgrade_channel() {
        let mut cfg = base_config();
        cfg.contracts.insert("overlay://contract.example".to_string(), base_contract("fronting", None));
        cfg.validate().unwrap();
        assert_eq!(
            cfg.contracts.values().next().unwrap().upgrade_channel.as_deref(),
            Some("default")
        );
    }

    #[test]
    fn multi_contract_requires_exactly_one_channel() {
        let mut cfg = base_config();
        cfg.contracts.insert("overlay://a.example".to_string(), base_contract("fronting", None));
        cfg.contracts.insert("overlay://b.example".to_string(), base_contract("backing", None));
        assert_eq!(cfg.validate(), Err(ConfigError::AmbiguousUpgradeChannel));

        cfg.contracts.get_mut("overlay://a.example").unwrap().upgrade_channel =
            Some("stable".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn multi_contract_rejects_two_channels() {
        let mut cfg = base_config();
        cfg.contracts.insert("overlay://a.example".to_string(), base_contract("fronting", Some("stable")));
        cfg.contracts.insert("overlay://b.example".to_string(), base_contract("backing", Some("edge")));
        assert_eq!(cfg.validate(), Err(ConfigError::AmbiguousUpgradeChannel));
    }

    #[test]
    fn rest_api_rejects_file_scheme_with_host() {
        let mut cfg = base_config();
        cfg.contracts.insert("overlay://contract.example".to_string(), base_contract("fronting", None));
        cfg.rest_api.address = "file://host/var/run/relay.sock".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rest_api_accepts_http() {
        let mut cfg = base_config();
        cfg.contracts.insert("overlay://contract.example".to_string(), base_contract("fronting", None));
        cfg.rest_api.address = "http://127.0.0.1:9090".to_string();
        assert!(cfg.validate().is_ok());
    }
}
