//! `RelayEntry`: per-contract enrollment configuration (§3).

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Roles a relay may enroll into a contract as.
pub const VALID_ROLES: &[&str] = &["fronting", "backing", "entropic"];

/// Protocol-version pins stamped into an enrollment request. `software` is
/// always this binary's own version; the rest mirror whichever external
/// protocol surfaces they correspond to and are filled in by the caller
/// that owns the real version constants (kept `Option` here since this
/// crate does not depend on those external definitions).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Versions {
    /// This relay binary's own semver.
    pub software: Option<String>,
    /// Client-relay wire protocol version.
    pub client_relay: Option<String>,
    /// Relay-relay wire protocol version.
    pub relay_relay: Option<String>,
    /// Relay-directory wire protocol version.
    pub relay_dir: Option<String>,
    /// Relay-contract wire protocol version.
    pub relay_contract: Option<String>,
}

/// Configuration for one contract enrollment, as loaded from `config.json`'s
/// `contracts` map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayEntry {
    /// The endpoint this relay advertises to the contract's directory.
    pub addr: String,
    /// Role this relay plays for the contract. Immutable across reload.
    pub role: String,
    /// Optional upgrade-channel name; exactly one configured contract must
    /// carry a non-empty value when more than one contract is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_channel: Option<String>,
    /// Per-contract network-usage cap in bytes. `0` means unlimited.
    #[serde(default)]
    pub net_usage: u64,
    #[serde(default)]
    pub versions: Versions,
}

impl RelayEntry {
    /// Validates the role and endpoint scheme. Does not validate
    /// `upgrade_channel` cross-contract uniqueness; that is a `RelayConfig`
    /// level rule (§6).
    pub fn validate(&self, overlay_scheme: &str) -> Result<(), ConfigError> {
        if !VALID_ROLES.contains(&self.role.as_str()) {
            return Err(ConfigError::InvalidRole(self.role.clone()));
        }
        let parsed = url::Url::parse(&self.addr)
            .map_err(|_| ConfigError::InvalidContractUrl(self.addr.clone()))?;
        if parsed.scheme() != overlay_scheme {
            return Err(ConfigError::InvalidContractUrl(self.addr.clone()));
        }
        Ok(())
    }

    /// `true` if attempting to change from `self`'s role to `other`'s role
    /// on reload (role is immutable once enrolled, see §4.F).
    pub fn changes_role(&self, other: &RelayEntry) -> bool {
        self.role != other.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: &str, addr: &str) -> RelayEntry {
        RelayEntry {
            addr: addr.to_string(),
            role: role.to_string(),
            upgrade_channel: None,
            net_usage: 0,
            versions: Versions::default(),
        }
    }

    #[test]
    fn accepts_known_roles() {
        assert!(entry("fronting", "overlay://contract.example").validate("overlay").is_ok());
        assert!(entry("backing", "overlay://contract.example").validate("overlay").is_ok());
        assert!(entry("entropic", "overlay://contract.example").validate("overlay").is_ok());
    }

    #[test]
    fn rejects_unknown_role() {
        assert!(entry("mystery", "overlay://contract.example").validate("overlay").is_err());
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(entry("fronting", "https://contract.example").validate("overlay").is_err());
    }
}
