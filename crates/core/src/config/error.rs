//! Configuration loading and validation errors.

use thiserror::Error;

/// Errors from loading, validating, or reloading `config.json`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `address` was empty or missing.
    #[error("config.address is required")]
    MissingAddress,
    /// No contracts were configured.
    #[error("at least one contract must be configured")]
    NoContracts,
    /// Zero or more than one contract carries a non-empty `upgrade_channel`
    /// while more than one contract is configured.
    #[error("exactly one contract must carry a non-empty upgrade_channel")]
    AmbiguousUpgradeChannel,
    /// A contract's role is not one of the accepted values.
    #[error("invalid relay role: {0}")]
    InvalidRole(String),
    /// A contract's endpoint URL is malformed or uses the wrong scheme.
    #[error("invalid contract url: {0}")]
    InvalidContractUrl(String),
    /// `rest_api.address` used a scheme other than `file` or `http`, or a
    /// `file` scheme URL carried a non-empty host.
    #[error("invalid rest_api address: {0}")]
    InvalidRestApiAddress(String),
    /// The socket file mode was out of range or malformed.
    #[error("invalid socket permissions")]
    InvalidPermissions,
    /// An immutable field (role) was changed on reload.
    #[error("forbidden change, could not apply new relay config for {0}")]
    ReloadRejected(String),
    /// Failed to read or parse the config file itself.
    #[error("failed to load config: {0}")]
    Io(String),
}
