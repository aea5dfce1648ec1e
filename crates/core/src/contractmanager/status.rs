//! Operator-facing status view (§4.H "Status", §6).

use super::cap::CapFlag;

/// The accounting window's current bounds, present only when metering is
/// enabled.
#[derive(Debug, Clone, Copy)]
pub struct WindowStatus {
    /// Epoch-ms the current window opened.
    pub since: i64,
    /// Epoch-s the window is scheduled to close.
    pub until: i64,
}

/// Global-cap configuration and current usage, present only when the cap
/// subsystem is enabled.
#[derive(Debug, Clone, Copy)]
pub struct GlobalCapStatus {
    /// The configured global limit, bytes (`0` would mean unlimited, but
    /// this view is only populated when a limit is set).
    pub limit: u64,
    /// Sum of every tracked contract's current usage, bytes.
    pub usage: u64,
}

/// One contract's row in the status view.
#[derive(Debug, Clone)]
pub struct ContractStatus {
    /// Contract id (public key).
    pub id: String,
    /// Configured endpoint address.
    pub addr: String,
    /// Enrollment role.
    pub role: String,
    /// Whether the contract is currently enrolled.
    pub enrolled: bool,
    /// Current cap standing.
    pub flags: CapFlag,
    /// Configured per-contract cap, bytes (`0` ≡ unlimited).
    pub net_cap: u64,
    /// Current usage, bytes.
    pub net_usage: u64,
}

/// A full snapshot of the contract manager's state, as surfaced to the
/// REST status endpoint / `USR2` signal handler.
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    /// Whether the controller's heartbeat loop is running.
    pub started: bool,
    /// Present only when usage metering is enabled.
    pub window: Option<WindowStatus>,
    /// Present only when the cap subsystem (global limit) is enabled.
    pub global: Option<GlobalCapStatus>,
    /// Per-contract rows, in no particular order.
    pub contracts: Vec<ContractStatus>,
}
