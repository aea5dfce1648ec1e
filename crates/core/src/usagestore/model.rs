//! On-disk shapes for the usage snapshot and archive files (§3, §6).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One contract's entry inside the persisted snapshot file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractStat {
    /// Bytes accumulated for this contract in the current window.
    pub network_bytes: u64,
}

/// `stats.json`: the persisted usage snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshotFile {
    /// Per-contract byte totals, including zero-valued active contracts and
    /// any legacy (no-longer-configured) contracts.
    pub contract_stats: BTreeMap<String, ContractStat>,
    /// Epoch-ms the current accounting window started.
    pub created_at: i64,
    /// Epoch-ms this file was last written.
    pub updated_at: i64,
}

/// One contract's entry inside a completed-timeframe archive record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractMetric {
    /// Contract id.
    pub contract: String,
    /// Whether this contract was still configured (active) when the
    /// timeframe closed. Usage-only legacy entries default to `false`.
    pub active: bool,
    /// Bytes accumulated for this contract over the timeframe.
    #[serde(rename = "network_usage_bytes")]
    pub network_usage_bytes: u64,
}

/// `<relayId>-<endAt>.json`: one completed timeframe's archive record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveRecord {
    /// This relay's own id.
    pub relay_id: String,
    /// Per-contract totals for the closed timeframe.
    pub metrics: Vec<ContractMetric>,
    /// Epoch-ms the timeframe started.
    pub start_at: i64,
    /// Epoch-ms the timeframe ended.
    pub end_at: i64,
    /// Epoch-ms this record was written.
    pub updated_at: i64,
}

impl ArchiveRecord {
    /// `(relay_id, end_at)` — the archive filename key.
    pub fn keys(&self) -> (String, String) {
        (self.relay_id.clone(), self.end_at.to_string())
    }
}
