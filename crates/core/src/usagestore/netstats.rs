//! In-memory accounting window: a [`CounterMap`] plus the epoch-ms it was
//! opened at.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::countermap::CounterMap;

/// A single observation window over all contracts' counters.
pub struct NetStats {
    contracts: CounterMap,
    created_at: AtomicI64,
}

impl NetStats {
    /// Creates an empty window stamped with `created_at` (epoch-ms).
    pub fn new(created_at: i64) -> Self {
        Self { contracts: CounterMap::new(), created_at: AtomicI64::new(created_at) }
    }

    /// The underlying counter map.
    pub fn counters(&self) -> &CounterMap {
        &self.contracts
    }

    /// Epoch-ms this window was opened (or last reset).
    pub fn created_at(&self) -> i64 {
        self.created_at.load(Ordering::Relaxed)
    }

    /// Drains every contract counter and re-stamps `created_at`, returning
    /// the non-zero totals drained (§4.D, §4.H).
    pub fn reset_with_date(&self, new_created_at: i64) -> (HashMap<String, u64>, bool) {
        let drained = self.contracts.reset();
        self.created_at.store(new_created_at, Ordering::Relaxed);
        drained
    }
}

/// Decides whether a reset is due immediately at startup and what the next
/// scheduled reset time should be, given `created_at` (epoch-s) and the
/// configured `timeframe` (seconds), evaluated against `now` (epoch-s).
///
/// Mirrors the two-tier staleness check this was distilled from: if the
/// window is more than two timeframes stale, reset immediately (backdated
/// to `now`); if it is between one and two timeframes stale, skip straight
/// to the second boundary without an immediate reset; otherwise the window
/// is still current.
pub fn next_reset(created_at: i64, timeframe: i64, now: i64) -> (i64, bool) {
    if now > created_at + 2 * timeframe {
        (now + timeframe, true)
    } else if now > created_at + timeframe {
        (created_at + 2 * timeframe, false)
    } else {
        (created_at + timeframe, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_window_schedules_one_timeframe_out() {
        let (when, immediate) = next_reset(1_000, 100, 1_050);
        assert_eq!(when, 1_100);
        assert!(!immediate);
    }

    #[test]
    fn moderately_stale_window_skips_to_second_boundary() {
        // now = created_at + timeframe + 1, i.e. just past one timeframe.
        let (when, immediate) = next_reset(1_000, 100, 1_101);
        assert_eq!(when, 1_200);
        assert!(!immediate);
    }

    #[test]
    fn very_stale_window_resets_immediately() {
        // now = created_at + 2*timeframe + 1.
        let (when, immediate) = next_reset(1_000, 100, 1_201);
        assert_eq!(when, 1_301);
        assert!(immediate);
    }

    #[test]
    fn reset_drains_and_restamps() {
        let stats = NetStats::new(1_000);
        let child = stats.counters().get_or_init("contract-a");
        child.add_in(42);

        let (totals, completed) = stats.reset_with_date(2_000);
        assert!(completed);
        assert_eq!(totals.get("contract-a"), Some(&42));
        assert_eq!(stats.created_at(), 2_000);
    }
}
