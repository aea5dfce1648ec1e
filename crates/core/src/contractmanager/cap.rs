//! Soft/hard cap threshold arithmetic (§4.H, §9 "Cap-threshold arithmetic").
//!
//! Thresholds are 90%/93% of a configured limit, computed with exact
//! integer arithmetic on the scaled limit rather than `u64 as f64` so that
//! boundary bytes never round to the wrong side.

/// A contract's usage relative to its configured cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapFlag {
    /// Below the soft threshold, or uncapped (`limit == 0`).
    Ok,
    /// At or above 90% of the limit.
    Soft,
    /// At or above 93% of the limit.
    Hard,
}

/// 90% of `limit`, saturating rather than overflowing.
pub fn soft_threshold(limit: u64) -> u64 {
    limit.checked_mul(9).map(|v| v / 10).unwrap_or(u64::MAX)
}

/// 93% of `limit`, saturating rather than overflowing.
pub fn hard_threshold(limit: u64) -> u64 {
    limit.checked_mul(93).map(|v| v / 100).unwrap_or(u64::MAX)
}

/// Evaluates a per-contract cap: `limit == 0` means unlimited. Per-contract
/// thresholds are compared with strict `>` (§4.H).
pub fn evaluate_contract(sum: u64, limit: u64) -> CapFlag {
    if limit == 0 {
        return CapFlag::Ok;
    }
    if sum > hard_threshold(limit) {
        CapFlag::Hard
    } else if sum > soft_threshold(limit) {
        CapFlag::Soft
    } else {
        CapFlag::Ok
    }
}

/// Evaluates the global cap: a trip requires `total >= globalHard`, the one
/// place §4.H uses `>=` rather than `>`.
pub fn global_trip(total: u64, global_limit: u64) -> bool {
    global_limit != 0 && total >= hard_threshold(global_limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_trip_s2() {
        // globalLimit=1000 -> globalSoft=900, globalHard=930.
        assert_eq!(soft_threshold(1000), 900);
        assert_eq!(hard_threshold(1000), 930);

        assert_eq!(evaluate_contract(925, 1000), CapFlag::Soft);
        assert_eq!(evaluate_contract(940, 1000), CapFlag::Hard);
        assert_eq!(evaluate_contract(899, 1000), CapFlag::Ok);
    }

    #[test]
    fn unlimited_cap_is_always_ok() {
        assert_eq!(evaluate_contract(u64::MAX, 0), CapFlag::Ok);
    }

    #[test]
    fn global_trip_uses_inclusive_threshold() {
        assert!(!global_trip(929, 1000));
        assert!(global_trip(930, 1000));
    }

    #[test]
    fn global_trip_disabled_when_limit_zero() {
        assert!(!global_trip(u64::MAX, 0));
    }
}
