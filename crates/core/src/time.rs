//! Thin wall-clock helpers shared by the scheduler and contract manager.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current epoch-seconds. Saturates to `0` if the clock is before the
/// epoch (never expected in practice).
pub fn now_epoch_s() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Current epoch-milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
