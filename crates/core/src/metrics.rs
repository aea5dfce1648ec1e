//! Relay-specific metric definitions, mirroring the namespacing of the
//! `wl_relay` telemetry package this crate was distilled from, expressed
//! through the `metrics` facade (the exporter itself lives outside the
//! hard core — see `SPEC_FULL.md` §1).

use std::time::Duration;

/// Histogram buckets (seconds) used for connection lifetime, matching the
/// reference telemetry package's bucket boundaries.
pub const LIFETIME_BUCKETS_SECONDS: &[f64] =
    &[0.1, 1.0, 5.0, 15.0, 30.0, 60.0, 90.0, 120.0];

/// A connection was admitted and is now being spliced.
pub fn inc_connection_open() {
    metrics::gauge!("relay_connection_open_count").increment(1.0);
}

/// A previously open connection finished (successfully or not).
pub fn dec_connection_open() {
    metrics::gauge!("relay_connection_open_count").decrement(1.0);
}

/// A connection was rejected or failed before/while being spliced.
pub fn inc_connection_error(reason: &'static str) {
    metrics::counter!("relay_connection_error_count", "reason" => reason).increment(1);
}

/// A connection was successfully admitted.
pub fn inc_connection_count() {
    metrics::counter!("relay_connection_count").increment(1);
}

/// Records the lifetime of a spliced connection leg.
pub fn observe_connection_lifetime(duration: Duration) {
    metrics::histogram!("relay_connection_lifetime_seconds").record(duration.as_secs_f64());
}

/// Publishes the remaining bytes before a contract's cap is hit (0 if
/// unlimited or already capped).
pub fn set_remaining_caplimit_bytes(contract: &str, remaining: u64) {
    metrics::gauge!("relay_network_remaining_caplimit_bytes", "contract" => contract.to_string())
        .set(remaining as f64);
}

/// Publishes a contract's configured cap, in bytes (0 ≡ unlimited).
pub fn set_caplimit_bytes(contract: &str, limit: u64) {
    metrics::gauge!("relay_network_caplimit_bytes", "contract" => contract.to_string())
        .set(limit as f64);
}

/// Cap status, encoded as 0=ok, 1=soft, 2=hard.
pub fn set_caplimit_status(contract: &str, status: u8) {
    metrics::gauge!("relay_network_caplimit_status", "contract" => contract.to_string())
        .set(status as f64);
}

/// Publishes total bytes transferred for a contract in the current window.
pub fn set_total_bytes(contract: &str, total: u64) {
    metrics::gauge!("relay_network_total_bytes", "contract" => contract.to_string())
        .set(total as f64);
}
