//! Unified observability init: structured logging and a Prometheus metrics
//! exporter, wired up once from the binary entrypoint.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors from initializing the observability stack.
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// The global tracing subscriber was already installed.
    #[error("tracing subscriber already installed: {0}")]
    TracingInit(#[from] tracing::subscriber::SetGlobalDefaultError),
    /// The Prometheus exporter could not bind its listener.
    #[error("prometheus exporter install failed: {0}")]
    MetricsInit(#[from] metrics_exporter_prometheus::BuildError),
}

/// How the relay should emit its logs (§1 "ambient layer").
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Emit newline-delimited JSON instead of the human-readable format.
    pub json: bool,
    /// `tracing_subscriber::EnvFilter` directive string, e.g. `"info"` or
    /// `"vertex_relay_core=debug,warn"`. Falls back to `RUST_LOG`/`info`
    /// when empty.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { json: false, filter: String::new() }
    }
}

/// Installs the global `tracing` subscriber. Call once, at process start,
/// before any other `tracing` macro fires.
pub fn init_tracing(cfg: &LoggingConfig) -> Result<(), ObservabilityError> {
    let filter = if cfg.filter.is_empty() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new(cfg.filter.clone())
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if cfg.json {
        tracing::subscriber::set_global_default(subscriber.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(subscriber.finish())?;
    }
    Ok(())
}

/// Installs the process-wide `metrics` recorder and serves it over
/// `/metrics` on `listen_addr`. Also registers process-level gauges (RSS,
/// open fds, uptime) via `metrics-process`.
///
/// `histogram_buckets` pins explicit bucket boundaries for named
/// histograms (e.g. connection-lifetime seconds) rather than falling back
/// to the exporter's default boundaries.
pub fn init_prometheus_exporter(
    listen_addr: SocketAddr,
    histogram_buckets: &[(&'static str, &[f64])],
) -> Result<(), ObservabilityError> {
    let mut builder = PrometheusBuilder::new().with_http_listener(listen_addr);
    for (name, buckets) in histogram_buckets {
        builder = builder.set_buckets_for_metric(Matcher::Full((*name).to_string()), buckets)?;
    }
    builder.install()?;
    metrics_process::Collector::default().describe();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_logging_config_falls_back_to_info() {
        let cfg = LoggingConfig::default();
        assert!(!cfg.json);
        assert!(cfg.filter.is_empty());
    }
}
