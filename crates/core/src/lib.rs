//! Core relay logic: enrollment, usage accounting, cap enforcement, and
//! the per-connection admission/dial/splice pipeline. Everything here is
//! runtime-agnostic except for `tokio`'s task/sync primitives; the binary
//! entrypoint owns process wiring (CLI parsing, signal handling, the
//! tunnel listener).

pub mod config;
pub mod connhandler;
pub mod contractmanager;
pub mod controller;
pub mod countermap;
pub mod counters;
pub mod meteredstream;
pub mod metrics;
pub mod relaystatus;
pub mod scheduler;
pub mod sharetoken;
pub mod sharetokenstore;
pub mod time;
pub mod usagestore;
