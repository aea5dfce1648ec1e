//! Per-connection handler (§4.I): the 7-step pipeline a relay runs for
//! every inbound tunnel request, from admission check through splice.

mod dialer;
mod error;
mod splicer;

pub use dialer::{DialError, DialedStream, Dialer, MockDialer, MockOutcome, TunnelStream};
pub use error::ConnError;
pub use splicer::{MockSplicer, RealSplicer, SpliceError, Splicer};

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::contractmanager::ContractManager;
use crate::meteredstream::{Direction, MeteredStream};
use crate::scheduler::ShareTokenScheduler;
use crate::sharetoken::{verify_admission, ShareToken, TrustedContracts};

/// A parsed inbound request, already split into the PING shortcut and the
/// tunnel fields the rest of the pipeline needs. Parsing the wire framing
/// itself is an external concern (§4.I is about what happens once a
/// request has been decoded).
pub struct ParsedInit {
    /// True for a bare PING probe (§4.I: replied to directly, no admission
    /// check, no dial).
    pub is_ping: bool,
    /// The share-token presented with the request. Ignored when `is_ping`.
    pub token: Arc<dyn ShareToken>,
    /// The next-hop target to dial. Ignored when `is_ping`.
    pub target: String,
}

/// The result of handling one connection.
#[derive(Debug)]
pub enum Outcome {
    /// A PING probe was answered; no tunnel was opened.
    Pong,
    /// A tunnel was opened, spliced, and has now closed normally.
    Tunneled,
}

/// Knobs the dial/splice steps need that are not already owned by the
/// [`ContractManager`] or the scheduler.
#[derive(Debug, Clone)]
pub struct ConnHandlerConfig {
    /// This relay's own public key, checked against the token's
    /// `relay_pubkey` (§4.I step 3).
    pub own_relay_pubkey: String,
    /// Bounds the dial attempt (§4.I step 5).
    pub dial_timeout: Duration,
    /// Bounds the whole splice (§4.I step 6).
    pub max_duration: Duration,
    /// Whether a loopback-addressed target may be dialed (§4.I step 4,
    /// `danger_zone.allow_loopback`).
    pub allow_loopback: bool,
}

/// Drives one connection through the full admission-dial-splice-schedule
/// pipeline. Generic over the dial/splice boundaries so tests can swap in
/// [`MockDialer`]/[`MockSplicer`].
pub struct ConnHandler<D: Dialer, S: Splicer> {
    manager: ContractManager,
    scheduler: Option<Arc<ShareTokenScheduler>>,
    dialer: D,
    splicer: S,
    config: ConnHandlerConfig,
}

impl<D: Dialer, S: Splicer> ConnHandler<D, S> {
    /// Builds a handler bound to `manager`'s controller/counters. `scheduler`
    /// is `None` when this relay does not submit share-tokens itself.
    pub fn new(
        manager: ContractManager,
        scheduler: Option<Arc<ShareTokenScheduler>>,
        dialer: D,
        splicer: S,
        config: ConnHandlerConfig,
    ) -> Self {
        Self { manager, scheduler, dialer, splicer, config }
    }

    /// Runs the §4.I pipeline for one parsed request against `client`,
    /// recording the connection-lifecycle telemetry counters around it.
    pub async fn handle(&self, init: ParsedInit, client: &mut dyn TunnelStream) -> Result<Outcome, ConnError> {
        if init.is_ping {
            return Ok(Outcome::Pong);
        }

        let result = self.handle_tunnel(init, client).await;
        if let Err(err) = &result {
            crate::metrics::inc_connection_error(err.metric_reason());
        }
        result
    }

    async fn handle_tunnel(&self, init: ParsedInit, client: &mut dyn TunnelStream) -> Result<Outcome, ConnError> {
        let contract_id = init.token.contract_id().to_string();

        // Step 2: admission.
        let ctx = self.manager.controller().new_conn(&contract_id)?;

        // Step 3: share-token policy, in the fixed key/expiry/trust/signature order.
        let trusted = TrustedContracts::new(self.manager.controller().contracts());
        verify_admission(init.token.as_ref(), &self.config.own_relay_pubkey, &trusted, crate::time::now_epoch_s())?;

        // Step 4: loopback-target rejection. `target`-scheme inputs are opaque
        // and never classified as loopback, so only plain host/IP forms are checked.
        if !self.config.allow_loopback && is_loopback_target(&init.target) {
            tracing::warn!(contract_id = %contract_id, target = "(target)", "rejected loopback dial target");
            return Err(ConnError::LoopbackRejected);
        }

        // Step 5: dial, raced against contract disable.
        let mut dialed = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ConnError::ContractDisabled),
            result = self.dialer.dial(&init.target, self.config.dial_timeout) => result?,
        };

        // The connection is now admitted and dialed; it counts as "open" for
        // the duration of the splice regardless of how that splice ends.
        crate::metrics::inc_connection_open();
        crate::metrics::inc_connection_count();

        // Step 6: metered wrapping (only when usage metering is configured), then splice.
        let splice_result = match self.manager.counter_for(&contract_id) {
            Some(counter) => {
                let mut metered_client = MeteredStream::new(&mut *client, counter.clone(), Direction::Inbound);
                let mut metered_upstream = MeteredStream::new(&mut *dialed, counter, Direction::Outbound);
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => Err(ConnError::ContractDisabled),
                    result = self.splicer.splice(&mut metered_client, &mut metered_upstream, self.config.max_duration) => result.map_err(ConnError::from),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => Err(ConnError::ContractDisabled),
                    result = self.splicer.splice(client, &mut *dialed, self.config.max_duration) => result.map_err(ConnError::from),
                }
            }
        };
        crate::metrics::dec_connection_open();
        splice_result?;

        // Step 7: hand the presented token to the scheduler for settlement.
        if let Some(scheduler) = &self.scheduler {
            scheduler.schedule(init.token);
        }

        Ok(Outcome::Tunneled)
    }
}

/// Whether `target` (a `host:port` or bare host string) names a loopback or
/// unspecified address. `target://`-scheme inputs are opaque identifiers
/// toward a hidden destination and are never classified as loopback here.
fn is_loopback_target(target: &str) -> bool {
    if target.starts_with("target://") {
        return false;
    }
    let host = target.rsplit_once(':').map(|(host, _)| host).unwrap_or(target);
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(addr) => addr.is_loopback() || addr.is_unspecified(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayEntry;
    use crate::controller::{Controller, MockContractResolver, UpgradeMailbox};
    use crate::relaystatus::MockDirectoryClient;
    use crate::sharetoken::MockShareToken;
    use std::collections::BTreeMap;

    fn entry() -> RelayEntry {
        RelayEntry {
            addr: "overlay://a.example".to_string(),
            role: "fronting".to_string(),
            upgrade_channel: Some("default".to_string()),
            net_usage: 0,
            versions: Default::default(),
        }
    }

    async fn handler_with(
        dialer: MockDialer,
        splicer: MockSplicer,
    ) -> ConnHandler<MockDialer, MockSplicer> {
        let resolver = MockContractResolver::with("overlay://a.example", "cid-a", "https://dir-a/relays");
        let client = Arc::new(MockDirectoryClient::default());
        let controller =
            Controller::new(client, Arc::new(resolver), "1.0.0", Duration::from_secs(3600), UpgradeMailbox::new());
        let mut contracts = BTreeMap::new();
        contracts.insert("overlay://a.example".to_string(), entry());
        controller.load(&contracts).await.unwrap();
        controller.start_with_list(&["cid-a".to_string()]).await.unwrap();

        let (executor, _panicked) = vertex_tasks::TaskExecutor::current();
        let manager = ContractManager::new("relay-1", controller, None, 0, executor).unwrap();
        let config = ConnHandlerConfig {
            own_relay_pubkey: "relay-1".to_string(),
            dial_timeout: Duration::from_secs(5),
            max_duration: Duration::from_secs(60),
            allow_loopback: false,
        };
        ConnHandler::new(manager, None, dialer, splicer, config)
    }

    fn valid_token() -> MockShareToken {
        MockShareToken {
            contract_id: "cid-a".to_string(),
            relay_pubkey: "relay-1".to_string(),
            settlement_open: 0,
            settlement_close: i64::MAX,
            signature_valid: true,
        }
    }

    #[tokio::test]
    async fn ping_short_circuits_before_admission() {
        let handler = handler_with(MockDialer::default(), MockSplicer::default()).await;
        let init = ParsedInit { is_ping: true, token: Arc::new(valid_token()), target: "1.2.3.4:80".to_string() };
        let (mut client, _peer) = tokio::io::duplex(16);
        let outcome = handler.handle(init, &mut client).await.unwrap();
        assert!(matches!(outcome, Outcome::Pong));
    }

    #[tokio::test]
    async fn unknown_contract_is_rejected_at_admission() {
        let handler = handler_with(MockDialer::default(), MockSplicer::default()).await;
        let mut token = valid_token();
        token.contract_id = "cid-unknown".to_string();
        let init = ParsedInit { is_ping: false, token: Arc::new(token), target: "1.2.3.4:80".to_string() };
        let (mut client, _peer) = tokio::io::duplex(16);
        let err = handler.handle(init, &mut client).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(matches!(err, ConnError::Admission(_)));
    }

    #[tokio::test]
    async fn loopback_target_rejected_when_disallowed() {
        let handler = handler_with(MockDialer::default(), MockSplicer::default()).await;
        let init = ParsedInit { is_ping: false, token: Arc::new(valid_token()), target: "127.0.0.1:80".to_string() };
        let (mut client, _peer) = tokio::io::duplex(16);
        let err = handler.handle(init, &mut client).await.unwrap_err();
        assert_eq!(err, ConnError::LoopbackRejected);
    }

    #[tokio::test]
    async fn dial_timeout_maps_to_408() {
        let dialer = MockDialer::default();
        dialer.push(MockOutcome::Timeout);
        let handler = handler_with(dialer, MockSplicer::default()).await;
        let init = ParsedInit { is_ping: false, token: Arc::new(valid_token()), target: "example.net:443".to_string() };
        let (mut client, _peer) = tokio::io::duplex(16);
        let err = handler.handle(init, &mut client).await.unwrap_err();
        assert_eq!(err.status_code(), 408);
        assert_eq!(err, ConnError::DialTimeout);
    }

    #[tokio::test]
    async fn successful_splice_schedules_nothing_without_a_scheduler_and_returns_tunneled() {
        let (upstream, upstream_peer) = tokio::io::duplex(64);
        let dialer = MockDialer::default();
        dialer.push(MockOutcome::Succeed(upstream));
        let handler = handler_with(dialer, MockSplicer::default()).await;

        let (mut client, client_peer) = tokio::io::duplex(64);
        let init = ParsedInit { is_ping: false, token: Arc::new(valid_token()), target: "example.net:443".to_string() };

        drop(client_peer);
        drop(upstream_peer);

        let handle = tokio::spawn(async move { handler.handle(init, &mut client).await });

        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Tunneled));
    }

    #[test]
    fn loopback_detection_covers_localhost_ip_and_unspecified() {
        assert!(is_loopback_target("127.0.0.1:8080"));
        assert!(is_loopback_target("localhost:80"));
        assert!(is_loopback_target("[::1]:80"));
        assert!(is_loopback_target("0.0.0.0:80"));
        assert!(!is_loopback_target("93.184.216.34:443"));
        assert!(!is_loopback_target("target://hidden-relay"));
    }
}
