//! Thin `reqwest`-backed implementations of the directory/contract
//! transport traits `vertex-relay-core` leaves as external collaborators
//! (`SPEC_FULL.md` §1, §6 "Wire interactions"). The wire encoding here is a
//! reasonable default, not a pinned protocol: the hard core never depends
//! on it beyond the trait boundary.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use vertex_relay_core::controller::{ContractResolver, ResolvedContract};
use vertex_relay_core::relaystatus::{DirectoryClient, EnrollOutcome, EnrollRequest, TransportError};
use vertex_relay_core::scheduler::SubmitError;
use vertex_relay_core::sharetoken::ShareToken;

/// A `reqwest::Client` wrapper implementing [`DirectoryClient`] and
/// [`ContractResolver`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client with only timeout/tls defaults always builds");
        Self { client }
    }
}

#[derive(Debug, Serialize)]
struct EnrollBody<'a> {
    contract_id: Option<&'a str>,
    addr: &'a str,
    role: &'a str,
    net_usage: u64,
}

#[derive(Debug, Deserialize, Default)]
struct EnrollResponseBody {
    #[serde(default)]
    upgrade_available: Option<String>,
}

impl DirectoryClient for HttpClient {
    fn enroll<'a>(&'a self, req: &'a EnrollRequest) -> BoxFuture<'a, Result<EnrollOutcome, TransportError>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .post(&req.directory_url)
                .header("Relay-Version", &req.software_version)
                .json(&EnrollBody {
                    contract_id: None,
                    addr: &req.relay.addr,
                    role: &req.relay.role,
                    net_usage: req.relay.net_usage,
                });
            if req.initial {
                builder = builder.header("Relay-Negotiate-Version", "1");
            }

            let response = builder.send().await.map_err(|err| to_transport_error(&req.directory_url, &err))?;
            if !response.status().is_success() {
                return Err(TransportError {
                    endpoint: req.directory_url.clone(),
                    message: format!("directory returned status {}", response.status()),
                });
            }
            let body: EnrollResponseBody = response
                .json()
                .await
                .unwrap_or_default();
            Ok(EnrollOutcome { upgrade_available: body.upgrade_available })
        })
    }

    fn disenroll<'a>(&'a self, req: &'a EnrollRequest) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let response = self
                .client
                .delete(&req.directory_url)
                .header("Relay-Version", &req.software_version)
                .send()
                .await
                .map_err(|err| to_transport_error(&req.directory_url, &err))?;
            if !response.status().is_success() {
                return Err(TransportError {
                    endpoint: req.directory_url.clone(),
                    message: format!("directory returned status {}", response.status()),
                });
            }
            Ok(())
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResolveResponseBody {
    contract_id: String,
    directory_url: String,
}

impl ContractResolver for HttpClient {
    fn resolve<'a>(&'a self, contract_url: &'a str) -> BoxFuture<'a, Result<ResolvedContract, TransportError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(contract_url)
                .send()
                .await
                .map_err(|err| to_transport_error(contract_url, &err))?;
            if !response.status().is_success() {
                return Err(TransportError {
                    endpoint: contract_url.to_string(),
                    message: format!("contract returned status {}", response.status()),
                });
            }
            let body: ResolveResponseBody = response.json().await.map_err(|err| TransportError {
                endpoint: contract_url.to_string(),
                message: format!("malformed contract response: {err}"),
            })?;
            Ok(ResolvedContract { contract_id: body.contract_id, directory_url: body.directory_url })
        })
    }
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    contract_id: &'a str,
    relay_pubkey: &'a str,
    settlement_open: i64,
    settlement_close: i64,
}

/// Builds the `submit` closure the `ShareTokenScheduler` calls for each due
/// token. `contract_endpoints` maps contract id to its configured overlay
/// endpoint; the submit URL is that endpoint with `/submit` appended, a
/// reasonable default rather than a pinned protocol (`SPEC_FULL.md` §1).
/// Tokens from a contract no longer in the map fail with a network error
/// so the scheduler retries until the window closes.
pub fn submit_fn(
    client: HttpClient,
    contract_endpoints: std::collections::HashMap<String, String>,
) -> impl Fn(std::sync::Arc<dyn ShareToken>) -> BoxFuture<'static, Result<(), SubmitError>> + Send + Sync + Clone + 'static
{
    move |token| {
        let client = client.clone();
        let endpoints = contract_endpoints.clone();
        Box::pin(async move {
            let Some(base) = endpoints.get(token.contract_id()) else {
                return Err(SubmitError::Network(format!(
                    "no known submit endpoint for contract {}",
                    token.contract_id()
                )));
            };
            let submit_url = format!("{}/submit", base.trim_end_matches('/'));
            let body = SubmitBody {
                contract_id: token.contract_id(),
                relay_pubkey: token.relay_pubkey(),
                settlement_open: token.settlement_open(),
                settlement_close: token.settlement_close(),
            };
            let response = client
                .client
                .post(&submit_url)
                .json(&body)
                .send()
                .await
                .map_err(|err| SubmitError::Network(err.to_string()))?;
            match response.status() {
                status if status.is_success() => Ok(()),
                status if status.as_u16() == 410 => Err(SubmitError::SettlementClosed),
                status => Err(SubmitError::Network(format!("submit returned status {status}"))),
            }
        })
    }
}

fn to_transport_error(endpoint: &str, err: &reqwest::Error) -> TransportError {
    TransportError { endpoint: endpoint.to_string(), message: err.to_string() }
}
