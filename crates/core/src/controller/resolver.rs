//! Contract-lookup boundary: before a contract can be enrolled, the relay
//! must resolve its configured endpoint URL to a stable contract id and the
//! directory's enroll endpoint. The wire exchange behind that lookup is out
//! of scope (`SPEC_FULL.md` §1), so it lives behind this trait.

use futures::future::BoxFuture;

use crate::relaystatus::TransportError;

/// The result of resolving a contract's configured endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContract {
    /// Stable identifier for the contract, used as the registry key.
    pub contract_id: String,
    /// The directory's enroll/heartbeat/disenroll endpoint for this contract.
    pub directory_url: String,
}

/// Resolves a configured contract endpoint URL into its id and directory.
pub trait ContractResolver: Send + Sync {
    fn resolve<'a>(&'a self, contract_url: &'a str) -> BoxFuture<'a, Result<ResolvedContract, TransportError>>;
}

/// An in-memory [`ContractResolver`] for tests: returns a programmed
/// mapping, or a transport error for unknown URLs.
#[derive(Default)]
pub struct MockContractResolver {
    pub entries: parking_lot::Mutex<std::collections::HashMap<String, ResolvedContract>>,
}

impl MockContractResolver {
    pub fn with(contract_url: &str, contract_id: &str, directory_url: &str) -> Self {
        let resolver = Self::default();
        resolver.entries.lock().insert(
            contract_url.to_string(),
            ResolvedContract { contract_id: contract_id.to_string(), directory_url: directory_url.to_string() },
        );
        resolver
    }

    pub fn add(&self, contract_url: &str, contract_id: &str, directory_url: &str) {
        self.entries.lock().insert(
            contract_url.to_string(),
            ResolvedContract { contract_id: contract_id.to_string(), directory_url: directory_url.to_string() },
        );
    }
}

impl ContractResolver for MockContractResolver {
    fn resolve<'a>(&'a self, contract_url: &'a str) -> BoxFuture<'a, Result<ResolvedContract, TransportError>> {
        Box::pin(async move {
            self.entries.lock().get(contract_url).cloned().ok_or_else(|| TransportError {
                endpoint: contract_url.to_string(),
                message: "could not get directory URL".to_string(),
            })
        })
    }
}
