//! Local share-token store (§6 `sharetokens`): persists tokens the relay has
//! received but not yet submitted, so a restart can reschedule them without
//! losing pending settlements. The real on-disk encoding is an external
//! library's concern; this models the narrow surface the manager's startup
//! path and `SIGUSR1` reload actually use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sharetoken::ShareToken;

/// Errors from [`ShareTokenStore`] operations.
#[derive(Debug, Error)]
pub enum ShareTokenStoreError {
    /// The store file could not be read or written.
    #[error("share-token store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The store file's JSON was malformed.
    #[error("share-token store decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The on-disk encoding of one stored token: just enough to reconstruct a
/// [`crate::sharetoken::MockShareToken`]-shaped record and re-`schedule` it.
/// Production token encodings carry their own signature bytes; this crate
/// only needs the fields the scheduler and admission checks key off of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredShareToken {
    /// See [`ShareToken::contract_id`].
    pub contract_id: String,
    /// See [`ShareToken::relay_pubkey`].
    pub relay_pubkey: String,
    /// See [`ShareToken::settlement_open`].
    pub settlement_open: i64,
    /// See [`ShareToken::settlement_close`].
    pub settlement_close: i64,
    /// Opaque signature payload, carried through unexamined.
    pub signature: String,
}

/// A JSON-file-backed local store of pending share-tokens.
pub struct ShareTokenStore {
    path: PathBuf,
    tokens: Mutex<HashMap<String, StoredShareToken>>,
}

impl ShareTokenStore {
    /// Opens (or lazily creates on first save) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ShareTokenStoreError> {
        let path = path.into();
        let tokens = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, tokens: Mutex::new(tokens) })
    }

    /// A stable key identifying a token for dedup/removal purposes: there is
    /// no single unique field in the trait surface, so contract id plus
    /// settlement-open second is used (two tokens from the same contract
    /// opening at the same second are treated as the same pending entry).
    fn key(contract_id: &str, settlement_open: i64) -> String {
        format!("{contract_id}:{settlement_open}")
    }

    /// Records `token` as pending, persisting the store immediately.
    pub fn put(&self, token: StoredShareToken) -> Result<(), ShareTokenStoreError> {
        let key = Self::key(&token.contract_id, token.settlement_open);
        self.tokens.lock().insert(key, token);
        self.flush()
    }

    /// Removes a previously stored token (called once it has been
    /// successfully submitted), persisting the store immediately.
    pub fn remove(&self, contract_id: &str, settlement_open: i64) -> Result<(), ShareTokenStoreError> {
        self.tokens.lock().remove(&Self::key(contract_id, settlement_open));
        self.flush()
    }

    /// Every token currently pending, in no particular order. Called once
    /// at startup to reschedule prior-session tokens (§4.E "Startup").
    pub fn all(&self) -> Vec<StoredShareToken> {
        self.tokens.lock().values().cloned().collect()
    }

    fn flush(&self) -> Result<(), ShareTokenStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(&*self.tokens.lock())?;
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }
}

impl ShareToken for StoredShareToken {
    fn contract_id(&self) -> &str {
        &self.contract_id
    }
    fn relay_pubkey(&self) -> &str {
        &self.relay_pubkey
    }
    fn settlement_open(&self) -> i64 {
        self.settlement_open
    }
    fn settlement_close(&self) -> i64 {
        self.settlement_close
    }
    fn signature_valid(&self) -> bool {
        !self.signature.is_empty()
    }
}

/// Reschedules every token in `store` onto `scheduler`, matching §4.E's
/// startup behavior: one `schedule` call per stored token, with no special
/// casing for windows that already opened in the past.
pub fn reschedule_all(store: &ShareTokenStore, scheduler: &crate::scheduler::ShareTokenScheduler) {
    for token in store.all() {
        let token: Arc<dyn ShareToken> = Arc::new(token);
        scheduler.schedule(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(contract: &str, open: i64) -> StoredShareToken {
        StoredShareToken {
            contract_id: contract.to_string(),
            relay_pubkey: "relay-1".to_string(),
            settlement_open: open,
            settlement_close: open + 3600,
            signature: "sig".to_string(),
        }
    }

    #[test]
    fn put_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharetokens.json");

        let store = ShareTokenStore::open(&path).unwrap();
        store.put(token("contract-a", 100)).unwrap();

        let reopened = ShareTokenStore::open(&path).unwrap();
        assert_eq!(reopened.all().len(), 1);
    }

    #[test]
    fn remove_drops_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareTokenStore::open(dir.path().join("sharetokens.json")).unwrap();
        store.put(token("contract-a", 100)).unwrap();
        store.remove("contract-a", 100).unwrap();
        assert!(store.all().is_empty());
    }

    #[test]
    fn open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareTokenStore::open(dir.path().join("does-not-exist.json")).unwrap();
        assert!(store.all().is_empty());
    }
}
