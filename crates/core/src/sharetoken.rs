//! Share-token boundary (§3): the scheduler and connection handler only
//! need a handful of accessors and a signature check, never the real
//! token encoding — so it is modeled as a trait object boundary, backed in
//! tests by [`MockShareToken`].

use std::fmt;

/// A signed artifact received per connection, redeemable after its
/// settlement window opens.
pub trait ShareToken: fmt::Debug + Send + Sync {
    /// The issuing contract's id (public key).
    fn contract_id(&self) -> &str;
    /// The relay public key this token was issued to.
    fn relay_pubkey(&self) -> &str;
    /// Epoch-seconds the settlement window opens.
    fn settlement_open(&self) -> i64;
    /// Epoch-seconds the settlement window closes.
    fn settlement_close(&self) -> i64;
    /// Whether the token's cryptographic signature is valid. Does not
    /// check expiry or trust — see [`verify_admission`].
    fn signature_valid(&self) -> bool;
}

/// Whether `token` is past its settlement window as of `at` (epoch-s).
pub fn is_expired_at(token: &dyn ShareToken, at: i64) -> bool {
    at > token.settlement_close()
}

/// Set of contract ids this relay currently trusts (its configured
/// contracts). A thin newtype so call sites read clearly.
#[derive(Debug, Default, Clone)]
pub struct TrustedContracts(std::collections::HashSet<String>);

impl TrustedContracts {
    /// Builds a trust set from an iterator of contract ids.
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        Self(ids.into_iter().collect())
    }

    /// Whether `contract_id` is currently trusted.
    pub fn contains(&self, contract_id: &str) -> bool {
        self.0.contains(contract_id)
    }
}

/// Errors from [`verify_admission`], in the exact order they are checked
/// (§4.I step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// The token was not issued to this relay's public key.
    #[error("share-token relay public key mismatch")]
    RelayKeyMismatch,
    /// The token's settlement window has already closed.
    #[error("share-token expired")]
    Expired,
    /// The issuing contract is not one this relay is enrolled with.
    #[error("share-token contract is not trusted")]
    UntrustedContract,
    /// The cryptographic signature did not verify.
    #[error("share-token signature invalid")]
    InvalidSignature,
}

/// Validates a received share-token against local policy, in the fixed
/// order prescribed by §4.I: relay public-key match, expiry, contract
/// trust, signature.
pub fn verify_admission(
    token: &dyn ShareToken,
    own_relay_pubkey: &str,
    trusted: &TrustedContracts,
    now: i64,
) -> Result<(), AdmissionError> {
    if token.relay_pubkey() != own_relay_pubkey {
        return Err(AdmissionError::RelayKeyMismatch);
    }
    if is_expired_at(token, now) {
        return Err(AdmissionError::Expired);
    }
    if !trusted.contains(token.contract_id()) {
        return Err(AdmissionError::UntrustedContract);
    }
    if !token.signature_valid() {
        return Err(AdmissionError::InvalidSignature);
    }
    Ok(())
}

/// A test/mock share-token with every field directly settable.
#[derive(Debug, Clone)]
pub struct MockShareToken {
    /// See [`ShareToken::contract_id`].
    pub contract_id: String,
    /// See [`ShareToken::relay_pubkey`].
    pub relay_pubkey: String,
    /// See [`ShareToken::settlement_open`].
    pub settlement_open: i64,
    /// See [`ShareToken::settlement_close`].
    pub settlement_close: i64,
    /// See [`ShareToken::signature_valid`].
    pub signature_valid: bool,
}

impl ShareToken for MockShareToken {
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
        self.signature_valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_token() -> MockShareToken {
        MockShareToken {
            contract_id: "contract-a".to_string(),
            relay_pubkey: "relay-1".to_string(),
            settlement_open: 100,
            settlement_close: 200,
            signature_valid: true,
        }
    }

    #[test]
    fn verifies_in_order_key_then_expiry_then_trust_then_signature() {
        let trusted = TrustedContracts::new(["contract-a".to_string()]);
        let mut token = valid_token();

        token.relay_pubkey = "someone-else".to_string();
        assert_eq!(
            verify_admission(&token, "relay-1", &trusted, 150),
            Err(AdmissionError::RelayKeyMismatch)
        );

        token.relay_pubkey = "relay-1".to_string();
        assert_eq!(
            verify_admission(&token, "relay-1", &trusted, 9_999),
            Err(AdmissionError::Expired)
        );

        let empty_trust = TrustedContracts::default();
        assert_eq!(
            verify_admission(&token, "relay-1", &empty_trust, 150),
            Err(AdmissionError::UntrustedContract)
        );

        token.signature_valid = false;
        assert_eq!(
            verify_admission(&token, "relay-1", &trusted, 150),
            Err(AdmissionError::InvalidSignature)
        );

        token.signature_valid = true;
        assert!(verify_admission(&token, "relay-1", &trusted, 150).is_ok());
    }
}
