//! Claim authority
//!
//! Issues signed redemption claims the vault accepts through `redeem`. A claim
//! binds recipient, token, amount, the recipient's current vault nonce and a
//! deadline. Claims are stored per correlation id so repeated requests for the
//! same deposit return the identical claim instead of a second signature.

use std::sync::Arc;
use std::time::Duration;

use bridge_vault::msg::RedemptionClaim;
use chrono::Utc;
use cosmwasm_std::{Binary, Uint128};
use thiserror::Error;
use tracing::{info, warn};

use crate::address::AddressValidator;
use crate::destination::NonceSource;
use crate::metrics;
use crate::signer::ClaimSigner;
use crate::store::{ClaimStore, StoreError, StoredClaim};

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("DESTINATION_ADDRESS_INVALID: {0}")]
    InvalidRecipient(String),

    #[error("INVALID_AMOUNT: {0}")]
    InvalidAmount(String),

    #[error("INVALID_CORRELATION_ID: correlation id must not be empty")]
    MissingCorrelationId,

    /// A claim already exists for this correlation id with other terms
    #[error("CORRELATION_ID_CONFLICT: {0} was issued for a different claim")]
    CorrelationConflict(String),

    #[error("NONCE_UNAVAILABLE: {0}")]
    NonceUnavailable(String),

    #[error("SIGNING_FAILED: {0}")]
    Signing(String),

    #[error("stored claim {0} is unreadable")]
    Corrupt(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClaimError {
    pub fn code(&self) -> &'static str {
        match self {
            ClaimError::InvalidRecipient(_) => "DESTINATION_ADDRESS_INVALID",
            ClaimError::InvalidAmount(_) => "INVALID_AMOUNT",
            ClaimError::MissingCorrelationId => "INVALID_CORRELATION_ID",
            ClaimError::CorrelationConflict(_) => "CORRELATION_ID_CONFLICT",
            ClaimError::NonceUnavailable(_) => "NONCE_UNAVAILABLE",
            ClaimError::Signing(_) => "SIGNING_FAILED",
            ClaimError::Corrupt(_) => "STORE_CORRUPT",
            ClaimError::Store(e) => e.code(),
        }
    }
}

/// What a claim is bound to on the vault side
#[derive(Debug, Clone)]
pub struct ClaimDomain {
    pub vault_chain_id: String,
    pub vault_address: String,
    /// Bech32 prefix recipients must carry
    pub address_prefix: String,
    pub claim_ttl: Duration,
}

pub struct ClaimAuthority {
    store: Arc<dyn ClaimStore>,
    nonces: Arc<dyn NonceSource>,
    signer: Arc<dyn ClaimSigner>,
    validator: Arc<dyn AddressValidator>,
    domain: ClaimDomain,
}

impl ClaimAuthority {
    pub fn new(
        store: Arc<dyn ClaimStore>,
        nonces: Arc<dyn NonceSource>,
        signer: Arc<dyn ClaimSigner>,
        validator: Arc<dyn AddressValidator>,
        domain: ClaimDomain,
    ) -> Self {
        Self {
            store,
            nonces,
            signer,
            validator,
            domain,
        }
    }

    /// Issue (or re-issue) the claim for `correlation_id`
    pub async fn issue_claim(
        &self,
        recipient: &str,
        token: &str,
        amount: u128,
        correlation_id: &str,
    ) -> Result<RedemptionClaim, ClaimError> {
        if correlation_id.trim().is_empty() {
            return Err(ClaimError::MissingCorrelationId);
        }

        if let Some(existing) = self.store.find_by_correlation(correlation_id).await? {
            let claim = self.reissue(existing, recipient, token, amount)?;
            metrics::record_claim("reissued");
            return Ok(claim);
        }

        if !self
            .validator
            .is_valid_address(recipient, &self.domain.address_prefix)
        {
            metrics::record_claim("rejected");
            return Err(ClaimError::InvalidRecipient(recipient.to_string()));
        }
        if amount == 0 {
            metrics::record_claim("rejected");
            return Err(ClaimError::InvalidAmount("amount must be positive".to_string()));
        }

        let nonce = self
            .nonces
            .next_nonce(recipient)
            .await
            .map_err(|e| ClaimError::NonceUnavailable(format!("{:#}", e)))?;

        let deadline = Utc::now().timestamp().max(0) as u64 + self.domain.claim_ttl.as_secs();

        let mut claim = RedemptionClaim {
            recipient: recipient.to_string(),
            token: token.to_string(),
            amount: Uint128::new(amount),
            nonce,
            deadline,
            signature: Binary::default(),
        };

        let digest = claim.digest(&self.domain.vault_chain_id, &self.domain.vault_address);
        let signature = self
            .signer
            .sign(&digest)
            .map_err(|e| ClaimError::Signing(format!("{:#}", e)))?;
        claim.signature = Binary::from(signature.to_vec());

        let stored = self
            .store
            .insert_or_get(&StoredClaim {
                correlation_id: correlation_id.to_string(),
                recipient: claim.recipient.clone(),
                token: claim.token.clone(),
                amount: amount.to_string(),
                nonce: nonce as i64,
                deadline: deadline as i64,
                signature: hex::encode(signature),
                created_at: Utc::now(),
            })
            .await?;

        if stored.signature != hex::encode(signature) {
            // Lost the race to a concurrent issuer; theirs is authoritative.
            let claim = self.reissue(stored, recipient, token, amount)?;
            metrics::record_claim("reissued");
            return Ok(claim);
        }

        info!(
            correlation_id,
            recipient,
            token,
            amount,
            nonce,
            deadline,
            "Claim issued"
        );
        metrics::record_claim("signed");
        Ok(claim)
    }

    /// Return a stored claim, provided it matches the requested terms
    fn reissue(
        &self,
        stored: StoredClaim,
        recipient: &str,
        token: &str,
        amount: u128,
    ) -> Result<RedemptionClaim, ClaimError> {
        let claim = stored_to_claim(&stored)?;
        if claim.recipient != recipient || claim.token != token || claim.amount.u128() != amount {
            warn!(
                correlation_id = %stored.correlation_id,
                recipient,
                token,
                amount,
                "Claim request conflicts with the stored claim"
            );
            metrics::record_claim("rejected");
            return Err(ClaimError::CorrelationConflict(stored.correlation_id));
        }
        Ok(claim)
    }
}

fn stored_to_claim(stored: &StoredClaim) -> Result<RedemptionClaim, ClaimError> {
    let corrupt = || ClaimError::Corrupt(stored.correlation_id.clone());

    let amount: u128 = stored.amount.parse().map_err(|_| corrupt())?;
    let nonce = u64::try_from(stored.nonce).map_err(|_| corrupt())?;
    let deadline = u64::try_from(stored.deadline).map_err(|_| corrupt())?;
    let signature = hex::decode(&stored.signature).map_err(|_| corrupt())?;

    Ok(RedemptionClaim {
        recipient: stored.recipient.clone(),
        token: stored.token.clone(),
        amount: Uint128::new(amount),
        nonce,
        deadline,
        signature: Binary::from(signature),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Bech32Validator;
    use crate::signer::LocalKeySigner;
    use crate::store::MemoryClaimStore;
    use async_trait::async_trait;
    use bech32::{ToBase32, Variant};
    use k256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    const SECRET: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    /// Nonce source returning a fixed nonce and counting reads
    struct FixedNonce {
        nonce: AtomicU64,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl NonceSource for FixedNonce {
        async fn next_nonce(&self, _recipient: &str) -> eyre::Result<u64> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.nonce.load(Ordering::SeqCst))
        }
    }

    struct DownNonce;

    #[async_trait]
    impl NonceSource for DownNonce {
        async fn next_nonce(&self, _recipient: &str) -> eyre::Result<u64> {
            Err(eyre::eyre!("lcd unreachable"))
        }
    }

    fn recipient() -> String {
        bech32::encode("terra", [3u8; 20].to_base32(), Variant::Bech32).unwrap()
    }

    fn domain() -> ClaimDomain {
        ClaimDomain {
            vault_chain_id: "localterra".to_string(),
            vault_address: "terra1vault".to_string(),
            address_prefix: "terra".to_string(),
            claim_ttl: Duration::from_secs(86_400),
        }
    }

    fn authority(nonces: Arc<dyn NonceSource>) -> (ClaimAuthority, Arc<LocalKeySigner>) {
        let signer = Arc::new(LocalKeySigner::from_hex(SECRET).unwrap());
        let authority = ClaimAuthority::new(
            Arc::new(MemoryClaimStore::new()),
            nonces,
            signer.clone(),
            Arc::new(Bech32Validator),
            domain(),
        );
        (authority, signer)
    }

    fn fixed(nonce: u64) -> Arc<FixedNonce> {
        Arc::new(FixedNonce {
            nonce: AtomicU64::new(nonce),
            reads: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_issued_claim_is_signed_over_vault_digest() {
        let (authority, signer) = authority(fixed(4));
        let before = Utc::now().timestamp() as u64;

        let claim = authority
            .issue_claim(&recipient(), "uluna", 1_000, "deposit-1")
            .await
            .unwrap();

        assert_eq!(claim.nonce, 4);
        assert!(claim.deadline >= before + 86_400);

        let digest = claim.digest("localterra", "terra1vault");
        let key = VerifyingKey::from_sec1_bytes(&signer.public_key()).unwrap();
        let signature = Signature::from_slice(claim.signature.as_slice()).unwrap();
        key.verify_prehash(&digest, &signature).unwrap();
    }

    #[tokio::test]
    async fn test_repeat_requests_return_identical_claim() {
        let nonces = fixed(0);
        let (authority, _) = authority(nonces.clone());

        let first = authority
            .issue_claim(&recipient(), "uluna", 1_000, "deposit-1")
            .await
            .unwrap();

        // the vault nonce moving on must not change the stored claim
        nonces.nonce.store(1, Ordering::SeqCst);
        let second = authority
            .issue_claim(&recipient(), "uluna", 1_000, "deposit-1")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(nonces.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflicting_terms_for_same_correlation_rejected() {
        let (authority, _) = authority(fixed(0));
        authority
            .issue_claim(&recipient(), "uluna", 1_000, "deposit-1")
            .await
            .unwrap();

        let err = authority
            .issue_claim(&recipient(), "uluna", 2_000, "deposit-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CORRELATION_ID_CONFLICT");
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let (authority, _) = authority(fixed(0));

        let err = authority
            .issue_claim("terra1invalid", "uluna", 1, "c-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DESTINATION_ADDRESS_INVALID");

        let err = authority
            .issue_claim(&recipient(), "uluna", 0, "c-2")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");

        let err = authority
            .issue_claim(&recipient(), "uluna", 1, "  ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CORRELATION_ID");
    }

    #[tokio::test]
    async fn test_nonce_source_failure_issues_nothing() {
        let (authority, _) = authority(Arc::new(DownNonce));

        let err = authority
            .issue_claim(&recipient(), "uluna", 1, "c-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NONCE_UNAVAILABLE");
    }
}
