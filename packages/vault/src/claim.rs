//! Redemption claim hashing and verification
//!
//! A claim is signed over a domain-separated structured digest:
//!
//! ```text
//! domain_separator = keccak256(DOMAIN_TYPEHASH ‖ keccak(name) ‖ keccak(version)
//!                              ‖ keccak(chain_id) ‖ keccak(vault_address))
//! struct_hash      = keccak256(CLAIM_TYPEHASH ‖ keccak(recipient) ‖ keccak(token)
//!                              ‖ uint256(amount) ‖ uint256(nonce) ‖ uint256(deadline))
//! digest           = keccak256(0x19 ‖ 0x01 ‖ domain_separator ‖ struct_hash)
//! ```
//!
//! The operator computes the same digest off-chain; both sides must agree
//! byte for byte.

use cosmwasm_std::{Addr, Api, Env, StdResult, Storage};
use tiny_keccak::{Hasher, Keccak};

use crate::allowance::load_allowance;
use crate::error::ContractError;
use crate::msg::RedemptionClaim;
use crate::state::NONCES;

pub const DOMAIN_NAME: &str = "bridge-vault";
pub const DOMAIN_VERSION: &str = "1";

pub const DOMAIN_TYPE: &str =
    "BridgeVaultDomain(string name,string version,string chainId,string verifyingContract)";
pub const CLAIM_TYPE: &str =
    "Claim(string recipient,string token,uint256 amount,uint256 nonce,uint256 deadline)";

/// Compute keccak256 hash of arbitrary data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Left-pad an unsigned integer into a 32-byte big-endian word
pub fn u256_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Domain separator binding claims to one vault deployment
pub fn domain_separator(chain_id: &str, vault_address: &str) -> [u8; 32] {
    let mut data = Vec::with_capacity(160);
    data.extend_from_slice(&keccak256(DOMAIN_TYPE.as_bytes()));
    data.extend_from_slice(&keccak256(DOMAIN_NAME.as_bytes()));
    data.extend_from_slice(&keccak256(DOMAIN_VERSION.as_bytes()));
    data.extend_from_slice(&keccak256(chain_id.as_bytes()));
    data.extend_from_slice(&keccak256(vault_address.as_bytes()));
    keccak256(&data)
}

/// Hash of the claim fields (signature excluded)
pub fn claim_struct_hash(
    recipient: &str,
    token: &str,
    amount: u128,
    nonce: u64,
    deadline: u64,
) -> [u8; 32] {
    let mut data = Vec::with_capacity(192);
    data.extend_from_slice(&keccak256(CLAIM_TYPE.as_bytes()));
    data.extend_from_slice(&keccak256(recipient.as_bytes()));
    data.extend_from_slice(&keccak256(token.as_bytes()));
    data.extend_from_slice(&u256_word(amount));
    data.extend_from_slice(&u256_word(nonce as u128));
    data.extend_from_slice(&u256_word(deadline as u128));
    keccak256(&data)
}

/// Final digest the claim authority signs
pub fn claim_digest(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut data = Vec::with_capacity(66);
    data.extend_from_slice(&[0x19, 0x01]);
    data.extend_from_slice(domain_separator);
    data.extend_from_slice(struct_hash);
    keccak256(&data)
}

impl RedemptionClaim {
    /// Digest of this claim under the vault's domain
    pub fn digest(&self, chain_id: &str, vault_address: &str) -> [u8; 32] {
        let struct_hash = claim_struct_hash(
            &self.recipient,
            &self.token,
            self.amount.u128(),
            self.nonce,
            self.deadline,
        );
        claim_digest(&domain_separator(chain_id, vault_address), &struct_hash)
    }
}

/// Current expected nonce for a recipient
pub fn current_nonce(storage: &dyn Storage, recipient: &Addr) -> StdResult<u64> {
    Ok(NONCES.may_load(storage, recipient)?.unwrap_or_default())
}

/// Check a claim against the signer key, the recipient's nonce, token
/// support and its deadline, in that order. Returns the validated recipient.
pub fn verify_claim(
    storage: &dyn Storage,
    api: &dyn Api,
    env: &Env,
    signer: &[u8],
    claim: &RedemptionClaim,
) -> Result<Addr, ContractError> {
    let digest = claim.digest(&env.block.chain_id, env.contract.address.as_str());
    let valid = api
        .secp256k1_verify(&digest, claim.signature.as_slice(), signer)
        .unwrap_or(false);
    if !valid {
        return Err(ContractError::FakeSignature);
    }

    let recipient = api.addr_validate(&claim.recipient)?;
    let expected = current_nonce(storage, &recipient)?;
    if claim.nonce != expected {
        return Err(ContractError::IncorrectNonce {
            expected,
            got: claim.nonce,
        });
    }

    load_allowance(storage, &claim.token)?;

    let now = env.block.time.seconds();
    if now > claim.deadline {
        return Err(ContractError::Expired {
            deadline: claim.deadline,
            now,
        });
    }

    Ok(recipient)
}

/// Advance the recipient's nonce after a redemption
pub fn advance_nonce(storage: &mut dyn Storage, recipient: &Addr) -> Result<u64, ContractError> {
    let next = current_nonce(storage, recipient)? + 1;
    NONCES.save(storage, recipient, &next)?;
    Ok(next)
}
