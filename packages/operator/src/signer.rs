//! Claim authority key
//!
//! Claims are signed over the 32-byte domain-separated digest as compact
//! secp256k1 `r ‖ s` with low S, matching the vault's `secp256k1_verify`.

use eyre::{eyre, Result};
use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};

pub trait ClaimSigner: Send + Sync {
    fn sign(&self, digest: &[u8; 32]) -> Result<[u8; 64]>;

    /// Compressed SEC1 public key registered on the vault
    fn public_key(&self) -> [u8; 33];
}

/// Signs with a key held in process memory
pub struct LocalKeySigner {
    key: SigningKey,
}

impl LocalKeySigner {
    /// Load from a hex-encoded 32-byte secret (optional `0x` prefix)
    pub fn from_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret.trim().trim_start_matches("0x"))
            .map_err(|e| eyre!("Claim signer key is not hex: {}", e))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| eyre!("Claim signer key is not a valid secp256k1 scalar"))?;
        Ok(Self { key })
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

impl ClaimSigner for LocalKeySigner {
    fn sign(&self, digest: &[u8; 32]) -> Result<[u8; 64]> {
        let signature: Signature = self
            .key
            .sign_prehash(digest)
            .map_err(|e| eyre!("Failed to sign claim: {}", e))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        Ok(signature.to_bytes().into())
    }

    fn public_key(&self) -> [u8; 33] {
        let point = self.key.verifying_key().to_encoded_point(true);
        let mut compressed = [0u8; 33];
        compressed.copy_from_slice(point.as_bytes());
        compressed
    }
}
