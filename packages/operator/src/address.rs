//! Destination address validation

use bech32::FromBase32;

/// Checks a candidate address against a network's address scheme
pub trait AddressValidator: Send + Sync {
    fn is_valid_address(&self, candidate: &str, network: &str) -> bool;
}

/// Cosmos bech32 addresses; `network` is the expected human-readable prefix.
///
/// Accepts 20-byte account and 32-byte contract payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bech32Validator;

impl AddressValidator for Bech32Validator {
    fn is_valid_address(&self, candidate: &str, network: &str) -> bool {
        let Ok((hrp, data, _variant)) = bech32::decode(candidate) else {
            return false;
        };
        if hrp != network {
            return false;
        }
        match Vec::<u8>::from_base32(&data) {
            Ok(bytes) => bytes.len() == 20 || bytes.len() == 32,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bech32::{ToBase32, Variant};

    fn encode(hrp: &str, bytes: &[u8]) -> String {
        bech32::encode(hrp, bytes.to_base32(), Variant::Bech32).unwrap()
    }

    #[test]
    fn test_accepts_account_and_contract_addresses() {
        let validator = Bech32Validator;
        assert!(validator.is_valid_address(&encode("terra", &[7u8; 20]), "terra"));
        assert!(validator.is_valid_address(&encode("terra", &[9u8; 32]), "terra"));
    }

    #[test]
    fn test_rejects_wrong_prefix_length_or_encoding() {
        let validator = Bech32Validator;
        assert!(!validator.is_valid_address(&encode("cosmos", &[7u8; 20]), "terra"));
        assert!(!validator.is_valid_address(&encode("terra", &[7u8; 19]), "terra"));
        assert!(!validator.is_valid_address("terra1notbech32", "terra"));
        assert!(!validator.is_valid_address("0x1111111111111111111111111111111111111111", "terra"));
        assert!(!validator.is_valid_address("", "terra"));

        // checksum broken by flipping the last character
        let mut tampered = encode("terra", &[7u8; 20]);
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'q' { 'p' } else { 'q' });
        assert!(!validator.is_valid_address(&tampered, "terra"));
    }
}
