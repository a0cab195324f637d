//! secp256k1 key management
//!
//! Generates and imports the keys backing locally-managed addresses.
//! An address is the low 20 bytes of Keccak-256 over the uncompressed
//! public key (without the 0x04 tag). The canonical textual form used
//! throughout the crate is lowercase 40-char hex without a 0x prefix.

use alloy_primitives::{keccak256, Address};
use anyhow::{Context, Result};
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;

/// Generate a fresh key pair.
///
/// Returns (address, private) in canonical hex form.
pub fn generate() -> (String, String) {
    let key = SigningKey::random(&mut OsRng);
    (canonical_address(&key_address(&key)), private_hex(&key))
}

/// Import a private key from its 64-char hex representation.
pub fn import_private(private: &str) -> Result<SigningKey> {
    let bytes = hex::decode(private).context("Invalid private key hex")?;
    if bytes.len() != 32 {
        anyhow::bail!(
            "Private key must be 32 bytes (64 hex chars), got {} bytes",
            bytes.len()
        );
    }
    SigningKey::from_slice(&bytes).context("Invalid secp256k1 scalar")
}

/// Derive the address controlled by a key.
pub fn key_address(key: &SigningKey) -> Address {
    let pubkey = key.verifying_key().to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag; hash the 64-byte X||Y body.
    let hash = keccak256(&pubkey.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Derive the canonical address for a private key hex string.
pub fn derive_address(private: &str) -> Result<String> {
    let key = import_private(private)?;
    Ok(canonical_address(&key_address(&key)))
}

/// Canonical hex form of an address: lowercase, no 0x prefix.
pub fn canonical_address(addr: &Address) -> String {
    hex::encode(addr)
}

/// Canonical hex form of a private key: lowercase, no 0x prefix.
pub fn private_hex(key: &SigningKey) -> String {
    hex::encode(key.to_bytes())
}

/// Check whether a string is a plausible hex address (40 hex chars,
/// optionally 0x-prefixed).
pub fn is_address(s: &str) -> bool {
    let s = s.strip_prefix("0x").unwrap_or(s);
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // Private key 0x...01 controls a well-known address.
        let private = "0000000000000000000000000000000000000000000000000000000000000001";
        let address = derive_address(private).unwrap();
        assert_eq!(address, "7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    }

    #[test]
    fn test_generate_roundtrip() {
        let (address, private) = generate();
        assert_eq!(address.len(), 40);
        assert_eq!(private.len(), 64);
        assert_eq!(address, address.to_lowercase());

        // Re-importing the private key must re-derive the same address.
        assert_eq!(derive_address(&private).unwrap(), address);
    }

    #[test]
    fn test_address_matches_pubkey_hash() {
        let (address, private) = generate();
        let key = import_private(&private).unwrap();
        let pubkey = key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&pubkey.as_bytes()[1..65]);
        assert_eq!(address, hex::encode(&hash[12..]));
    }

    #[test]
    fn test_import_rejects_bad_input() {
        assert!(import_private("zz").is_err());
        assert!(import_private("abcd").is_err());
        // Zero is not a valid scalar.
        let zero = "0".repeat(64);
        assert!(import_private(&zero).is_err());
    }

    #[test]
    fn test_is_address() {
        assert!(is_address("7e5f4552091a69125d5dfcb7b8c2659029395bdf"));
        assert!(is_address("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"));
        assert!(!is_address("7e5f4552"));
        assert!(!is_address("zz5f4552091a69125d5dfcb7b8c2659029395bdf"));
    }
}
