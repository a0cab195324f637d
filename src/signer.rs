//! Legacy transaction signing and sender recovery
//!
//! Supports the two signature schemes seen on legacy transactions:
//! pre-EIP-155 ("Homestead", v in {27, 28}) and EIP-155 (chain id folded
//! into v). Signer selection per transaction follows the v field; the
//! protected predicate is `v not in {27, 28} and v != 0`.

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_rlp::{Encodable, Header};
use anyhow::{Context, Result};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use crate::types::Transaction;

/// An unsigned legacy transaction, ready for signing.
#[derive(Debug, Clone)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

/// Check whether a transaction is EIP-155 replay-protected.
pub fn is_protected(v: U256) -> bool {
    if v == U256::from(27) || v == U256::from(28) {
        return false;
    }
    !v.is_zero()
}

/// Extract the chain id folded into an EIP-155 v value.
pub fn chain_id_from_v(v: U256) -> Option<u64> {
    if !is_protected(v) {
        return None;
    }
    let v: u64 = v.try_into().ok()?;
    if v < 35 {
        return None;
    }
    Some((v - 35) / 2)
}

/// Recover the sender address of a signed transaction.
///
/// Dispatches on v: zero or unprotected values go through the Homestead
/// signing hash, anything else through EIP-155 with the folded chain id.
pub fn recover_sender(tx: &Transaction) -> Result<Address> {
    let to = tx
        .to
        .context("Cannot recover the sender of a contract creation")?;

    let (sighash, rec) = if tx.v.is_zero() || !is_protected(tx.v) {
        let v: u64 = tx.v.try_into().context("v out of range")?;
        let rec = v.checked_sub(27).context("Invalid Homestead v")?;
        (signing_hash(tx, to, None), rec)
    } else {
        let v: u64 = tx.v.try_into().context("v out of range")?;
        let chain_id = chain_id_from_v(tx.v).context("Invalid EIP-155 v")?;
        (signing_hash(tx, to, Some(chain_id)), v - 35 - chain_id * 2)
    };

    if rec > 1 {
        anyhow::bail!("Recovery id {} out of range", rec);
    }

    recover_address(sighash, tx.r, tx.s, rec as u8)
}

/// Sign a legacy transaction with the pre-EIP-155 scheme.
///
/// Returns the raw RLP wire encoding (for eth_sendRawTransaction) and the
/// transaction hash (Keccak-256 of that encoding).
pub fn sign_legacy(tx: &LegacyTx, key: &SigningKey) -> Result<(Vec<u8>, B256)> {
    let sighash = legacy_signing_hash(tx);
    let (mut sig, mut rec) = key
        .sign_prehash_recoverable(sighash.as_slice())
        .context("Signature creation failed")?;

    // Ethereum requires the low-s form; flip the recovery parity with it.
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        rec = RecoveryId::from_byte(rec.to_byte() ^ 1).context("Recovery id out of range")?;
    }

    let (r_bytes, s_bytes) = sig.split_bytes();
    let v = 27 + rec.to_byte() as u64;
    let r = U256::from_be_slice(&r_bytes);
    let s = U256::from_be_slice(&s_bytes);

    let raw = encode_signed(tx, v, r, s);
    let hash = keccak256(&raw);
    Ok((raw, hash))
}

/// RLP-encode a list whose payload is written by `build`.
fn rlp_list(build: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut payload = Vec::new();
    build(&mut payload);
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

/// Signing hash of a wire transaction.
///
/// With a chain id this is the EIP-155 nine-element form
/// (…, chain_id, 0, 0); without, the Homestead six-element form.
fn signing_hash(tx: &Transaction, to: Address, chain_id: Option<u64>) -> B256 {
    let encoded = rlp_list(|out| {
        tx.nonce.encode(out);
        tx.gas_price.unwrap_or_default().encode(out);
        tx.gas.encode(out);
        to.encode(out);
        tx.value.encode(out);
        tx.input.as_slice().encode(out);
        if let Some(id) = chain_id {
            id.encode(out);
            0u8.encode(out);
            0u8.encode(out);
        }
    });
    keccak256(&encoded)
}

/// Homestead signing hash of an unsigned legacy transaction.
fn legacy_signing_hash(tx: &LegacyTx) -> B256 {
    let encoded = rlp_list(|out| {
        tx.nonce.encode(out);
        tx.gas_price.encode(out);
        tx.gas_limit.encode(out);
        tx.to.encode(out);
        tx.value.encode(out);
        tx.data.as_slice().encode(out);
    });
    keccak256(&encoded)
}

/// Wire encoding of a signed legacy transaction.
fn encode_signed(tx: &LegacyTx, v: u64, r: U256, s: U256) -> Vec<u8> {
    rlp_list(|out| {
        tx.nonce.encode(out);
        tx.gas_price.encode(out);
        tx.gas_limit.encode(out);
        tx.to.encode(out);
        tx.value.encode(out);
        tx.data.as_slice().encode(out);
        v.encode(out);
        r.encode(out);
        s.encode(out);
    })
}

/// Recover an address from a prehash and raw signature scalars.
fn recover_address(sighash: B256, r: U256, s: U256, rec: u8) -> Result<Address> {
    let sig = Signature::from_scalars(r.to_be_bytes::<32>(), s.to_be_bytes::<32>())
        .context("Invalid signature scalars")?;
    let rec_id = RecoveryId::from_byte(rec).context("Invalid recovery id")?;
    let key = VerifyingKey::recover_from_prehash(sighash.as_slice(), &sig, rec_id)
        .context("Public key recovery failed")?;

    let pubkey = key.to_encoded_point(false);
    let hash = keccak256(&pubkey.as_bytes()[1..]);
    Ok(Address::from_slice(&hash[12..]))
}

/// Test helper: Homestead-sign a wire transaction in place so its sender
/// recovers to the given key.
#[cfg(test)]
pub(crate) fn sign_wire_homestead(tx: &mut Transaction, key: &SigningKey) {
    let to = tx.to.expect("wire tx needs a recipient");
    let sighash = signing_hash(tx, to, None);
    let (mut sig, mut rec) = key.sign_prehash_recoverable(sighash.as_slice()).unwrap();
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        rec = RecoveryId::from_byte(rec.to_byte() ^ 1).unwrap();
    }
    let (r, s) = sig.split_bytes();
    tx.v = U256::from(27 + rec.to_byte() as u64);
    tx.r = U256::from_be_slice(&r);
    tx.s = U256::from_be_slice(&s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;

    fn test_key() -> SigningKey {
        keys::import_private("0000000000000000000000000000000000000000000000000000000000000001")
            .unwrap()
    }

    fn unsigned_wire_tx(to: Address) -> Transaction {
        Transaction {
            hash: B256::ZERO,
            to: Some(to),
            value: U256::from(10u64.pow(18)),
            input: Vec::new(),
            nonce: 7,
            gas: 21000,
            gas_price: Some(U256::from(1_000_000_000u64)),
            v: U256::ZERO,
            r: U256::ZERO,
            s: U256::ZERO,
            block_number: None,
        }
    }

    #[test]
    fn test_protected_predicate() {
        assert!(!is_protected(U256::from(27)));
        assert!(!is_protected(U256::from(28)));
        assert!(!is_protected(U256::ZERO));
        assert!(is_protected(U256::from(37)));
        assert!(is_protected(U256::from(38)));
    }

    #[test]
    fn test_chain_id_from_v() {
        assert_eq!(chain_id_from_v(U256::from(37)), Some(1));
        assert_eq!(chain_id_from_v(U256::from(38)), Some(1));
        assert_eq!(chain_id_from_v(U256::from(2709)), Some(1337));
        assert_eq!(chain_id_from_v(U256::from(27)), None);
        assert_eq!(chain_id_from_v(U256::ZERO), None);
    }

    #[test]
    fn test_homestead_sign_recover_roundtrip() {
        let key = test_key();
        let expected = keys::key_address(&key);
        let to = Address::from_slice(&[0x11; 20]);

        let mut tx = unsigned_wire_tx(to);
        let sighash = signing_hash(&tx, to, None);
        let (mut sig, mut rec) = key.sign_prehash_recoverable(sighash.as_slice()).unwrap();
        if let Some(normalized) = sig.normalize_s() {
            sig = normalized;
            rec = RecoveryId::from_byte(rec.to_byte() ^ 1).unwrap();
        }
        let (r, s) = sig.split_bytes();
        tx.v = U256::from(27 + rec.to_byte() as u64);
        tx.r = U256::from_be_slice(&r);
        tx.s = U256::from_be_slice(&s);

        assert_eq!(recover_sender(&tx).unwrap(), expected);
    }

    #[test]
    fn test_eip155_sign_recover_roundtrip() {
        let key = test_key();
        let expected = keys::key_address(&key);
        let to = Address::from_slice(&[0x22; 20]);
        let chain_id = 1u64;

        let mut tx = unsigned_wire_tx(to);
        let sighash = signing_hash(&tx, to, Some(chain_id));
        let (mut sig, mut rec) = key.sign_prehash_recoverable(sighash.as_slice()).unwrap();
        if let Some(normalized) = sig.normalize_s() {
            sig = normalized;
            rec = RecoveryId::from_byte(rec.to_byte() ^ 1).unwrap();
        }
        let (r, s) = sig.split_bytes();
        tx.v = U256::from(chain_id * 2 + 35 + rec.to_byte() as u64);
        tx.r = U256::from_be_slice(&r);
        tx.s = U256::from_be_slice(&s);

        assert_eq!(recover_sender(&tx).unwrap(), expected);
    }

    #[test]
    fn test_sign_legacy_recoverable() {
        let key = test_key();
        let to = Address::from_slice(&[0x33; 20]);
        let unsigned = LegacyTx {
            nonce: 0,
            gas_price: U256::ZERO,
            gas_limit: 60000,
            to,
            value: U256::from(1234u64),
            data: Vec::new(),
        };

        let (raw, hash) = sign_legacy(&unsigned, &key).unwrap();
        assert_eq!(hash, keccak256(&raw));

        // The raw encoding must carry a Homestead v and recover to the signer.
        let mut tx = unsigned_wire_tx(to);
        tx.nonce = unsigned.nonce;
        tx.gas = unsigned.gas_limit;
        tx.gas_price = Some(unsigned.gas_price);
        tx.value = unsigned.value;
        let sighash = legacy_signing_hash(&unsigned);
        assert_eq!(sighash, signing_hash(&tx, to, None));
    }

    #[test]
    fn test_recover_rejects_zero_v() {
        let mut tx = unsigned_wire_tx(Address::from_slice(&[0x44; 20]));
        tx.r = U256::from(1u64);
        tx.s = U256::from(1u64);
        // v = 0 selects the Homestead signer, whose v range starts at 27.
        assert!(recover_sender(&tx).is_err());
    }

    #[test]
    fn test_recover_rejects_contract_creation() {
        let mut tx = unsigned_wire_tx(Address::ZERO);
        tx.to = None;
        assert!(recover_sender(&tx).is_err());
    }
}
