//! Transaction decoder
//!
//! Turns a raw transaction into a normalized transfer event. Recognizes the
//! two ERC-20 call shapes (transfer / transferFrom) by their 4-byte selector
//! and parses the calldata words directly; everything else is treated as a
//! native value transfer.

use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use tracing::debug;

use crate::signer;
use crate::types::Transaction;

/// Selector of `transfer(address,uint256)`.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Selector of `transferFrom(address,address,uint256)`.
pub const TRANSFER_FROM_SELECTOR: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

/// A pipeline message from the listener to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    /// Nothing to report (contract creation, undecodable transaction).
    None,
    /// A value transfer touching some destination address.
    Transfer(TransferEvent),
    /// Every transaction of this block has been emitted; the checkpoint
    /// may advance past it.
    BlockComplete(U256),
}

/// A decoded value transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    /// Sender, recovered from the transaction signature
    pub from: Address,
    /// Destination: the transaction target, or the ERC-20 transfer recipient
    pub to: Address,
    /// Amount in wei or token base units
    pub amount: U256,
    /// Token contract address, present only for ERC-20 calls
    pub contract: Option<Address>,
    /// True when the transaction was seen in the mempool rather than a block
    pub is_pending: bool,
    /// Transaction hash
    pub tx_hash: B256,
}

/// Decode a transaction into a notify event.
///
/// Contract creations and transactions whose sender cannot be recovered
/// produce `NotifyEvent::None`, as do recognized ERC-20 calls with a
/// malformed parameter list. Decode problems are logged, never propagated.
pub fn decode_transaction(tx: &Transaction, is_pending: bool) -> NotifyEvent {
    let Some(to) = tx.to else {
        debug!(
            "Transaction {:#x} has no recipient (contract creation), skipping",
            tx.hash
        );
        return NotifyEvent::None;
    };

    let from = match signer::recover_sender(tx) {
        Ok(addr) => addr,
        Err(e) => {
            debug!("Could not recover sender of {:#x}: {:#}", tx.hash, e);
            return NotifyEvent::None;
        }
    };

    match decode_erc20_call(&tx.input) {
        // A recognized token call: destination and amount come from the
        // calldata, the transaction target becomes the contract field.
        Some(Ok((dest, amount))) => {
            debug!(
                "Contract({:x}): {:x} => {:x} / Value: {} (pending:{})",
                to, from, dest, amount, is_pending
            );
            NotifyEvent::Transfer(TransferEvent {
                from,
                to: dest,
                amount,
                contract: Some(to),
                is_pending,
                tx_hash: tx.hash,
            })
        }
        // Recognized selector with a malformed parameter list: skip.
        Some(Err(e)) => {
            debug!("Invalid token calldata in {:#x}: {:#}", tx.hash, e);
            NotifyEvent::None
        }
        // Anything else is a native value transfer.
        None => {
            debug!(
                "ETH: {:x} => {:x} / Value: {} (pending:{})",
                from, to, tx.value, is_pending
            );
            NotifyEvent::Transfer(TransferEvent {
                from,
                to,
                amount: tx.value,
                contract: None,
                is_pending,
                tx_hash: tx.hash,
            })
        }
    }
}

/// Try to decode calldata as one of the two recognized ERC-20 calls.
///
/// Returns None when the data is too short for a selector or the selector
/// is unknown (the caller falls back to a native transfer), and
/// Some(Err(_)) when the selector matched but the parameter words did not.
fn decode_erc20_call(data: &[u8]) -> Option<Result<(Address, U256)>> {
    if data.len() < 4 {
        return None;
    }

    let selector = &data[..4];
    if selector != TRANSFER_SELECTOR && selector != TRANSFER_FROM_SELECTOR {
        return None;
    }

    let words = split_words(&data[4..]);
    let result = if selector == TRANSFER_SELECTOR {
        // transfer(address to, uint256 value)
        if words.len() != 2 {
            Err(anyhow::anyhow!(
                "transfer expects 2 parameter words, got {}",
                words.len()
            ))
        } else {
            Ok((word_address(&words[0]), U256::from_be_bytes(words[1])))
        }
    } else {
        // transferFrom(address from, address to, uint256 value): the
        // destination is the second word; the reported sender stays the
        // signer of the outer transaction.
        if words.len() != 3 {
            Err(anyhow::anyhow!(
                "transferFrom expects 3 parameter words, got {}",
                words.len()
            ))
        } else {
            Ok((word_address(&words[1]), U256::from_be_bytes(words[2])))
        }
    };

    Some(result)
}

/// Split ABI parameter bytes into 32-byte words, right-padding a final
/// partial word with zeros. Real traffic is always word-aligned.
fn split_words(data: &[u8]) -> Vec<[u8; 32]> {
    data.chunks(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word[..chunk.len()].copy_from_slice(chunk);
            word
        })
        .collect()
}

/// The address packed into the last 20 bytes of an ABI word.
fn word_address(word: &[u8; 32]) -> Address {
    Address::from_slice(&word[12..])
}
