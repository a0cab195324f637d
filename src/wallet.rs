//! Wallet operations
//!
//! Balance queries and outbound transfers for managed keys. ETH balances
//! are reported as an ether decimal with ten fractional digits; ERC-20
//! balances stay in integer base units. Outbound transactions are legacy
//! transactions signed with the pre-EIP-155 scheme.

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};

use crate::config::Config;
use crate::decoder::TRANSFER_SELECTOR;
use crate::keys;
use crate::rpc::RpcClient;
use crate::signer::{self, LegacyTx};
use crate::types::parse_address;

/// Selector of `balanceOf(address)`.
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

const SEND_ETH_GAS: u64 = 60_000;
const SEND_ERC20_GAS: u64 = 100_000;

/// ETH balance of an address, as an ether decimal string with ten
/// fractional digits.
pub async fn eth_balance(config: &Config, address: &str) -> Result<String> {
    let address = parse_address(address)?;
    let rpc = RpcClient::new(config.rpc_url());
    let wei = rpc.balance_at(address).await?;
    Ok(wei_to_eth_string(wei))
}

/// ERC-20 balance of an address, in integer base units.
pub async fn erc20_balance(config: &Config, address: &str, contract: &str) -> Result<String> {
    let address = parse_address(address)?;
    let contract = parse_address(contract)?;
    let rpc = RpcClient::new(config.rpc_url());

    let result = rpc
        .eth_call(contract, &balance_of_calldata(address))
        .await
        .context("balanceOf call failed")?;
    Ok(U256::from_be_slice(&result).to_string())
}

/// Send ether from a managed key. The amount is a decimal ether string.
/// Returns the transaction hash.
pub async fn send_eth(config: &Config, private: &str, to: &str, amount: &str) -> Result<B256> {
    let key = keys::import_private(private)?;
    let to = parse_address(to)?;
    let value = eth_amount_to_wei(amount)?;

    let rpc = RpcClient::new(config.rpc_url());
    let nonce = rpc
        .transaction_count(keys::key_address(&key))
        .await
        .context("Nonce lookup failed")?;

    let tx = LegacyTx {
        nonce,
        gas_price: U256::ZERO,
        gas_limit: SEND_ETH_GAS,
        to,
        value,
        data: Vec::new(),
    };
    let (raw, hash) = signer::sign_legacy(&tx, &key)?;
    rpc.send_raw_transaction(&raw)
        .await
        .context("Send tx error")?;
    Ok(hash)
}

/// Send ERC-20 tokens from a managed key. The amount is an integer base
/// unit string. Returns the transaction hash.
pub async fn send_erc20(
    config: &Config,
    private: &str,
    contract: &str,
    to: &str,
    amount: &str,
) -> Result<B256> {
    let key = keys::import_private(private)?;
    let contract = parse_address(contract)?;
    let to = parse_address(to)?;
    let amount: U256 = amount.parse().context("Could not convert amount")?;

    let rpc = RpcClient::new(config.rpc_url());
    let nonce = rpc
        .transaction_count(keys::key_address(&key))
        .await
        .context("Nonce lookup failed")?;
    let gas_price = rpc.gas_price().await.context("Gas price lookup failed")?;

    let tx = LegacyTx {
        nonce,
        gas_price,
        gas_limit: SEND_ERC20_GAS,
        to: contract,
        value: U256::ZERO,
        data: transfer_calldata(to, amount),
    };
    let (raw, hash) = signer::sign_legacy(&tx, &key)?;
    rpc.send_raw_transaction(&raw)
        .await
        .context("Send tx error")?;
    Ok(hash)
}

/// ABI-encode a `transfer(address,uint256)` call.
pub fn transfer_calldata(to: Address, amount: U256) -> Vec<u8> {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(to.as_slice());
    data.extend_from_slice(&amount.to_be_bytes::<32>());
    data
}

/// ABI-encode a `balanceOf(address)` call.
fn balance_of_calldata(owner: Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(owner.as_slice());
    data
}

/// Format a wei amount as an ether decimal with exactly ten fractional
/// digits (truncating).
pub fn wei_to_eth_string(wei: U256) -> String {
    let base = U256::from(10u64).pow(U256::from(18u64));
    let whole = wei / base;
    let frac = wei % base;

    let frac = frac.to_string();
    let padded = format!("{}{}", "0".repeat(18 - frac.len()), frac);
    format!("{}.{}", whole, &padded[..10])
}

/// Parse a decimal ether amount into wei. Goes through f64 like the
/// original order path, so precision is limited to what a double carries.
pub fn eth_amount_to_wei(amount: &str) -> Result<U256> {
    let amount: f64 = amount.parse().context("Could not convert amount")?;
    anyhow::ensure!(
        amount.is_finite() && amount >= 0.0,
        "Amount must be a non-negative number"
    );
    let wei = amount * 1e18;
    Ok(U256::from(wei as u128))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode_transaction, NotifyEvent, TransferEvent};
    use crate::signer::sign_wire_homestead;
    use crate::types::Transaction;

    #[test]
    fn test_wei_to_eth_string() {
        assert_eq!(wei_to_eth_string(U256::ZERO), "0.0000000000");
        assert_eq!(
            wei_to_eth_string(U256::from(10u64).pow(U256::from(18u64))),
            "1.0000000000"
        );
        assert_eq!(
            wei_to_eth_string(U256::from(1_234_500_000_000_000_000u64)),
            "1.2345000000"
        );
        // Below the tenth fractional digit: truncated away.
        assert_eq!(wei_to_eth_string(U256::from(1u64)), "0.0000000000");
        assert_eq!(
            wei_to_eth_string(U256::from(100_000_000u64)),
            "0.0000000001"
        );
    }

    #[test]
    fn test_eth_amount_to_wei() {
        assert_eq!(
            eth_amount_to_wei("1").unwrap(),
            U256::from(10u64).pow(U256::from(18u64))
        );
        assert_eq!(
            eth_amount_to_wei("1.5").unwrap(),
            U256::from(1_500_000_000_000_000_000u64)
        );
        assert_eq!(eth_amount_to_wei("0").unwrap(), U256::ZERO);
        assert!(eth_amount_to_wei("abc").is_err());
        assert!(eth_amount_to_wei("-1").is_err());
    }

    #[test]
    fn test_transfer_calldata_shape() {
        let to = Address::from_slice(&[0x11; 20]);
        let data = transfer_calldata(to, U256::from(500u64));
        assert_eq!(data.len(), 68);
        assert_eq!(&data[..4], &TRANSFER_SELECTOR);
        assert_eq!(&data[16..36], to.as_slice());
    }

    #[test]
    fn test_transfer_calldata_decodes_back() {
        // Encoding then decoding a transfer call must round-trip the
        // destination and amount.
        let key = crate::keys::import_private(
            "0000000000000000000000000000000000000000000000000000000000000003",
        )
        .unwrap();
        let contract = Address::from_slice(&[0x42; 20]);
        let dest = Address::from_slice(&[0x24; 20]);
        let amount = U256::from(123_456_789u64);

        let mut tx = Transaction {
            hash: B256::from_slice(&[0x01; 32]),
            to: Some(contract),
            value: U256::ZERO,
            input: transfer_calldata(dest, amount),
            nonce: 0,
            gas: 100_000,
            gas_price: Some(U256::from(1u64)),
            v: U256::ZERO,
            r: U256::ZERO,
            s: U256::ZERO,
            block_number: Some(1),
        };
        sign_wire_homestead(&mut tx, &key);

        match decode_transaction(&tx, false) {
            NotifyEvent::Transfer(TransferEvent {
                to,
                amount: decoded,
                contract: decoded_contract,
                ..
            }) => {
                assert_eq!(to, dest);
                assert_eq!(decoded, amount);
                assert_eq!(decoded_contract, Some(contract));
            }
            other => panic!("expected transfer, got {:?}", other),
        }
    }

    #[test]
    fn test_balance_of_calldata_shape() {
        let owner = Address::from_slice(&[0x22; 20]);
        let data = balance_of_calldata(owner);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(&data[16..], owner.as_slice());
    }
}
