//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to the upstream HTTP JSON-RPC endpoint.
//! Handles hex string parsing; node failures surface to the caller
//! unchanged.

use crate::types::{Block, Transaction};
use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

/// Thin JSON-RPC 2.0 client over HTTP.
///
/// Holds a reqwest client for connection reuse; each typed method is one
/// upstream call.
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
}

/// JSON-RPC reply envelope. A missing or null `result` stays `Null` so the
/// typed methods can turn it into their own not-found errors.
#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    error: Option<Value>,
}

impl RpcClient {
    /// Create a client for the given endpoint URL.
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Issue one JSON-RPC request and unwrap its reply envelope.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let reply: RpcReply = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?
            .json()
            .await
            .with_context(|| format!("{} reply is not a JSON-RPC envelope", method))?;

        if let Some(error) = reply.error {
            anyhow::bail!("Node rejected {}: {}", method, error);
        }
        Ok(reply.result)
    }

    /// Get a block by hash with full transaction details.
    pub async fn block_by_hash(&self, hash: B256) -> Result<Block> {
        let params = json!([format!("0x{:x}", hash), true]);
        let result = self.call("eth_getBlockByHash", params).await?;
        if result.is_null() {
            anyhow::bail!("Block {:#x} not found", hash);
        }
        serde_json::from_value(result).context("Failed to deserialize block")
    }

    /// Get a block by number with full transaction details.
    pub async fn block_by_number(&self, number: u64) -> Result<Block> {
        let params = json!([format!("0x{:x}", number), true]);
        let result = self.call("eth_getBlockByNumber", params).await?;
        if result.is_null() {
            anyhow::bail!("Block {} not found", number);
        }
        serde_json::from_value(result).context("Failed to deserialize block")
    }

    /// Get a transaction by hash, plus whether it is still pending
    /// (a pending transaction has no block number yet).
    pub async fn transaction_by_hash(&self, hash: B256) -> Result<(Transaction, bool)> {
        let params = json!([format!("0x{:x}", hash)]);
        let result = self.call("eth_getTransactionByHash", params).await?;
        if result.is_null() {
            anyhow::bail!("Transaction {:#x} not found", hash);
        }
        let tx: Transaction =
            serde_json::from_value(result).context("Failed to deserialize transaction")?;
        let is_pending = tx.block_number.is_none();
        Ok((tx, is_pending))
    }

    /// Get the latest balance of an address in wei.
    pub async fn balance_at(&self, address: Address) -> Result<U256> {
        let params = json!([format!("0x{:x}", address), "latest"]);
        let result = self.call("eth_getBalance", params).await?;
        parse_quantity_result(&result).context("Failed to parse balance")
    }

    /// Get the latest transaction count (nonce) of an address.
    pub async fn transaction_count(&self, address: Address) -> Result<u64> {
        let params = json!([format!("0x{:x}", address), "latest"]);
        let result = self.call("eth_getTransactionCount", params).await?;
        let count = parse_quantity_result(&result).context("Failed to parse transaction count")?;
        count
            .try_into()
            .ok()
            .context("Transaction count out of range")
    }

    /// Get the current gas price suggested by the node.
    pub async fn gas_price(&self) -> Result<U256> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        parse_quantity_result(&result).context("Failed to parse gas price")
    }

    /// Execute a read-only contract call against the latest state.
    pub async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let params = json!([
            {
                "to": format!("0x{:x}", to),
                "data": format!("0x{}", hex::encode(data)),
            },
            "latest"
        ]);
        let result = self.call("eth_call", params).await?;
        let s = result.as_str().context("Call response is not a string")?;
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.is_empty() {
            return Ok(Vec::new());
        }
        let s = crate::types::pad_hex_string(s);
        hex::decode(&s).context("Failed to decode call result hex")
    }

    /// Submit a signed raw transaction; returns the transaction hash.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        let params = json!([format!("0x{}", hex::encode(raw))]);
        let result = self.call("eth_sendRawTransaction", params).await?;
        let s = result.as_str().context("Send response is not a string")?;
        crate::types::parse_b256(s).context("Failed to parse transaction hash")
    }
}

/// Parse a hex-quantity JSON result into a U256.
fn parse_quantity_result(result: &Value) -> Result<U256> {
    let s = result.as_str().context("Quantity response is not a string")?;
    crate::types::parse_hex_quantity(s)
}
