use alloy_primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use crate::ledger::{Ledger, SnapshotId};

/// Errors from the JSON-RPC connection.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The request never produced a response (connection refused, reset, timeout).
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code} from {method}: {message}")]
    Response {
        method: String,
        code: i64,
        message: String,
    },

    #[error("failed to decode {method} response: {reason}")]
    Decode { method: String, reason: String },

    #[error("null result from {0}")]
    NullResult(String),

    #[error("timeout waiting for receipt of {0}")]
    ReceiptTimeout(B256),
}

impl RpcError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Parameters shared by `eth_estimateGas` and `eth_sendTransaction`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,
}

/// One log entry of a transaction receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Transaction receipt returned by eth_getTransactionReceipt.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_hex")]
    pub status: u64,
    #[serde(deserialize_with = "deserialize_u64_hex")]
    pub block_number: u64,
    #[serde(deserialize_with = "deserialize_u64_hex")]
    pub gas_used: u64,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

fn deserialize_u64_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

fn parse_u64_hex(method: &str, hex: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

/// JSON-RPC connection to the ledger under test.
///
/// Constructed once per run and shared (via `Arc`) by the isolation
/// controller and both escrow clients.
pub struct RpcClient {
    url: String,
    client: reqwest::Client,
    request_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            request_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends a raw JSON-RPC request and decodes its result.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let id = self.next_id();
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        trace!(method, id, "rpc request");

        let resp = self.client.post(&self.url).json(&body).send().await?;
        let text = resp.text().await?;

        let rpc_resp: JsonRpcResponse<T> =
            serde_json::from_str(&text).map_err(|e| RpcError::Decode {
                method: method.to_string(),
                reason: format!("{e}; raw: {text}"),
            })?;

        if let Some(err) = rpc_resp.error {
            return Err(RpcError::Response {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }

        rpc_resp
            .result
            .ok_or_else(|| RpcError::NullResult(method.to_string()))
    }

    /// Returns the node-managed accounts.
    pub async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        self.call("eth_accounts", json!([])).await
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let hex: String = self.call("eth_chainId", json!([])).await?;
        parse_u64_hex("eth_chainId", &hex)
    }

    /// Returns the balance of an address at the latest block.
    pub async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
        self.call("eth_getBalance", json!([address, "latest"])).await
    }

    /// Returns the code deployed at an address (empty for plain accounts).
    pub async fn get_code(&self, address: Address) -> Result<Bytes, RpcError> {
        self.call("eth_getCode", json!([address, "latest"])).await
    }

    /// Returns the next nonce for an address, counting pending transactions.
    pub async fn get_nonce(&self, address: Address) -> Result<u64, RpcError> {
        let hex: String = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_u64_hex("eth_getTransactionCount", &hex)
    }

    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        let hex: String = self.call("eth_gasPrice", json!([])).await?;
        u128::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| RpcError::Decode {
            method: "eth_gasPrice".into(),
            reason: e.to_string(),
        })
    }

    /// Estimates gas for a call without executing it.
    pub async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RpcError> {
        let hex: String = self.call("eth_estimateGas", json!([request])).await?;
        parse_u64_hex("eth_estimateGas", &hex)
    }

    /// Sends a transaction signed by a node-managed account.
    pub async fn send_transaction(&self, request: &CallRequest) -> Result<B256, RpcError> {
        self.call("eth_sendTransaction", json!([request])).await
    }

    /// Sends a raw signed transaction and returns the tx hash.
    pub async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<B256, RpcError> {
        let hex_tx = format!("0x{}", hex::encode(raw_tx));
        self.call("eth_sendRawTransaction", json!([hex_tx])).await
    }

    /// Returns the receipt for `tx_hash`, or `None` while it is pending.
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        match self.call("eth_getTransactionReceipt", json!([tx_hash])).await {
            Ok(receipt) => Ok(Some(receipt)),
            Err(RpcError::NullResult(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Waits for a transaction receipt with polling.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: std::time::Duration,
    ) -> Result<TransactionReceipt, RpcError> {
        let start = tokio::time::Instant::now();
        let poll = std::time::Duration::from_millis(100);

        loop {
            if let Some(receipt) = self.get_transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            if start.elapsed() > timeout {
                return Err(RpcError::ReceiptTimeout(tx_hash));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// `evm_snapshot`, supported by ganache, anvil and hardhat.
    pub async fn evm_snapshot(&self) -> Result<SnapshotId, RpcError> {
        let id: U256 = self.call("evm_snapshot", json!([])).await?;
        Ok(SnapshotId(id))
    }

    /// `evm_revert`; the backend discards the snapshot afterwards.
    pub async fn evm_revert(&self, id: SnapshotId) -> Result<bool, RpcError> {
        self.call("evm_revert", json!([id.0])).await
    }
}

#[async_trait]
impl Ledger for RpcClient {
    async fn snapshot(&self) -> Result<SnapshotId, RpcError> {
        self.evm_snapshot().await
    }

    async fn revert(&self, id: SnapshotId) -> Result<bool, RpcError> {
        self.evm_revert(id).await
    }
}
