use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Error taxonomy for upstream calls. Network-class errors trigger the
/// orchestrator's recovery loop; everything else is handled per item.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl RpcError {
    pub fn is_network(&self) -> bool {
        matches!(self, RpcError::Network(_))
    }

    pub fn is_method_not_found(&self) -> bool {
        matches!(self, RpcError::Rpc { code, .. } if *code == -32601)
    }

    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RpcError::Decode(err.to_string())
        } else {
            RpcError::Network(err.to_string())
        }
    }
}

/// True if any cause in the chain is a network-class RPC error.
pub fn is_network_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<RpcError>().is_some_and(RpcError::is_network))
}

pub fn hex_to_i64(s: &str) -> Option<i64> {
    i64::from_str_radix(strip_prefix(s), 16).ok()
}

pub fn hex_to_u256(s: &str) -> Option<U256> {
    U256::from_str_radix(strip_prefix(s), 16).ok()
}

fn strip_prefix(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: Option<String>,
    pub hash: Option<String>,
    pub parent_hash: Option<String>,
    pub timestamp: Option<String>,
    pub miner: Option<String>,
    pub gas_used: Option<String>,
    pub gas_limit: Option<String>,
    pub base_fee_per_gas: Option<String>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlockHeader {
    pub number: Option<String>,
    pub hash: Option<String>,
    pub parent_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    pub gas: Option<String>,
    pub gas_price: Option<String>,
    pub input: Option<String>,
    pub transaction_index: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub status: Option<String>,
    pub contract_address: Option<String>,
    pub gas_used: Option<String>,
    pub effective_gas_price: Option<String>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub data: Option<String>,
    pub log_index: Option<String>,
}

/// One frame of a callTracer trace. `calls` holds the nested subcalls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFrame {
    #[serde(rename = "type")]
    pub call_type: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    #[serde(default)]
    pub calls: Vec<TraceFrame>,
}

/// The upstream node surface the indexer consumes. Implemented by
/// [`EthRpcClient`] in production and by an in-memory fake in tests.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<i64, RpcError>;
    async fn get_block_with_txs(&self, number: i64) -> Result<Option<RpcBlock>, RpcError>;
    async fn get_block_header(&self, number: i64) -> Result<Option<RpcBlockHeader>, RpcError>;
    async fn get_transaction(&self, hash: &str) -> Result<Option<RpcTransaction>, RpcError>;
    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<RpcReceipt>, RpcError>;
    async fn get_balance(&self, address: &str) -> Result<U256, RpcError>;
    async fn get_code(&self, address: &str) -> Result<String, RpcError>;
    async fn call(&self, to: &str, data: &str) -> Result<String, RpcError>;
    async fn trace_transaction(&self, hash: &str) -> Result<TraceFrame, RpcError>;
    async fn gas_price(&self) -> Result<U256, RpcError>;
    /// Cheap liveness probe; single attempt, no internal retry.
    async fn probe(&self) -> Result<(), RpcError>;
    /// Rebuild the underlying transport after a network failure.
    async fn reconnect(&self);
}

#[derive(Debug)]
pub struct EthRpcClient {
    client: RwLock<Client>,
    url: String,
    timeout: Duration,
}

impl EthRpcClient {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: RwLock::new(Self::build_client(timeout)),
            url,
            timeout,
        }
    }

    fn build_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let client = self.client.read().await.clone();
        let response = client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(RpcError::from_transport)?;

        let envelope: RpcEnvelope = response.json().await.map_err(RpcError::from_transport)?;
        if let Some(err) = envelope.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }

    async fn request_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, RpcError> {
        let result = self.request(method, params).await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }

    async fn request_quantity(&self, method: &str, params: Value) -> Result<U256, RpcError> {
        let result: Option<String> = self.request_typed(method, params).await?;
        let raw = result.ok_or_else(|| RpcError::Decode(format!("{method}: null result")))?;
        hex_to_u256(&raw).ok_or_else(|| RpcError::Decode(format!("{method}: bad quantity {raw}")))
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[async_trait]
impl ChainRpc for EthRpcClient {
    async fn block_number(&self) -> Result<i64, RpcError> {
        let raw = self.request_quantity("eth_blockNumber", json!([])).await?;
        i64::try_from(raw).map_err(|_| RpcError::Decode("eth_blockNumber: overflow".into()))
    }

    async fn get_block_with_txs(&self, number: i64) -> Result<Option<RpcBlock>, RpcError> {
        let params = json!([format!("0x{number:x}"), true]);
        let mut attempts = 0;
        let mut delay = Duration::from_millis(500);

        loop {
            match self
                .request_typed::<RpcBlock>("eth_getBlockByNumber", params.clone())
                .await
            {
                Ok(block) => return Ok(block),
                Err(e) if e.is_network() && attempts < 2 => {
                    attempts += 1;
                    warn!("error fetching block {}: {}. retrying {}/2", number, e, attempts);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_block_header(&self, number: i64) -> Result<Option<RpcBlockHeader>, RpcError> {
        self.request_typed("eth_getBlockByNumber", json!([format!("0x{number:x}"), false]))
            .await
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<RpcTransaction>, RpcError> {
        self.request_typed("eth_getTransactionByHash", json!([hash])).await
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<RpcReceipt>, RpcError> {
        self.request_typed("eth_getTransactionReceipt", json!([hash])).await
    }

    async fn get_balance(&self, address: &str) -> Result<U256, RpcError> {
        self.request_quantity("eth_getBalance", json!([address, "latest"]))
            .await
    }

    async fn get_code(&self, address: &str) -> Result<String, RpcError> {
        let result: Option<String> = self
            .request_typed("eth_getCode", json!([address, "latest"]))
            .await?;
        Ok(result.unwrap_or_else(|| "0x".to_string()))
    }

    async fn call(&self, to: &str, data: &str) -> Result<String, RpcError> {
        let result: Option<String> = self
            .request_typed("eth_call", json!([{"to": to, "data": data}, "latest"]))
            .await?;
        Ok(result.unwrap_or_else(|| "0x".to_string()))
    }

    async fn trace_transaction(&self, hash: &str) -> Result<TraceFrame, RpcError> {
        let result: Option<TraceFrame> = self
            .request_typed(
                "debug_traceTransaction",
                json!([hash, {"tracer": "callTracer"}]),
            )
            .await?;
        result.ok_or_else(|| RpcError::Decode("debug_traceTransaction: null result".into()))
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        self.request_quantity("eth_gasPrice", json!([])).await
    }

    async fn probe(&self) -> Result<(), RpcError> {
        self.request("eth_blockNumber", json!([])).await.map(|_| ())
    }

    async fn reconnect(&self) {
        *self.client.write().await = Self::build_client(self.timeout);
    }
}
