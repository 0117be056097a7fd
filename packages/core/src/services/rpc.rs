use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::fees::{
    calculator::RawFeeHistory,
    error::RpcError,
    l1::L1FeeModel,
    types::Percentile,
};

/// Issues one JSON-RPC request against one endpoint URL.
///
/// Implementations must honour `timeout` for the whole request.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(
        &self,
        url: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError>;
}

/// JSON-RPC over HTTP POST.
#[derive(Clone, Default)]
pub struct HttpRpcClient {
    http: Client,
}

impl HttpRpcClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn call(
        &self,
        url: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RpcError::Timeout(timeout)
                } else {
                    RpcError::transport(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(RpcError::Http {
                status: response.status().as_u16(),
            });
        }

        let body = response.json::<JsonRpcResponse>().await.map_err(|err| {
            if err.is_timeout() {
                RpcError::Timeout(timeout)
            } else {
                RpcError::decode(err.to_string())
            }
        })?;

        if let Some(error) = body.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        body.result
            .filter(|result| !result.is_null())
            .ok_or_else(|| RpcError::decode(format!("{} returned no result", method)))
    }
}

/// `eth_feeHistory` over the last `blocks` blocks at every monitored percentile.
pub async fn fetch_fee_history(
    transport: &dyn RpcTransport,
    url: &str,
    blocks: u64,
    timeout: Duration,
) -> Result<RawFeeHistory, RpcError> {
    let percentiles: Vec<u8> = Percentile::ALL.iter().map(|p| p.value()).collect();
    let result = transport
        .call(
            url,
            "eth_feeHistory",
            json!([format!("{:#x}", blocks), "latest", percentiles]),
            timeout,
        )
        .await?;

    serde_json::from_value(result)
        .map_err(|err| RpcError::decode(format!("eth_feeHistory: {}", err)))
}

/// `eth_blockNumber` as the raw hex quantity.
pub async fn fetch_block_number(
    transport: &dyn RpcTransport,
    url: &str,
    timeout: Duration,
) -> Result<String, RpcError> {
    let result = transport.call(url, "eth_blockNumber", json!([]), timeout).await?;
    result
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RpcError::decode(format!("eth_blockNumber returned {}", result)))
}

/// Read the current L1 base fee (wei) from the rollup's fee oracle.
pub async fn fetch_l1_base_fee(
    transport: &dyn RpcTransport,
    url: &str,
    model: &L1FeeModel,
    timeout: Duration,
) -> Result<u64, RpcError> {
    let (to, data) = model.oracle_call();
    let result = transport
        .call(
            url,
            "eth_call",
            json!([{ "to": to, "data": data }, "latest"]),
            timeout,
        )
        .await?;

    let raw = result
        .as_str()
        .ok_or_else(|| RpcError::decode(format!("eth_call returned {}", result)))?;
    decode_uint256(raw)
}

/// Decode an ABI-encoded `uint256` return value that must fit in `u64`.
fn decode_uint256(raw: &str) -> Result<u64, RpcError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::decode(format!("'{}' is not hex", raw)))?
        .trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|err| RpcError::decode(format!("uint256 '{}': {}", raw, err)))
}
