//! Scripted in-memory RPC transport for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::fees::error::RpcError;
use crate::services::rpc::RpcTransport;

#[derive(Debug, Clone)]
pub enum MockEndpoint {
    Healthy {
        base_fee: u64,
        priority: [u64; 5],
        head: u64,
        l1_base_fee: Option<u64>,
    },
    /// Every call fails with HTTP 503.
    Failing,
    /// Answers with a fee history that lacks reward percentiles.
    Malformed,
    /// Sleeps past any reasonable timeout before answering.
    Hanging,
    /// Answers fee queries at once but never finishes an `eth_call`.
    SlowOracle { base_fee: u64, head: u64 },
}

#[derive(Default)]
pub struct MockRpcTransport {
    endpoints: Mutex<HashMap<String, MockEndpoint>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockRpcTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(self, url: &str, endpoint: MockEndpoint) -> Self {
        self.set_endpoint(url, endpoint);
        self
    }

    /// Healthy endpoint with a flat base fee and priority fees.
    pub fn with_healthy(self, url: &str, base_fee: u64, priority: u64) -> Self {
        self.with_endpoint(
            url,
            MockEndpoint::Healthy {
                base_fee,
                priority: [priority; 5],
                head: 1_000,
                l1_base_fee: None,
            },
        )
    }

    pub fn with_failing(self, url: &str) -> Self {
        self.with_endpoint(url, MockEndpoint::Failing)
    }

    pub fn set_endpoint(&self, url: &str, endpoint: MockEndpoint) {
        self.endpoints
            .lock()
            .unwrap()
            .insert(url.to_string(), endpoint);
    }

    /// Number of calls of `method` made against `url`.
    pub fn call_count(&self, url: &str, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, m)| u == url && m == method)
            .count()
    }

    pub fn total_calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(u, _)| u == url).count()
    }
}

fn hex(value: u64) -> String {
    format!("{:#x}", value)
}

fn fee_history(base_fee: u64, priority: [u64; 5], head: u64) -> Value {
    let blocks = 4u64;
    let rewards: Vec<Vec<String>> = (0..blocks)
        .map(|_| priority.iter().map(|p| hex(*p)).collect())
        .collect();
    json!({
        "oldestBlock": hex(head + 1 - blocks),
        "baseFeePerGas": vec![hex(base_fee); blocks as usize + 1],
        "gasUsedRatio": vec![0.5; blocks as usize],
        "reward": rewards,
    })
}

#[async_trait]
impl RpcTransport for MockRpcTransport {
    async fn call(
        &self,
        url: &str,
        method: &str,
        _params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), method.to_string()));

        let endpoint = self.endpoints.lock().unwrap().get(url).cloned();
        match endpoint {
            None => Err(RpcError::transport(format!("connection refused: {}", url))),
            Some(MockEndpoint::Failing) => Err(RpcError::Http { status: 503 }),
            Some(MockEndpoint::Hanging) => {
                tokio::time::sleep(timeout + Duration::from_secs(60)).await;
                Err(RpcError::Timeout(timeout))
            }
            Some(MockEndpoint::SlowOracle { base_fee, head }) => match method {
                "eth_feeHistory" => Ok(fee_history(base_fee, [0; 5], head)),
                "eth_blockNumber" => Ok(json!(hex(head))),
                _ => {
                    tokio::time::sleep(timeout + Duration::from_secs(60)).await;
                    Err(RpcError::Timeout(timeout))
                }
            },
            Some(MockEndpoint::Malformed) => match method {
                "eth_feeHistory" => Ok(json!({
                    "oldestBlock": "0x1",
                    "baseFeePerGas": ["0x1", "0x1"],
                    "gasUsedRatio": [0.5],
                })),
                "eth_blockNumber" => Ok(json!("0x1")),
                _ => Ok(json!("0x0")),
            },
            Some(MockEndpoint::Healthy {
                base_fee,
                priority,
                head,
                l1_base_fee,
            }) => match method {
                "eth_feeHistory" => Ok(fee_history(base_fee, priority, head)),
                "eth_blockNumber" => Ok(json!(hex(head))),
                "eth_call" => match l1_base_fee {
                    Some(fee) => Ok(json!(format!("0x{:064x}", fee))),
                    None => Err(RpcError::Rpc {
                        code: -32000,
                        message: "execution reverted".into(),
                    }),
                },
                other => Err(RpcError::Rpc {
                    code: -32601,
                    message: format!("method {} not found", other),
                }),
            },
        }
    }
}
