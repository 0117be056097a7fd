//! Upstream JSON-RPC access.

pub mod rpc;

#[cfg(test)]
pub mod mock_rpc;

pub use rpc::{HttpRpcClient, RpcTransport};
