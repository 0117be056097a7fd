//! Error types for fee collection and computation

use std::time::Duration;

use thiserror::Error;

/// Errors raised while turning a raw RPC payload into a `GasSample`.
///
/// Always soft: the poller treats it exactly like a transient endpoint
/// failure and moves on to the next endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },
}

impl FeeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse { reason: reason.into() }
    }
}

/// Errors from a single JSON-RPC request against one endpoint.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Endpoint returned HTTP {status}")]
    Http { status: u16 },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Response decode error: {message}")]
    Decode { message: String },
}

impl RpcError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }
}

/// Why a single poll attempt against one endpoint failed.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Fee(#[from] FeeError),
}
