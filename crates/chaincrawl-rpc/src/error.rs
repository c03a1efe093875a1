//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to a single RPC endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, reset, non-2xx status, and similar.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` for transient failures worth another attempt on the
    /// same endpoint.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } => true,
            // -32005 is the de-facto "limit exceeded" code used by most providers.
            Self::Rpc(err) => err.code == -32005,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { ms: 0 }
        } else {
            Self::Http(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TransportError::Http("refused".into()).is_retryable());
        assert!(TransportError::Timeout { ms: 100 }.is_retryable());
        assert!(!TransportError::Other("bad".into()).is_retryable());

        let limited = JsonRpcError {
            code: -32005,
            message: "limit exceeded".into(),
            data: None,
        };
        assert!(TransportError::Rpc(limited).is_retryable());

        let reverted = JsonRpcError {
            code: -32000,
            message: "execution reverted".into(),
            data: None,
        };
        assert!(!TransportError::Rpc(reverted).is_retryable());
    }
}
