//! RPC error types
//!
//! Typed boundary between the JSON-RPC transport and the work/submit logic.
//! The only error code callers branch on is `method not found`, which
//! drives the template-method fallback.

use thiserror::Error;

/// JSON-RPC "method not found" (-32601).
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection-level failure: daemon unreachable, timeout, bad TLS.
    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// HTTP-level rejection without a parseable JSON-RPC body.
    #[error("rpc http status {0}")]
    Status(u16),

    /// Error object returned by the daemon.
    #[error("daemon rpc error {code}: {message}")]
    Server { code: i64, message: String },

    /// Response body that is not a JSON-RPC envelope.
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl RpcError {
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, RpcError::Server { code, .. } if *code == METHOD_NOT_FOUND)
    }
}
