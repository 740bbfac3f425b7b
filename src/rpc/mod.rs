//! JSON-RPC client for the coin daemon
//!
//! Thin HTTP transport speaking the daemon's JSON-RPC 1.0 dialect with
//! basic auth. Higher layers (work fetch, block submission) own all retry
//! behavior; a call here is a single attempt.

pub mod errors;

pub use errors::{RpcError, METHOD_NOT_FOUND};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::trace;

/// Handle to a daemon's JSON-RPC endpoint.
pub struct DaemonRpc {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
    next_id: AtomicU64,
}

impl DaemonRpc {
    pub fn new(
        url: impl Into<String>,
        auth: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            auth,
            next_id: AtomicU64::new(0),
        })
    }

    /// Issue a single JSON-RPC call and return the `result` value.
    ///
    /// Daemons signal application errors both as HTTP error statuses with a
    /// JSON-RPC body and as 200s with a populated `error` field; both are
    /// mapped to [`RpcError::Server`].
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "method": method,
            "params": params,
            "id": id,
        });
        trace!(method, id, "rpc call");

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some((user, password)) = &self.auth {
            builder = builder.basic_auth(user, Some(password));
        }
        let response = builder.send().await?;
        let status = response.status();

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => return Err(RpcError::Status(status.as_u16())),
            Err(e) => return Err(RpcError::Malformed(e.to_string())),
        };

        let error = body.get("error").cloned().unwrap_or(Value::Null);
        if !error.is_null() {
            let code = error
                .get("code")
                .and_then(Value::as_i64)
                .ok_or_else(|| RpcError::Malformed("error object without code".into()))?;
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            return Err(RpcError::Server { code, message });
        }
        if !status.is_success() {
            return Err(RpcError::Status(status.as_u16()));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| RpcError::Malformed("response without result".into()))
    }
}
