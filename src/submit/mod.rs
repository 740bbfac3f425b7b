//! Dual-path block submission
//!
//! A solved block goes out twice: broadcast over the P2P connection and
//! submitted over RPC. The paths are independent and independently
//! retried; afterwards the RPC outcome is compared against what the
//! proof-of-work itself predicts. A disagreement is only ever a warning,
//! because the other path may already have propagated the block.

use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::chain::Block;
use crate::codec::WireEncode;
use crate::network::{ConnectionManager, Message};
use crate::profile::NetworkProfile;
use crate::rpc::{DaemonRpc, RpcError};
use crate::util::{RetryPolicy, Retryable};

/// Per-path retry bounds. Submission is urgent but a dead path must not
/// hold the block hostage forever.
const SUBMIT_RETRY_DELAY: Duration = Duration::from_secs(10);
const SUBMIT_RETRY_ATTEMPTS: u32 = 10;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Retryable condition whose diagnostic was already printed.
    #[error("retrying silently")]
    Silent,
}

impl Retryable for SubmitError {
    fn is_silent(&self) -> bool {
        matches!(self, SubmitError::Silent)
    }
}

/// Broadcast the block over the current P2P connection.
///
/// No acknowledgement exists on this path; queuing the message is
/// success. No connection is a transient condition for the retry loop.
pub fn submit_block_p2p(
    block: &Block,
    manager: &ConnectionManager,
    profile: &NetworkProfile,
) -> Result<(), SubmitError> {
    let Some(conn) = manager.try_connection() else {
        error!(
            "no daemon connection when block submittal attempted! {}",
            profile
                .adapter
                .block_hash(&block.header.to_bytes())
        );
        return Err(SubmitError::Silent);
    };
    conn.send(Message::Block(block.clone()))
        .map_err(|_| SubmitError::Silent)
}

/// Submit the block over RPC and reconcile the daemon's verdict against
/// the proof-of-work expectation.
///
/// The method mirrors whichever template call produced the work:
/// `submitblock` (with a template-mode fallback for daemons predating it)
/// when the work came from `getblocktemplate`, else `getmemorypool`.
pub async fn submit_block_rpc(
    block: &Block,
    ignore_failure: bool,
    rpc: &DaemonRpc,
    via_getblocktemplate: bool,
    profile: &NetworkProfile,
) -> Result<(), SubmitError> {
    let block_hex = hex::encode(block.to_bytes());
    let (success, result) = if via_getblocktemplate {
        let result = match rpc.call("submitblock", vec![json!(block_hex)]).await {
            Ok(result) => result,
            Err(e) if e.is_method_not_found() => {
                rpc.call(
                    "getblocktemplate",
                    vec![json!({"mode": "submit", "data": block_hex})],
                )
                .await?
            }
            Err(e) => return Err(e.into()),
        };
        // submitblock convention: null means accepted, anything else is a
        // rejection reason.
        (result.is_null(), result)
    } else {
        let result = rpc.call("getmemorypool", vec![json!(block_hex)]).await?;
        (result.as_bool().unwrap_or(false), result)
    };

    let header_bytes = block.header.to_bytes();
    let success_expected =
        profile.adapter.pow_hash(&header_bytes) <= block.header.bits.target();

    if (!success && success_expected && !ignore_failure) || (success && !success_expected) {
        warn!(
            "block submittal result: {success} ({result}) expected: {success_expected}"
        );
    }
    Ok(())
}

/// Submit a solved block over both paths concurrently, each under its own
/// retry policy. Never fails: by the time a path exhausts its retries the
/// other may long since have propagated the block, and the share chain
/// carries on regardless.
pub async fn submit_block(
    block: &Block,
    ignore_failure: bool,
    manager: &ConnectionManager,
    rpc: &DaemonRpc,
    via_getblocktemplate: bool,
    profile: &NetworkProfile,
) {
    let p2p_policy = RetryPolicy::attempts(
        "Error submitting primary block: (will retry)",
        SUBMIT_RETRY_DELAY,
        SUBMIT_RETRY_ATTEMPTS,
    );
    let p2p = p2p_policy.run(|| async { submit_block_p2p(block, manager, profile) });

    let rpc_policy = RetryPolicy::attempts(
        "Error submitting block: (will retry)",
        SUBMIT_RETRY_DELAY,
        SUBMIT_RETRY_ATTEMPTS,
    );
    let rpc_path =
        rpc_policy.run(|| submit_block_rpc(block, ignore_failure, rpc, via_getblocktemplate, profile));

    tokio::join!(p2p, rpc_path);
}
