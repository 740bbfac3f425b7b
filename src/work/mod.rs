//! Work fetch over RPC
//!
//! Pulls a block template from the daemon and normalizes it into a
//! [`WorkUnit`] for the mining layer. Handles the two historically
//! equivalent template methods (`getblocktemplate` and the older
//! `getmemorypool`), falling back when the daemon reports the preferred
//! one as unknown, and fills in the block height by asking for the parent
//! block when the template omits it.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::chain::{hash256, CompactBits, Hash256, Transaction};
use crate::codec::WireDecode;
use crate::profile::{NetworkProfile, PayoutInfo};
use crate::rpc::{DaemonRpc, RpcError};
use crate::util::{RetryPolicy, Retryable};

/// Delay between daemon check attempts.
const CHECK_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Delay between work fetch attempts.
const GETWORK_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum WorkError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("malformed block template: {0}")]
    Template(String),

    #[error(transparent)]
    Codec(#[from] crate::codec::CodecError),

    #[error("coin payout decoding failed: {0}")]
    Payout(#[from] anyhow::Error),

    /// Retryable condition whose diagnostic was already printed.
    #[error("retrying silently")]
    Silent,
}

impl Retryable for WorkError {
    fn is_silent(&self) -> bool {
        matches!(self, WorkError::Silent)
    }
}

/// Normalized snapshot of a fetched block template.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub version: u32,
    pub previous_block: Hash256,
    pub transactions: Vec<Transaction>,
    pub transaction_hashes: Vec<Hash256>,
    /// Per-transaction fee hints, where the template carried them inline.
    pub transaction_fees: Vec<Option<u64>>,
    pub subsidy: u64,
    pub time: u32,
    pub bits: CompactBits,
    pub coinbase_flags: Vec<u8>,
    pub height: u64,
    /// How long the template fetch took.
    pub latency: Duration,
    /// Which method produced this template; submission mirrors it.
    pub via_getblocktemplate: bool,
    /// Coin-specific payee/masternode fields.
    pub payout: PayoutInfo,
}

/// Verify the daemon is the expected coin, in the expected mode, at an
/// acceptable version. Failures are operator problems, not programming
/// errors: a diagnostic is printed and the condition is retried silently
/// so the operator can fix the daemon without restarting this node.
pub async fn check(rpc: &DaemonRpc, profile: &NetworkProfile) -> Result<(), WorkError> {
    if !profile.adapter.rpc_check(rpc).await? {
        error!(
            "daemon check failed! Make sure you're connected to the right daemon \
             with the configured RPC port (network '{}')",
            profile.name
        );
        return Err(WorkError::Silent);
    }
    let info = rpc.call("getinfo", vec![]).await?;
    let version = info
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| WorkError::Template("getinfo response without version".into()))?;
    if !profile.adapter.version_ok(version) {
        error!("daemon version {version} is too old! Upgrade the daemon.");
        return Err(WorkError::Silent);
    }
    Ok(())
}

/// [`check`] under its standard retry policy.
pub async fn check_with_retry(rpc: &DaemonRpc, profile: &NetworkProfile) {
    let _ = RetryPolicy::unbounded("Error while checking daemon connection:", CHECK_RETRY_DELAY)
        .run(|| check(rpc, profile))
        .await;
}

/// Fetch and normalize one work unit.
///
/// `use_getblocktemplate` selects the preferred template method; a
/// "method not found" response flips it and retries once. Two unknown
/// methods mean the daemon is too old, reported and retried silently.
pub async fn getwork(
    rpc: &DaemonRpc,
    profile: &NetworkProfile,
    use_getblocktemplate: bool,
) -> Result<WorkUnit, WorkError> {
    let mut use_gbt = use_getblocktemplate;
    let started = Instant::now();
    let template = match fetch_template(rpc, use_gbt).await {
        Ok(template) => template,
        Err(e) if e.is_method_not_found() => {
            use_gbt = !use_gbt;
            match fetch_template(rpc, use_gbt).await {
                Ok(template) => template,
                Err(e) if e.is_method_not_found() => {
                    error!("daemon supports neither getblocktemplate nor getmemorypool! Upgrade the daemon.");
                    return Err(WorkError::Silent);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(e) => return Err(e.into()),
    };
    let latency = started.elapsed();

    normalize(rpc, profile, template, use_gbt, latency).await
}

/// [`getwork`] under its standard retry policy.
pub async fn getwork_with_retry(
    rpc: &DaemonRpc,
    profile: &NetworkProfile,
    use_getblocktemplate: bool,
) -> WorkUnit {
    RetryPolicy::unbounded("Error getting work from daemon:", GETWORK_RETRY_DELAY)
        .run(|| getwork(rpc, profile, use_getblocktemplate))
        .await
        .expect("unbounded retry only returns on success")
}

async fn fetch_template(rpc: &DaemonRpc, use_gbt: bool) -> Result<Value, RpcError> {
    if use_gbt {
        rpc.call("getblocktemplate", vec![json!({"mode": "template"})])
            .await
    } else {
        rpc.call("getmemorypool", vec![]).await
    }
}

async fn normalize(
    rpc: &DaemonRpc,
    profile: &NetworkProfile,
    template: Value,
    via_getblocktemplate: bool,
    latency: Duration,
) -> Result<WorkUnit, WorkError> {
    let field = |name: &str| {
        template
            .get(name)
            .cloned()
            .ok_or_else(|| WorkError::Template(format!("missing field '{name}'")))
    };

    // Template transactions are raw hex, either bare strings or objects
    // carrying the hex under "data" along with an optional fee hint.
    let tx_entries = field("transactions")?;
    let tx_entries = tx_entries
        .as_array()
        .ok_or_else(|| WorkError::Template("'transactions' is not a list".into()))?;
    let mut transactions = Vec::with_capacity(tx_entries.len());
    let mut transaction_hashes = Vec::with_capacity(tx_entries.len());
    let mut transaction_fees = Vec::with_capacity(tx_entries.len());
    for entry in tx_entries {
        let (data, fee) = match entry {
            Value::String(s) => (s.as_str(), None),
            Value::Object(o) => (
                o.get("data")
                    .and_then(Value::as_str)
                    .ok_or_else(|| WorkError::Template("transaction without data".into()))?,
                o.get("fee").and_then(Value::as_u64),
            ),
            _ => return Err(WorkError::Template("unrecognized transaction entry".into())),
        };
        let raw = hex::decode(data)
            .map_err(|_| WorkError::Template("transaction data is not hex".into()))?;
        transactions.push(Transaction::from_bytes(&raw)?);
        transaction_hashes.push(hash256(&raw));
        transaction_fees.push(fee);
    }

    let previous_block = Hash256::from_hex(
        field("previousblockhash")?
            .as_str()
            .ok_or_else(|| WorkError::Template("previousblockhash is not a string".into()))?,
    )?;

    let height = match template.get("height").and_then(Value::as_u64) {
        Some(height) => {
            if cfg!(debug_assertions) {
                let looked_up = parent_height(rpc, &previous_block).await? + 1;
                debug_assert_eq!(height, looked_up, "template height disagrees with parent");
            }
            height
        }
        None => parent_height(rpc, &previous_block).await? + 1,
    };

    let subsidy = field("coinbasevalue")?
        .as_u64()
        .ok_or_else(|| WorkError::Template("coinbasevalue is not an integer".into()))?;

    let time = template
        .get("time")
        .or_else(|| template.get("curtime"))
        .and_then(Value::as_u64)
        .ok_or_else(|| WorkError::Template("missing time/curtime".into()))? as u32;

    let bits = decode_bits(&field("bits")?)?;

    let coinbase_flags = match template.get("coinbaseflags").and_then(Value::as_str) {
        Some(flags) => hex::decode(flags)
            .map_err(|_| WorkError::Template("coinbaseflags is not hex".into()))?,
        None => match template.get("coinbaseaux").and_then(Value::as_object) {
            Some(aux) => {
                let mut flags = Vec::new();
                for value in aux.values() {
                    let s = value.as_str().ok_or_else(|| {
                        WorkError::Template("coinbaseaux entry is not a string".into())
                    })?;
                    flags.extend(
                        hex::decode(s)
                            .map_err(|_| WorkError::Template("coinbaseaux is not hex".into()))?,
                    );
                }
                flags
            }
            None => Vec::new(),
        },
    };

    let payout = profile.adapter.payout(&template, subsidy)?;

    Ok(WorkUnit {
        version: field("version")?
            .as_u64()
            .ok_or_else(|| WorkError::Template("version is not an integer".into()))?
            as u32,
        previous_block,
        transactions,
        transaction_hashes,
        transaction_fees,
        subsidy,
        time,
        bits,
        coinbase_flags,
        height,
        latency,
        via_getblocktemplate,
        payout,
    })
}

async fn parent_height(rpc: &DaemonRpc, previous_block: &Hash256) -> Result<u64, WorkError> {
    let parent = rpc
        .call("getblock", vec![json!(previous_block.to_string())])
        .await?;
    parent
        .get("height")
        .and_then(Value::as_u64)
        .ok_or_else(|| WorkError::Template("getblock response without height".into()))
}

/// Template `bits` arrive either as a big-endian hex string or as the raw
/// compact integer.
fn decode_bits(value: &Value) -> Result<CompactBits, WorkError> {
    match value {
        Value::String(s) => u32::from_str_radix(s, 16)
            .map(CompactBits)
            .map_err(|_| WorkError::Template("bits is not a hex integer".into())),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(CompactBits)
            .ok_or_else(|| WorkError::Template("bits is out of range".into())),
        _ => Err(WorkError::Template("unrecognized bits encoding".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_decode_from_hex_string_and_number() {
        assert_eq!(
            decode_bits(&json!("1d00ffff")).unwrap(),
            CompactBits(0x1d00ffff)
        );
        assert_eq!(
            decode_bits(&json!(0x1b04864cu32)).unwrap(),
            CompactBits(0x1b04864c)
        );
        assert!(decode_bits(&json!(null)).is_err());
        assert!(decode_bits(&json!("zz")).is_err());
    }
}
