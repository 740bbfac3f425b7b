//! Per-coin network profiles
//!
//! Everything coin-specific is bundled here: wire constants as plain data
//! on [`NetworkProfile`], and behavior (proof-of-work function, RPC
//! identity probe, payee decoding) behind the [`CoinAdapter`] strategy
//! trait, implemented once per supported coin by the embedding
//! application. The rest of the crate takes a profile at construction and
//! never consults a coin table of its own.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::chain::Hash256;
use crate::rpc::{DaemonRpc, RpcError};

/// 20-byte hash160 of a payee public key.
pub type PubkeyHash = [u8; 20];

/// Coin-specific payout fields decoded from a block template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayoutInfo {
    pub payee: Option<PubkeyHash>,
    pub payee_amount: Option<u64>,
    /// Raw masternode payment data, passed through to the coinbase
    /// construction layer untouched.
    pub masternode_payments: Option<Value>,
}

/// Coin-specific behavior consumed by the sync layer.
#[async_trait]
pub trait CoinAdapter: Send + Sync {
    /// Probe whether the daemon at the other end is the expected coin and
    /// not running in a test/alternate mode.
    async fn rpc_check(&self, rpc: &DaemonRpc) -> Result<bool, RpcError>;

    /// Whether the daemon's reported version is acceptable.
    fn version_ok(&self, version: u64) -> bool;

    /// Proof-of-work hash of a packed block header.
    fn pow_hash(&self, header: &[u8]) -> Hash256;

    /// Identity hash of a packed block header, used to key blocks on the
    /// wire. For most coins this equals the proof-of-work hash.
    fn block_hash(&self, header: &[u8]) -> Hash256 {
        self.pow_hash(header)
    }

    /// Decode the coin's payee/masternode template fields, if any.
    /// The default is a coin with no masternode payments.
    fn payout(&self, _template: &Value, _subsidy: u64) -> Result<PayoutInfo> {
        Ok(PayoutInfo::default())
    }
}

/// Immutable per-coin connection parameters.
///
/// Supplied at construction by the embedding application's network table;
/// validated once, never mutated.
#[derive(Clone)]
pub struct NetworkProfile {
    pub name: String,
    /// Magic prefix framing every P2P message.
    pub magic: [u8; 4],
    /// Maximum accepted message payload; larger declarations are a
    /// protocol violation.
    pub max_payload: usize,
    pub p2p_port: u16,
    pub rpc_port: u16,
    /// Base58 version byte of pay-to-pubkey-hash addresses.
    pub address_version: u8,
    /// Inclusive bounds a believable difficulty target must fall in.
    pub sane_target_range: (Hash256, Hash256),
    /// Tolerate unconsumed bytes after a message's declared schema, for
    /// forward-compatible daemons that append fields.
    pub ignore_trailing_payload: bool,
    pub adapter: Arc<dyn CoinAdapter>,
}

impl NetworkProfile {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        magic: [u8; 4],
        max_payload: usize,
        p2p_port: u16,
        rpc_port: u16,
        address_version: u8,
        sane_target_range: (Hash256, Hash256),
        ignore_trailing_payload: bool,
        adapter: Arc<dyn CoinAdapter>,
    ) -> Result<Self> {
        if magic == [0u8; 4] {
            bail!("magic prefix must be nonzero");
        }
        if max_payload == 0 {
            bail!("max payload must be nonzero");
        }
        if sane_target_range.0 > sane_target_range.1 {
            bail!("sane target range is inverted");
        }
        Ok(Self {
            name: name.into(),
            magic,
            max_payload,
            p2p_port,
            rpc_port,
            address_version,
            sane_target_range,
            ignore_trailing_payload,
            adapter,
        })
    }
}

/// Decode a base58check pay-to-pubkey-hash address into its hash160,
/// verifying the checksum and the expected version byte.
///
/// Shared by [`CoinAdapter::payout`] implementations that receive payee
/// addresses in block templates.
pub fn decode_payee_address(address: &str, address_version: u8) -> Result<PubkeyHash> {
    let raw = bs58::decode(address)
        .into_vec()
        .context("payee address is not base58")?;
    if raw.len() != 25 {
        bail!("payee address has length {}, expected 25", raw.len());
    }
    let (body, checksum) = raw.split_at(21);
    let digest = Sha256::digest(Sha256::digest(body));
    if digest[..4] != *checksum {
        bail!("payee address checksum mismatch");
    }
    if body[0] != address_version {
        bail!(
            "payee address version {} does not match network version {}",
            body[0],
            address_version
        );
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&body[1..]);
    Ok(hash)
}

/// Decode the masternode payout convention shared by dash-family coins:
/// a `payee` address, a `payee_amount`, and a raw `masternode_payments`
/// blob. An empty payee string means no masternode payment this block; an
/// absent or empty `payee_amount` defaults to one fifth of the subsidy,
/// the usual masternode reward fraction.
pub fn masternode_payout(
    template: &Value,
    subsidy: u64,
    address_version: u8,
) -> Result<PayoutInfo> {
    let payee = match template.get("payee").and_then(Value::as_str) {
        Some(address) if !address.is_empty() => {
            Some(decode_payee_address(address, address_version)?)
        }
        _ => None,
    };
    let payee_amount = match template.get("payee_amount") {
        Some(Value::Number(n)) => n.as_u64(),
        // Daemons report "" when the amount is unset.
        _ => None,
    }
    .or(Some(subsidy / 5));
    Ok(PayoutInfo {
        payee,
        payee_amount,
        masternode_payments: template.get("masternode_payments").cloned(),
    })
}
