//! coind-sync - daemon synchronization layer for a decentralized mining pool
//!
//! This crate owns everything between a pool node and the coin daemon it
//! mines against:
//!
//! - a binary P2P wire client (handshake, block/transaction relay, liveness)
//! - a JSON-RPC work fetch/submit path with retry semantics
//!
//! The two halves are deliberately independent: block submission goes out
//! over both at once and the outcomes are reconciled afterwards, because
//! either path alone is allowed to fail without losing the block.
//!
//! Everything coin-specific (magic bytes, ports, proof-of-work function,
//! payee decoding) lives behind [`profile::NetworkProfile`] and the
//! [`profile::CoinAdapter`] trait; this crate never hard-codes a coin.

pub mod chain;
pub mod codec;
pub mod config;
pub mod network;
pub mod profile;
pub mod rpc;
pub mod submit;
pub mod util;
pub mod work;

pub use chain::{Block, BlockHeader, CompactBits, Hash256, Transaction};
pub use config::DaemonConfig;
pub use network::{ConnectionManager, PeerEvents, PeerHandle, ReconnectPolicy};
pub use profile::{CoinAdapter, NetworkProfile, PayoutInfo};
pub use rpc::DaemonRpc;
pub use work::WorkUnit;
