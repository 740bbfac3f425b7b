//! Chain data structures and their wire encoding
//!
//! Bitcoin-family block headers, transactions and blocks, plus the 256-bit
//! hash/target arithmetic the submission path needs. Wire layout follows
//! the classic serialization: little-endian fixed-width fields, var-int
//! prefixed scripts and lists.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::codec::{put_var_bytes, CodecError, Cursor, WireDecode, WireEncode};

/// A 256-bit integer stored as 32 little-endian bytes (wire order).
///
/// Ordering is numeric, so proof-of-work results compare directly against
/// difficulty targets. Displayed as big-endian hex, matching daemon RPC and
/// block explorer conventions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Smallest value for tests and sentinel math.
    pub fn from_u64(v: u64) -> Self {
        let mut out = [0u8; 32];
        out[..8].copy_from_slice(&v.to_le_bytes());
        Hash256(out)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(s).map_err(|_| CodecError::Invalid { what: "hex hash" })?;
        if bytes.len() != 32 {
            return Err(CodecError::Invalid { what: "hash length" });
        }
        let mut out = [0u8; 32];
        // Hex is big-endian; storage is little-endian.
        for (i, b) in bytes.iter().rev().enumerate() {
            out[i] = *b;
        }
        Ok(Hash256(out))
    }
}

impl Ord for Hash256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Most significant byte last in storage.
        for i in (0..32).rev() {
            match self.0[i].cmp(&other.0[i]) {
                std::cmp::Ordering::Equal => continue,
                ord => return ord,
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl PartialOrd for Hash256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut be = self.0;
        be.reverse();
        write!(f, "{}", hex::encode(be))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({self})")
    }
}

impl FromStr for Hash256 {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl WireEncode for Hash256 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

impl WireDecode for Hash256 {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(Hash256(cur.bytes32()?))
    }
}

/// Double-SHA256, the identity hash of the bitcoin family.
pub fn hash256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Hash256(out)
}

/// Compact 32-bit difficulty encoding: `mantissa * 2^(8*(exponent-3))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactBits(pub u32);

impl CompactBits {
    /// Expand to the full 256-bit target.
    ///
    /// The shift is byte-granular, so placement is exact; mantissa bytes
    /// falling outside the 256-bit range are dropped.
    pub fn target(&self) -> Hash256 {
        let mantissa = self.0 & 0x00ff_ffff;
        let shift = (self.0 >> 24) as i32 - 3;
        let mut out = [0u8; 32];
        for (i, byte) in mantissa.to_le_bytes()[..3].iter().enumerate() {
            let pos = shift + i as i32;
            if (0..32).contains(&pos) {
                out[pos as usize] = *byte;
            }
        }
        Hash256(out)
    }
}

impl WireEncode for CompactBits {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
    }
}

impl WireDecode for CompactBits {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(CompactBits(cur.u32_le()?))
    }
}

/// Reference to a previous transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outpoint {
    pub hash: Hash256,
    pub index: u32,
}

impl WireEncode for Outpoint {
    fn encode(&self, out: &mut Vec<u8>) {
        self.hash.encode(out);
        self.index.encode(out);
    }
}

impl WireDecode for Outpoint {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(Outpoint {
            hash: Hash256::decode(cur)?,
            index: cur.u32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: Outpoint,
    pub script: Vec<u8>,
    pub sequence: u32,
}

impl WireEncode for TxIn {
    fn encode(&self, out: &mut Vec<u8>) {
        self.previous_output.encode(out);
        put_var_bytes(out, &self.script);
        self.sequence.encode(out);
    }
}

impl WireDecode for TxIn {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(TxIn {
            previous_output: Outpoint::decode(cur)?,
            script: cur.var_bytes()?,
            sequence: cur.u32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script: Vec<u8>,
}

impl WireEncode for TxOut {
    fn encode(&self, out: &mut Vec<u8>) {
        self.value.encode(out);
        put_var_bytes(out, &self.script);
    }
}

impl WireDecode for TxOut {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(TxOut {
            value: cur.u64_le()?,
            script: cur.var_bytes()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub tx_ins: Vec<TxIn>,
    pub tx_outs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Transaction id: double-SHA256 of the serialized transaction.
    pub fn hash(&self) -> Hash256 {
        hash256(&self.to_bytes())
    }
}

impl WireEncode for Transaction {
    fn encode(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.tx_ins.encode(out);
        self.tx_outs.encode(out);
        self.lock_time.encode(out);
    }
}

impl WireDecode for Transaction {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(Transaction {
            version: cur.u32_le()?,
            tx_ins: Vec::decode(cur)?,
            tx_outs: Vec::decode(cur)?,
            lock_time: cur.u32_le()?,
        })
    }
}

/// 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_block: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: CompactBits,
    pub nonce: u32,
}

impl WireEncode for BlockHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.previous_block.encode(out);
        self.merkle_root.encode(out);
        self.timestamp.encode(out);
        self.bits.encode(out);
        self.nonce.encode(out);
    }
}

impl WireDecode for BlockHeader {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(BlockHeader {
            version: cur.u32_le()?,
            previous_block: Hash256::decode(cur)?,
            merkle_root: Hash256::decode(cur)?,
            timestamp: cur.u32_le()?,
            bits: CompactBits::decode(cur)?,
            nonce: cur.u32_le()?,
        })
    }
}

/// Block in the current encoding: header plus transaction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl WireEncode for Block {
    fn encode(&self, out: &mut Vec<u8>) {
        self.header.encode(out);
        self.txs.encode(out);
    }
}

impl WireDecode for Block {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(Block {
            header: BlockHeader::decode(cur)?,
            txs: Vec::decode(cur)?,
        })
    }
}

/// Block in the legacy encoding, carrying a trailing block signature.
///
/// Older daemons relay this form; `headers` responses also use it with an
/// empty transaction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
    pub signature: Vec<u8>,
}

impl SignedBlock {
    pub fn into_block(self) -> Block {
        Block {
            header: self.header,
            txs: self.txs,
        }
    }
}

impl WireEncode for SignedBlock {
    fn encode(&self, out: &mut Vec<u8>) {
        self.header.encode(out);
        self.txs.encode(out);
        put_var_bytes(out, &self.signature);
    }
}

impl WireDecode for SignedBlock {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(SignedBlock {
            header: BlockHeader::decode(cur)?,
            txs: Vec::decode(cur)?,
            signature: cur.var_bytes()?,
        })
    }
}
