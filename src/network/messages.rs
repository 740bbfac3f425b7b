//! P2P message catalog
//!
//! One typed struct per wire command, with the closed [`Message`] enum
//! tying command names to schemas. Unknown commands are not an error;
//! daemons send message types this node does not implement, and those
//! decode to `None` and are dropped.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use crate::chain::{Block, Hash256, SignedBlock, Transaction};
use crate::codec::{
    decode_sentinel_option, encode_sentinel_option, put_var_bytes, CodecError, Cursor, WireDecode,
    WireEncode,
};

/// Network address record: services plus IPv6-mapped address and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddress {
    pub services: u64,
    pub addr: SocketAddr,
}

impl NetAddress {
    pub fn new(services: u64, addr: SocketAddr) -> Self {
        Self { services, addr }
    }
}

impl WireEncode for NetAddress {
    fn encode(&self, out: &mut Vec<u8>) {
        self.services.encode(out);
        let v6 = match self.addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        out.extend_from_slice(&v6.octets());
        // Port is big-endian on the wire.
        out.extend_from_slice(&self.addr.port().to_be_bytes());
    }
}

impl WireDecode for NetAddress {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        let services = cur.u64_le()?;
        let mut octets = [0u8; 16];
        octets.copy_from_slice(cur.take(16)?);
        let v6 = Ipv6Addr::from(octets);
        let port = cur.u16_be()?;
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        Ok(NetAddress {
            services,
            addr: SocketAddr::new(ip, port),
        })
    }
}

/// Inventory item kinds. Decoding an unknown tag is a schema violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InvType {
    Tx = 1,
    Block = 2,
    FilteredBlock = 3,
    TxLockRequest = 4,
    TxLockVote = 5,
    Spork = 6,
    MasternodeWinner = 7,
    MasternodeScanningError = 8,
    BudgetVote = 9,
    BudgetProposal = 10,
    BudgetFinalized = 11,
    BudgetFinalizedVote = 12,
    MasternodeQuorum = 13,
    MasternodeAnnounce = 14,
    MasternodePing = 15,
}

impl WireEncode for InvType {
    fn encode(&self, out: &mut Vec<u8>) {
        (*self as u32).encode(out);
    }
}

impl WireDecode for InvType {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        let tag = cur.u32_le()?;
        Ok(match tag {
            1 => InvType::Tx,
            2 => InvType::Block,
            3 => InvType::FilteredBlock,
            4 => InvType::TxLockRequest,
            5 => InvType::TxLockVote,
            6 => InvType::Spork,
            7 => InvType::MasternodeWinner,
            8 => InvType::MasternodeScanningError,
            9 => InvType::BudgetVote,
            10 => InvType::BudgetProposal,
            11 => InvType::BudgetFinalized,
            12 => InvType::BudgetFinalizedVote,
            13 => InvType::MasternodeQuorum,
            14 => InvType::MasternodeAnnounce,
            15 => InvType::MasternodePing,
            other => {
                return Err(CodecError::UnknownTag {
                    what: "inventory type",
                    tag: other as u64,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvItem {
    pub kind: InvType,
    pub hash: Hash256,
}

impl WireEncode for InvItem {
    fn encode(&self, out: &mut Vec<u8>) {
        self.kind.encode(out);
        self.hash.encode(out);
    }
}

impl WireDecode for InvItem {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(InvItem {
            kind: InvType::decode(cur)?,
            hash: Hash256::decode(cur)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: u64,
    pub time: i64,
    pub addr_to: NetAddress,
    pub addr_from: NetAddress,
    pub nonce: u64,
    pub sub_version: String,
    pub start_height: i32,
}

impl WireEncode for VersionMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.services.encode(out);
        self.time.encode(out);
        self.addr_to.encode(out);
        self.addr_from.encode(out);
        self.nonce.encode(out);
        put_var_bytes(out, self.sub_version.as_bytes());
        self.start_height.encode(out);
    }
}

impl WireDecode for VersionMessage {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(VersionMessage {
            version: cur.i32_le()?,
            services: cur.u64_le()?,
            time: cur.i64_le()?,
            addr_to: NetAddress::decode(cur)?,
            addr_from: NetAddress::decode(cur)?,
            nonce: cur.u64_le()?,
            sub_version: String::from_utf8(cur.var_bytes()?)
                .map_err(|_| CodecError::Invalid { what: "sub_version" })?,
            start_height: cur.i32_le()?,
        })
    }
}

/// Shared schema of `getblocks` and `getheaders`: locator hashes plus an
/// optional stop hash, absent encoded as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocator {
    pub version: u32,
    pub have: Vec<Hash256>,
    pub last: Option<Hash256>,
}

impl WireEncode for BlockLocator {
    fn encode(&self, out: &mut Vec<u8>) {
        self.version.encode(out);
        self.have.encode(out);
        encode_sentinel_option(&Hash256::ZERO, &self.last, out);
    }
}

impl WireDecode for BlockLocator {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(BlockLocator {
            version: cur.u32_le()?,
            have: Vec::decode(cur)?,
            last: decode_sentinel_option(&Hash256::ZERO, cur)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrEntry {
    pub timestamp: u32,
    pub address: NetAddress,
}

impl WireEncode for AddrEntry {
    fn encode(&self, out: &mut Vec<u8>) {
        self.timestamp.encode(out);
        self.address.encode(out);
    }
}

impl WireDecode for AddrEntry {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(AddrEntry {
            timestamp: cur.u32_le()?,
            address: NetAddress::decode(cur)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub message: Vec<u8>,
    pub signature: Vec<u8>,
}

impl WireEncode for AlertMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        put_var_bytes(out, &self.message);
        put_var_bytes(out, &self.signature);
    }
}

impl WireDecode for AlertMessage {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        Ok(AlertMessage {
            message: cur.var_bytes()?,
            signature: cur.var_bytes()?,
        })
    }
}

/// Every wire message this client speaks.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Inv(Vec<InvItem>),
    GetData(Vec<InvItem>),
    GetBlocks(BlockLocator),
    GetHeaders(BlockLocator),
    GetAddr,
    Addr(Vec<AddrEntry>),
    Tx(Transaction),
    Block(Block),
    /// Legacy block encoding with a trailing signature.
    BlockLegacy(SignedBlock),
    Headers(Vec<SignedBlock>),
    Ping { nonce: u64 },
    Pong { nonce: u64 },
    Alert(AlertMessage),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::GetBlocks(_) => "getblocks",
            Message::GetHeaders(_) => "getheaders",
            Message::GetAddr => "getaddr",
            Message::Addr(_) => "addr",
            Message::Tx(_) => "tx",
            Message::Block(_) | Message::BlockLegacy(_) => "block",
            Message::Headers(_) => "headers",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::Alert(_) => "alert",
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Message::Version(m) => m.encode(&mut out),
            Message::Verack | Message::GetAddr => {}
            Message::Inv(items) => items.encode(&mut out),
            Message::GetData(items) => items.encode(&mut out),
            Message::GetBlocks(m) => m.encode(&mut out),
            Message::GetHeaders(m) => m.encode(&mut out),
            Message::Addr(entries) => entries.encode(&mut out),
            Message::Tx(tx) => tx.encode(&mut out),
            Message::Block(block) => block.encode(&mut out),
            Message::BlockLegacy(block) => block.encode(&mut out),
            Message::Headers(headers) => headers.encode(&mut out),
            Message::Ping { nonce } | Message::Pong { nonce } => nonce.encode(&mut out),
            Message::Alert(m) => m.encode(&mut out),
        }
        out
    }

    /// Decode a framed payload by command name.
    ///
    /// Returns `Ok(None)` for commands this node does not implement. With
    /// `ignore_trailing` set, unconsumed bytes after the declared schema
    /// are tolerated for forward compatibility; otherwise they are a
    /// schema violation.
    pub fn decode(
        command: &str,
        payload: &[u8],
        ignore_trailing: bool,
    ) -> Result<Option<Message>, CodecError> {
        let mut cur = Cursor::new(payload);
        let message = match command {
            "version" => Message::Version(VersionMessage::decode(&mut cur)?),
            "verack" => Message::Verack,
            "inv" => Message::Inv(Vec::decode(&mut cur)?),
            "getdata" => Message::GetData(Vec::decode(&mut cur)?),
            "getblocks" => Message::GetBlocks(BlockLocator::decode(&mut cur)?),
            "getheaders" => Message::GetHeaders(BlockLocator::decode(&mut cur)?),
            "getaddr" => Message::GetAddr,
            "addr" => Message::Addr(Vec::decode(&mut cur)?),
            "tx" => Message::Tx(Transaction::decode(&mut cur)?),
            "block" => return Ok(Some(decode_block(payload, ignore_trailing)?)),
            "headers" => Message::Headers(Vec::decode(&mut cur)?),
            "ping" => Message::Ping {
                nonce: cur.u64_le()?,
            },
            "pong" => Message::Pong {
                nonce: cur.u64_le()?,
            },
            "alert" => Message::Alert(AlertMessage::decode(&mut cur)?),
            _ => return Ok(None),
        };
        if !ignore_trailing && !cur.is_empty() {
            return Err(CodecError::TrailingBytes {
                len: cur.remaining(),
            });
        }
        Ok(Some(message))
    }
}

/// Block payloads arrive in the current encoding or the legacy one with a
/// trailing signature; try current first and fall back.
fn decode_block(payload: &[u8], ignore_trailing: bool) -> Result<Message, CodecError> {
    let mut cur = Cursor::new(payload);
    match Block::decode(&mut cur) {
        Ok(block) if ignore_trailing || cur.is_empty() => return Ok(Message::Block(block)),
        _ => {}
    }
    let mut cur = Cursor::new(payload);
    let block = SignedBlock::decode(&mut cur)?;
    if !ignore_trailing && !cur.is_empty() {
        return Err(CodecError::TrailingBytes {
            len: cur.remaining(),
        });
    }
    Ok(Message::BlockLegacy(block))
}
