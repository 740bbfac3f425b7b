//! Composable wire serialization primitives
//!
//! Every P2P message and chain structure in this crate is packed and
//! unpacked through these helpers. The contract is strict: `decode` is the
//! exact inverse of `encode` for well-formed values, and malformed or
//! truncated input fails with a [`CodecError`] instead of reading out of
//! bounds.

use thiserror::Error;

/// Decoding failure. Encoding is infallible by construction.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input (needed {needed} more bytes)")]
    UnexpectedEnd { needed: usize },
    #[error("unknown {what} tag {tag}")]
    UnknownTag { what: &'static str, tag: u64 },
    #[error("invalid {what}")]
    Invalid { what: &'static str },
    #[error("{len} trailing bytes after payload")]
    TrailingBytes { len: usize },
}

/// Bounds-checked reader over a byte slice.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `n` bytes, failing without advancing if fewer remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEnd {
                needed: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Big-endian u16; the wire uses network byte order for port numbers.
    pub fn u16_be(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32_le(&mut self) -> Result<i32, CodecError> {
        Ok(self.u32_le()? as i32)
    }

    pub fn u64_le(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn i64_le(&mut self) -> Result<i64, CodecError> {
        Ok(self.u64_le()? as i64)
    }

    pub fn bytes32(&mut self) -> Result<[u8; 32], CodecError> {
        let b = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(out)
    }

    /// Bitcoin-style variable-length integer.
    pub fn var_int(&mut self) -> Result<u64, CodecError> {
        match self.u8()? {
            0xff => self.u64_le(),
            0xfe => Ok(self.u32_le()? as u64),
            0xfd => Ok(self.u16_le()? as u64),
            n => Ok(n as u64),
        }
    }

    /// Length-prefixed byte string.
    pub fn var_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.var_int()?;
        let len = usize::try_from(len).map_err(|_| CodecError::Invalid { what: "length" })?;
        Ok(self.take(len)?.to_vec())
    }
}

/// Serialize into an output buffer. Infallible.
pub trait WireEncode {
    fn encode(&self, out: &mut Vec<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Deserialize from a [`Cursor`].
pub trait WireDecode: Sized {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError>;

    /// Strict whole-buffer decode: trailing bytes are an error.
    fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(buf);
        let value = Self::decode(&mut cur)?;
        if !cur.is_empty() {
            return Err(CodecError::TrailingBytes {
                len: cur.remaining(),
            });
        }
        Ok(value)
    }
}

pub fn put_var_int(out: &mut Vec<u8>, v: u64) {
    if v < 0xfd {
        out.push(v as u8);
    } else if v <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(v as u16).to_le_bytes());
    } else if v <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(v as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn put_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_var_int(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

impl WireEncode for u8 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
}

impl WireDecode for u8 {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        cur.u8()
    }
}

impl WireEncode for u32 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl WireDecode for u32 {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        cur.u32_le()
    }
}

impl WireEncode for i32 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl WireDecode for i32 {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        cur.i32_le()
    }
}

impl WireEncode for u64 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl WireDecode for u64 {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        cur.u64_le()
    }
}

impl WireEncode for i64 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl WireDecode for i64 {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        cur.i64_le()
    }
}

/// Length-prefixed homogeneous list.
impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_var_int(out, self.len() as u64);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        let count = cur.var_int()?;
        // Count is attacker-controlled; grow as we decode instead of
        // preallocating.
        let mut out = Vec::new();
        for _ in 0..count {
            out.push(T::decode(cur)?);
        }
        Ok(out)
    }
}

/// Sentinel-encoded optional: `None` is packed as the sentinel value.
///
/// Decoding the sentinel yields `None`, so `Some(sentinel)` does not survive
/// a round trip; the protocols using this reserve the sentinel accordingly.
pub fn encode_sentinel_option<T: WireEncode>(sentinel: &T, value: &Option<T>, out: &mut Vec<u8>) {
    match value {
        Some(v) => v.encode(out),
        None => sentinel.encode(out),
    }
}

pub fn decode_sentinel_option<T: WireDecode + PartialEq>(
    sentinel: &T,
    cur: &mut Cursor<'_>,
) -> Result<Option<T>, CodecError> {
    let value = T::decode(cur)?;
    Ok(if value == *sentinel { None } else { Some(value) })
}
