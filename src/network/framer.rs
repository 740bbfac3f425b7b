//! Wire message framing
//!
//! Turns the daemon's byte stream into discrete frames and back. Frame
//! layout: 4-byte magic prefix, 12-byte null-padded command name, u32
//! payload length, 4-byte double-SHA256 checksum, payload. Incoming data
//! is scanned for the magic marker so garbage between frames is skipped;
//! oversized declarations and checksum mismatches are protocol violations
//! that tear the connection down.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::chain::hash256;

/// Magic(4) + command(12) + length(4) + checksum(4).
const HEADER_LEN: usize = 24;
const COMMAND_LEN: usize = 12;

/// A framed message before schema decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub command: String,
    pub payload: Bytes,
}

impl RawFrame {
    pub fn new(command: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FramerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("declared payload length {len} exceeds maximum {max}")]
    Oversized { len: usize, max: usize },
    #[error("payload checksum mismatch for '{command}'")]
    BadChecksum { command: String },
    #[error("command name is not printable ascii")]
    BadCommand,
    #[error("outgoing command name longer than 12 bytes")]
    CommandTooLong,
}

/// `tokio_util` codec for the daemon's framed wire protocol.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    magic: [u8; 4],
    max_payload: usize,
}

impl FrameCodec {
    pub fn new(magic: [u8; 4], max_payload: usize) -> Self {
        Self { magic, max_payload }
    }

    fn checksum(payload: &[u8]) -> [u8; 4] {
        let digest = hash256(payload);
        let mut out = [0u8; 4];
        out.copy_from_slice(&digest.0[..4]);
        out
    }

    /// Position of the magic marker in `src`, discarding leading garbage.
    ///
    /// Keeps the last 3 bytes when no marker is found, in case a marker
    /// straddles the read boundary.
    fn seek_magic(&self, src: &mut BytesMut) -> bool {
        if let Some(pos) = src
            .windows(self.magic.len())
            .position(|window| window == self.magic)
        {
            if pos > 0 {
                debug!(skipped = pos, "skipped bytes before magic marker");
                src.advance(pos);
            }
            true
        } else {
            let keep = src.len().min(self.magic.len() - 1);
            src.advance(src.len() - keep);
            false
        }
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = FramerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawFrame>, FramerError> {
        if !self.seek_magic(src) {
            return Ok(None);
        }
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let payload_len =
            u32::from_le_bytes([src[16], src[17], src[18], src[19]]) as usize;
        if payload_len > self.max_payload {
            return Err(FramerError::Oversized {
                len: payload_len,
                max: self.max_payload,
            });
        }
        if src.len() < HEADER_LEN + payload_len {
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        let header = src.split_to(HEADER_LEN);
        let payload = src.split_to(payload_len).freeze();

        let command_bytes = &header[4..4 + COMMAND_LEN];
        let end = command_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_LEN);
        let command = std::str::from_utf8(&command_bytes[..end])
            .map_err(|_| FramerError::BadCommand)?
            .to_string();
        if command.is_empty() || !command.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(FramerError::BadCommand);
        }

        let declared: [u8; 4] = header[20..24].try_into().expect("4-byte slice");
        if Self::checksum(&payload) != declared {
            return Err(FramerError::BadChecksum { command });
        }

        Ok(Some(RawFrame { command, payload }))
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = FramerError;

    fn encode(&mut self, frame: RawFrame, dst: &mut BytesMut) -> Result<(), FramerError> {
        if frame.command.len() > COMMAND_LEN {
            return Err(FramerError::CommandTooLong);
        }
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_slice(&self.magic);
        let mut command = [0u8; COMMAND_LEN];
        command[..frame.command.len()].copy_from_slice(frame.command.as_bytes());
        dst.put_slice(&command);
        dst.put_u32_le(frame.payload.len() as u32);
        dst.put_slice(&Self::checksum(&frame.payload));
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 4] = [0xfc, 0xa4, 0x02, 0xdc];

    fn codec() -> FrameCodec {
        FrameCodec::new(MAGIC, 1_000_000)
    }

    fn encode(frame: RawFrame) -> BytesMut {
        let mut buf = BytesMut::new();
        codec().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn frame_round_trip() {
        let frame = RawFrame::new("ping", vec![0xd2, 0x04, 0, 0, 0, 0, 0, 0]);
        let mut buf = encode(frame.clone());
        assert_eq!(codec().decode(&mut buf).unwrap(), Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_payload_frame_round_trip() {
        let frame = RawFrame::new("verack", Vec::<u8>::new());
        let mut buf = encode(frame.clone());
        assert_eq!(codec().decode(&mut buf).unwrap(), Some(frame));
    }

    #[test]
    fn garbage_before_magic_is_skipped() {
        let frame = RawFrame::new("ping", vec![1, 2, 3]);
        let mut buf = BytesMut::from(&b"noise"[..]);
        buf.extend_from_slice(&encode(frame.clone()));
        assert_eq!(codec().decode(&mut buf).unwrap(), Some(frame));
    }

    #[test]
    fn partial_frame_waits_for_more_data() {
        let full = encode(RawFrame::new("ping", vec![9u8; 32]));
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        let mut c = codec();
        assert_eq!(c.decode(&mut partial).unwrap(), None);
        partial.extend_from_slice(&full[full.len() - 1..]);
        assert!(c.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn oversized_declaration_is_fatal() {
        let mut c = FrameCodec::new(MAGIC, 100);
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_slice(&[b'b', b'i', b'g', 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        buf.put_u32_le(101);
        buf.put_slice(&[0u8; 4]);
        assert!(matches!(
            c.decode(&mut buf),
            Err(FramerError::Oversized { len: 101, max: 100 })
        ));
    }

    #[test]
    fn corrupted_checksum_is_fatal() {
        let mut buf = encode(RawFrame::new("ping", vec![1, 2, 3]));
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(matches!(
            codec().decode(&mut buf),
            Err(FramerError::BadChecksum { .. })
        ));
    }

    #[test]
    fn two_frames_in_one_read() {
        let a = RawFrame::new("ping", vec![1]);
        let b = RawFrame::new("pong", vec![2]);
        let mut buf = encode(a.clone());
        buf.extend_from_slice(&encode(b.clone()));
        let mut c = codec();
        assert_eq!(c.decode(&mut buf).unwrap(), Some(a));
        assert_eq!(c.decode(&mut buf).unwrap(), Some(b));
    }
}
